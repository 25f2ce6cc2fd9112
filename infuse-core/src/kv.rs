//! Key-value persistence for the small set of values that must survive a
//! reset: key identifiers, device name, reboot count, the reboot record.
//!
//! One JSON document behind the filesystem seam, written through on every
//! put. Corruption is not fatal; the store restarts empty.

use crate::error::{CoreError, Result};
use infuse_tdf::vfs::FileSystem;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub const KEY_DEVICE_NAME: &str = "device_name";
pub const KEY_REBOOT_COUNT: &str = "reboots";
pub const KEY_REBOOT_RECORD: &str = "reboot_record";
pub const KEY_NETWORK_KEY_ID: &str = "network_key_id";
pub const KEY_DEVICE_KEY_ID: &str = "device_key_id";

pub struct KvStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    cache: Mutex<Map<String, Value>>,
}

impl KvStore {
    pub fn open(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match fs.read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(error = %e, "kv store corrupt, starting empty");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        KvStore {
            fs,
            path,
            cache: Mutex::new(cache),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.cache.lock();
        cache
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json =
            serde_json::to_value(value).map_err(|e| CoreError::KvCorrupt(e.to_string()))?;
        let mut cache = self.cache.lock();
        cache.insert(key.to_string(), json);
        self.persist(&cache)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock();
        if cache.remove(key).is_some() {
            self.persist(&cache)?;
        }
        Ok(())
    }

    /// Read-increment-write helper for counters like the reboot count.
    pub fn increment(&self, key: &str) -> Result<u64> {
        let mut cache = self.cache.lock();
        let next = cache.get(key).and_then(Value::as_u64).unwrap_or(0) + 1;
        cache.insert(key.to_string(), Value::from(next));
        self.persist(&cache)?;
        Ok(next)
    }

    fn persist(&self, cache: &Map<String, Value>) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(cache).map_err(|e| CoreError::KvCorrupt(e.to_string()))?;
        let mut handle = self.fs.open(&self.path, true)?;
        handle.set_len(0)?;
        handle.write_all(&bytes)?;
        handle.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infuse_tdf::vfs::MemFileSystem;
    use std::path::Path;

    #[test]
    fn round_trip_and_reload() {
        let fs = Arc::new(MemFileSystem::new());
        let store = KvStore::open(fs.clone(), "/kv.json");
        store.put(KEY_DEVICE_NAME, &"tracker-17".to_string()).unwrap();
        assert_eq!(store.increment(KEY_REBOOT_COUNT).unwrap(), 1);
        assert_eq!(store.increment(KEY_REBOOT_COUNT).unwrap(), 2);

        let reopened = KvStore::open(fs, "/kv.json");
        assert_eq!(
            reopened.get::<String>(KEY_DEVICE_NAME).as_deref(),
            Some("tracker-17")
        );
        assert_eq!(reopened.get::<u64>(KEY_REBOOT_COUNT), Some(2));
        assert_eq!(reopened.get::<u64>("missing"), None);
    }

    #[test]
    fn corrupt_store_restarts_empty() {
        let fs = Arc::new(MemFileSystem::new());
        {
            let mut handle = fs.open(Path::new("/kv.json"), true).unwrap();
            handle.write_all(b"not json{").unwrap();
        }
        let store = KvStore::open(fs, "/kv.json");
        assert_eq!(store.get::<u64>(KEY_REBOOT_COUNT), None);
        store.put(KEY_REBOOT_COUNT, &1u64).unwrap();
        assert_eq!(store.get::<u64>(KEY_REBOOT_COUNT), Some(1));
    }
}
