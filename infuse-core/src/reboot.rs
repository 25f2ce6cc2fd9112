//! Reboot-reason snapshot retained across resets.

use crate::kv::{KvStore, KEY_REBOOT_RECORD};
use infuse_proto::EpochTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebootReason {
    PowerOn,
    Requested,
    Watchdog,
    Assertion,
    Unknown,
}

/// Written in the pre-reset warning window so the next boot can name the
/// thread that starved its watchdog channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebootRecord {
    pub reason: RebootReason,
    pub epoch: EpochTime,
    pub uptime_s: u32,
    pub thread: Option<String>,
    pub detail: String,
}

impl RebootRecord {
    pub fn watchdog(thread: Option<String>, epoch: EpochTime, uptime_s: u32) -> Self {
        RebootRecord {
            reason: RebootReason::Watchdog,
            epoch,
            uptime_s,
            detail: match &thread {
                Some(name) => format!("watchdog channel starved by {name}"),
                None => "watchdog channel starved".to_string(),
            },
            thread,
        }
    }

    pub fn store(&self, kv: &KvStore) -> crate::error::Result<()> {
        kv.put(KEY_REBOOT_RECORD, self)
    }

    /// The previous boot's record, if one was written.
    pub fn load(kv: &KvStore) -> Option<RebootRecord> {
        kv.get(KEY_REBOOT_RECORD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infuse_tdf::vfs::MemFileSystem;
    use std::sync::Arc;

    #[test]
    fn survives_reopen() {
        let fs = Arc::new(MemFileSystem::new());
        {
            let kv = KvStore::open(fs.clone(), "/kv.json");
            RebootRecord::watchdog(
                Some("gnss-task".into()),
                EpochTime::from_seconds(123),
                456,
            )
            .store(&kv)
            .unwrap();
        }
        let kv = KvStore::open(fs, "/kv.json");
        let record = RebootRecord::load(&kv).unwrap();
        assert_eq!(record.reason, RebootReason::Watchdog);
        assert_eq!(record.thread.as_deref(), Some("gnss-task"));
        assert_eq!(record.uptime_s, 456);
        assert!(record.detail.contains("gnss-task"));
    }
}
