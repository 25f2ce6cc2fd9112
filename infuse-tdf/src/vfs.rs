//! Filesystem seam for file-backed loggers.
//!
//! The file backend talks to this trait instead of `std::fs` so tests can
//! run against an in-memory tree and inject storage faults.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub trait FileHandle: Read + Write + Seek + Send + Sync + Debug {
    fn set_len(&mut self, size: u64) -> io::Result<()>;
    fn len(&self) -> io::Result<u64>;
}

pub trait FileSystem: Send + Sync + Debug {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    fn exists(&self, path: &Path) -> bool;
    fn open(&self, path: &Path, create: bool) -> io::Result<Box<dyn FileHandle>>;
}

#[derive(Clone, Copy)]
pub struct StdFileSystem;

impl Debug for StdFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StdFileSystem")
    }
}

impl FileSystem for StdFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(fs::read_dir(path)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect())
    }
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
    fn open(&self, path: &Path, create: bool) -> io::Result<Box<dyn FileHandle>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        Ok(Box::new(file))
    }
}

impl FileHandle for File {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// In-memory tree for tests.
#[derive(Debug, Clone, Default)]
pub struct MemFileSystem {
    inner: Arc<RwLock<MemTree>>,
}

#[derive(Debug, Default)]
struct MemTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeMap<PathBuf, ()>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSystem for MemFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner
            .read()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner
            .write()
            .unwrap()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.write().unwrap();
        let mut p = PathBuf::new();
        for component in path.components() {
            p.push(component);
            inner.dirs.entry(p.clone()).or_insert(());
        }
        Ok(())
    }
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .files
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect())
    }
    fn exists(&self, path: &Path) -> bool {
        let inner = self.inner.read().unwrap();
        inner.files.contains_key(path) || inner.dirs.contains_key(path)
    }
    fn open(&self, path: &Path, create: bool) -> io::Result<Box<dyn FileHandle>> {
        let mut inner = self.inner.write().unwrap();
        let data = match inner.files.get(path) {
            Some(existing) => existing.clone(),
            None if create => {
                inner.files.insert(path.to_path_buf(), Vec::new());
                Vec::new()
            }
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "file not found")),
        };
        Ok(Box::new(MemFileHandle {
            data,
            pos: 0,
            path: path.to_path_buf(),
            fs: self.clone(),
        }))
    }
}

#[derive(Debug)]
struct MemFileHandle {
    data: Vec<u8>,
    pos: u64,
    path: PathBuf,
    fs: MemFileSystem,
}

impl Read for MemFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cursor = Cursor::new(&self.data);
        cursor.set_position(self.pos);
        let n = cursor.read(buf)?;
        self.pos = cursor.position();
        Ok(n)
    }
}

impl Write for MemFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut cursor = Cursor::new(&mut self.data);
        cursor.set_position(self.pos);
        let n = cursor.write(buf)?;
        self.pos = cursor.position();
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.fs
            .inner
            .write()
            .unwrap()
            .files
            .insert(self.path.clone(), self.data.clone());
        Ok(())
    }
}

impl Seek for MemFileHandle {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let mut cursor = Cursor::new(&self.data);
        cursor.set_position(self.pos);
        let res = cursor.seek(pos)?;
        self.pos = cursor.position();
        Ok(res)
    }
}

impl Drop for MemFileHandle {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl FileHandle for MemFileHandle {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        self.data.resize(size as usize, 0);
        Ok(())
    }
    fn len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }
}

/// Wraps another filesystem and fails writes, probabilistically or after a
/// byte budget, for backend failure-path tests.
#[derive(Debug)]
pub struct FaultInjectingFileSystem {
    inner: Arc<dyn FileSystem>,
    fail_probability: Arc<AtomicU64>, // scaled by 10^6
    full_after: Arc<AtomicU64>,
    total_written: Arc<AtomicU64>,
}

impl FaultInjectingFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            fail_probability: Arc::new(AtomicU64::new(0)),
            full_after: Arc::new(AtomicU64::new(u64::MAX)),
            total_written: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_fail_probability(&self, prob: f64) {
        self.fail_probability
            .store((prob * 1_000_000.0) as u64, Ordering::SeqCst);
    }

    /// Simulated device capacity in bytes written.
    pub fn set_full_after(&self, limit: u64) {
        self.full_after.store(limit, Ordering::SeqCst);
    }
}

impl FileSystem for FaultInjectingFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path)
    }
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.read_dir(path)
    }
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
    fn open(&self, path: &Path, create: bool) -> io::Result<Box<dyn FileHandle>> {
        let handle = self.inner.open(path, create)?;
        Ok(Box::new(FaultInjectingHandle {
            inner: handle,
            fs_fail: self.fail_probability.clone(),
            full_after: self.full_after.clone(),
            total_written: self.total_written.clone(),
        }))
    }
}

#[derive(Debug)]
struct FaultInjectingHandle {
    inner: Box<dyn FileHandle>,
    fs_fail: Arc<AtomicU64>,
    full_after: Arc<AtomicU64>,
    total_written: Arc<AtomicU64>,
}

impl FaultInjectingHandle {
    fn check_write(&self, len: u64) -> io::Result<()> {
        let prob = self.fs_fail.load(Ordering::SeqCst);
        if prob > 0 {
            use rand::Rng;
            if rand::thread_rng().gen_range(0..1_000_000) < prob {
                return Err(io::Error::other("injected fault"));
            }
        }
        let total = self.total_written.fetch_add(len, Ordering::SeqCst) + len;
        if total > self.full_after.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::StorageFull,
                "no space left on device",
            ));
        }
        Ok(())
    }
}

impl Read for FaultInjectingHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for FaultInjectingHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_write(buf.len() as u64)?;
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for FaultInjectingHandle {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl FileHandle for FaultInjectingHandle {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        self.inner.set_len(size)
    }
    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_fs_round_trip() {
        let fs = MemFileSystem::new();
        fs.create_dir_all(Path::new("/logs")).unwrap();
        {
            let mut handle = fs.open(Path::new("/logs/a.bin"), true).unwrap();
            handle.write_all(b"abc").unwrap();
        }
        assert_eq!(fs.read(Path::new("/logs/a.bin")).unwrap(), b"abc");
        assert_eq!(fs.read_dir(Path::new("/logs")).unwrap().len(), 1);
    }

    #[test]
    fn fault_injection_storage_full() {
        let fs = FaultInjectingFileSystem::new(Arc::new(MemFileSystem::new()));
        fs.set_full_after(4);
        let mut handle = fs.open(Path::new("/x"), true).unwrap();
        assert!(handle.write_all(b"1234").is_ok());
        assert!(handle.write_all(b"5").is_err());
    }
}
