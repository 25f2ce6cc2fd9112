//! Logger backend sinks.
//!
//! A backend receives sealed block images keyed by the logger's 64-bit
//! block counter. Read-back and erase are optional: a streaming sink like
//! the ePacket backend has no retention at all.

use crate::error::{Result, TdfError};
use crate::vfs::FileSystem;
use infuse_epacket::{Address, FrameFlags, KeyScope, PacketInterface};
use infuse_proto::{Deadline, PayloadType};
use std::path::PathBuf;
use std::sync::Arc;

pub trait LogBackend: Send {
    fn name(&self) -> &'static str;
    fn block_size(&self) -> usize;
    /// Erase granularity in blocks. 1 for anything that is not raw flash.
    fn erase_unit(&self) -> u64 {
        1
    }
    fn requires_full_block_write(&self) -> bool;
    /// Whether `flush` must wait for the commit worker to drain.
    fn sync_required(&self) -> bool;
    /// Distinct storage slots; streaming sinks report `u64::MAX`.
    fn physical_blocks(&self) -> u64;
    /// Logical indices retrievable at any moment. Equal to the physical
    /// count for wrap-around stores, unbounded for growing ones.
    fn logical_blocks(&self) -> u64 {
        self.physical_blocks()
    }

    fn block_write(&mut self, index: u64, bytes: &[u8]) -> Result<()>;

    fn block_read(&mut self, _index: u64, _offset: usize, _buf: &mut [u8]) -> Result<()> {
        Err(TdfError::NotSupported)
    }

    fn block_erase(&mut self, _start: u64, _count: u64) -> Result<()> {
        Err(TdfError::NotSupported)
    }
}

/// Wrap-around RAM region standing in for raw flash: the oldest block is
/// overwritten once the region is full, and writes landing on an erase-unit
/// boundary erase the whole unit first.
pub struct RamFlashBackend {
    region: Vec<u8>,
    block_size: usize,
    physical: u64,
    erase_unit: u64,
}

impl RamFlashBackend {
    pub fn new(block_size: usize, physical_blocks: u64, erase_unit: u64) -> Self {
        assert!(erase_unit >= 1 && physical_blocks % erase_unit == 0);
        RamFlashBackend {
            region: vec![0xff; block_size * physical_blocks as usize],
            block_size,
            physical: physical_blocks,
            erase_unit,
        }
    }

    fn offset(&self, index: u64) -> usize {
        (index % self.physical) as usize * self.block_size
    }
}

impl LogBackend for RamFlashBackend {
    fn name(&self) -> &'static str {
        "ram_flash"
    }
    fn block_size(&self) -> usize {
        self.block_size
    }
    fn erase_unit(&self) -> u64 {
        self.erase_unit
    }
    fn requires_full_block_write(&self) -> bool {
        true
    }
    fn sync_required(&self) -> bool {
        false
    }
    fn physical_blocks(&self) -> u64 {
        self.physical
    }

    fn block_write(&mut self, index: u64, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.block_size {
            return Err(TdfError::BadBlock("partial write to flash backend"));
        }
        let slot = index % self.physical;
        if slot % self.erase_unit == 0 {
            let start = self.offset(index);
            let unit_bytes = self.erase_unit as usize * self.block_size;
            self.region[start..start + unit_bytes].fill(0xff);
        }
        let at = self.offset(index);
        self.region[at..at + self.block_size].copy_from_slice(bytes);
        Ok(())
    }

    fn block_read(&mut self, index: u64, offset: usize, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() > self.block_size {
            return Err(TdfError::BadBlock("read past block end"));
        }
        let at = self.offset(index) + offset;
        buf.copy_from_slice(&self.region[at..at + buf.len()]);
        Ok(())
    }

    fn block_erase(&mut self, start: u64, count: u64) -> Result<()> {
        for index in start..start + count {
            let at = self.offset(index);
            self.region[at..at + self.block_size].fill(0xff);
        }
        Ok(())
    }
}

/// Block-range-named files under one directory (exFAT card in firmware,
/// anything the [`FileSystem`] seam provides in hosted builds).
pub struct FileBackend {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    block_size: usize,
    blocks_per_file: u64,
}

impl FileBackend {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        dir: impl Into<PathBuf>,
        block_size: usize,
        blocks_per_file: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        fs.create_dir_all(&dir)?;
        Ok(FileBackend {
            fs,
            dir,
            block_size,
            blocks_per_file,
        })
    }

    fn file_for(&self, index: u64) -> PathBuf {
        let start = index / self.blocks_per_file * self.blocks_per_file;
        let end = start + self.blocks_per_file - 1;
        self.dir.join(format!("{start:08x}-{end:08x}.tdf"))
    }

    fn offset_in_file(&self, index: u64) -> u64 {
        (index % self.blocks_per_file) * self.block_size as u64
    }
}

impl LogBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }
    fn block_size(&self) -> usize {
        self.block_size
    }
    fn requires_full_block_write(&self) -> bool {
        false
    }
    fn sync_required(&self) -> bool {
        true
    }
    fn physical_blocks(&self) -> u64 {
        u64::MAX
    }

    fn block_write(&mut self, index: u64, bytes: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let path = self.file_for(index);
        let mut handle = self.fs.open(&path, true)?;
        handle.seek(SeekFrom::Start(self.offset_in_file(index)))?;
        handle.write_all(bytes)?;
        handle.flush()?;
        Ok(())
    }

    fn block_read(&mut self, index: u64, offset: usize, buf: &mut [u8]) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        if offset + buf.len() > self.block_size {
            return Err(TdfError::BadBlock("read past block end"));
        }
        let path = self.file_for(index);
        let mut handle = self.fs.open(&path, false)?;
        handle.seek(SeekFrom::Start(self.offset_in_file(index) + offset as u64))?;
        handle.read_exact(buf)?;
        Ok(())
    }
}

/// Streams each committed block as one TDF frame on a packet interface.
/// No retention: read-back is unsupported by construction.
pub struct EpacketBackend {
    interface: Arc<PacketInterface>,
    auth: KeyScope,
    block_size: usize,
}

impl EpacketBackend {
    /// `block_size` must fit the interface payload; the logger sizes its
    /// blocks from this value.
    pub fn new(interface: Arc<PacketInterface>, auth: KeyScope, block_size: usize) -> Self {
        EpacketBackend {
            interface,
            auth,
            block_size,
        }
    }
}

impl LogBackend for EpacketBackend {
    fn name(&self) -> &'static str {
        "epacket"
    }
    fn block_size(&self) -> usize {
        self.block_size
    }
    fn requires_full_block_write(&self) -> bool {
        false
    }
    fn sync_required(&self) -> bool {
        false
    }
    fn physical_blocks(&self) -> u64 {
        u64::MAX
    }

    fn block_write(&mut self, _index: u64, bytes: &[u8]) -> Result<()> {
        let mut frame = self.interface.alloc_tx(Deadline::NoWait)?;
        frame.set_metadata(
            self.auth,
            FrameFlags::empty(),
            PayloadType::Tdf,
            Address::Broadcast,
        );
        frame.append(bytes)?;
        self.interface.queue(frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemFileSystem;

    #[test]
    fn ram_flash_wraps_and_reads_back() {
        let mut flash = RamFlashBackend::new(16, 4, 2);
        for index in 0..6u64 {
            let block = vec![index as u8; 16];
            flash.block_write(index, &block).unwrap();
        }
        // Blocks 4 and 5 overwrote slots 0 and 1.
        let mut buf = [0u8; 16];
        flash.block_read(4, 0, &mut buf).unwrap();
        assert_eq!(buf, [4u8; 16]);
        flash.block_read(5, 0, &mut buf).unwrap();
        assert_eq!(buf, [5u8; 16]);
    }

    #[test]
    fn file_backend_names_by_block_range() {
        let fs = Arc::new(MemFileSystem::new());
        let mut backend = FileBackend::new(fs.clone(), "/logs", 8, 4).unwrap();
        backend.block_write(0, &[1; 8]).unwrap();
        backend.block_write(5, &[2; 8]).unwrap();
        assert!(fs.exists(std::path::Path::new("/logs/00000000-00000003.tdf")));
        assert!(fs.exists(std::path::Path::new("/logs/00000004-00000007.tdf")));

        let mut buf = [0u8; 8];
        backend.block_read(5, 0, &mut buf).unwrap();
        assert_eq!(buf, [2; 8]);
    }
}
