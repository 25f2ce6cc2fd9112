//! Block framing for the data logger.
//!
//! Every committed block starts with an 8-byte header:
//!
//! ```text
//! u32  block index (low 32 bits of the logger's 64-bit counter)
//! u16  record byte count
//! u16  CRC-32/ISO-HDLC of the record bytes, truncated
//! ```
//!
//! Records follow back to back; a zero tdf-id terminator and zero fill pad
//! the block out to its fixed size. A record never spans two blocks.

use crate::codec::TdfRecord;
use crate::error::{Result, TdfError};
use infuse_proto::TdfId;

pub const BLOCK_HEADER_LEN: usize = 8;

const BLOCK_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Accumulates records for one block.
#[derive(Debug)]
pub struct BlockBuilder {
    buf: Vec<u8>,
    block_size: usize,
    index: u64,
    records: usize,
}

impl BlockBuilder {
    pub fn new(block_size: usize, index: u64) -> Self {
        assert!(block_size > BLOCK_HEADER_LEN + 2, "block size too small");
        let mut buf = Vec::with_capacity(block_size);
        buf.resize(BLOCK_HEADER_LEN, 0);
        BlockBuilder {
            buf,
            block_size,
            index,
            records: 0,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Record bytes that still fit.
    pub fn remaining(&self) -> usize {
        self.block_size - self.buf.len()
    }

    /// Record capacity of an empty block.
    pub fn capacity(block_size: usize) -> usize {
        block_size - BLOCK_HEADER_LEN
    }

    /// Appends an already-validated record.
    pub fn append(&mut self, record: &TdfRecord<'_>) -> Result<()> {
        if record.encoded_len() > self.remaining() {
            return Err(TdfError::RecordTooLarge {
                record: record.encoded_len(),
                capacity: self.remaining(),
            });
        }
        record.encode_into(&mut self.buf)?;
        self.records += 1;
        Ok(())
    }

    /// Finalizes: terminator, zero fill, header. Returns the block image.
    pub fn seal(self) -> Vec<u8> {
        let mut buf = self.buf;
        let data_len = buf.len() - BLOCK_HEADER_LEN;
        if buf.len() + 2 <= self.block_size {
            buf.extend_from_slice(&TdfId::TERMINATOR.0.to_le_bytes());
        }
        buf.resize(self.block_size, 0);

        let crc = BLOCK_CRC.checksum(&buf[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + data_len]) as u16;
        buf[0..4].copy_from_slice(&(self.index as u32).to_le_bytes());
        buf[4..6].copy_from_slice(&(data_len as u16).to_le_bytes());
        buf[6..8].copy_from_slice(&crc.to_le_bytes());
        buf
    }
}

/// A validated block image.
#[derive(Debug, Clone, Copy)]
pub struct ParsedBlock<'a> {
    pub index_low: u32,
    data: &'a [u8],
}

impl<'a> ParsedBlock<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Decodes the contained records in storage order.
    pub fn records(
        &self,
        elem_len_of: &dyn Fn(TdfId) -> Option<usize>,
    ) -> Result<Vec<TdfRecord<'a>>> {
        let mut out = Vec::new();
        let mut at = 0;
        while at < self.data.len() {
            let (record, used) = TdfRecord::decode(&self.data[at..], elem_len_of)?;
            out.push(record);
            at += used;
        }
        Ok(out)
    }
}

/// Validates header, length, and CRC of a stored block.
pub fn parse_block(bytes: &[u8]) -> Result<ParsedBlock<'_>> {
    if bytes.len() <= BLOCK_HEADER_LEN {
        return Err(TdfError::BadBlock("shorter than header"));
    }
    let index_low = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let data_len = u16::from_le_bytes(bytes[4..6].try_into().unwrap()) as usize;
    let crc = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
    let data = bytes
        .get(BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + data_len)
        .ok_or(TdfError::BadBlock("length exceeds block"))?;
    if BLOCK_CRC.checksum(data) as u16 != crc {
        return Err(TdfError::BadBlock("crc mismatch"));
    }
    Ok(ParsedBlock { index_low, data })
}
