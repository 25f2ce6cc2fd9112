//! TDF record encoding.
//!
//! Wire layout, little-endian:
//!
//! ```text
//! u16  tdf_id:14 | time_mode:2
//! u8   sample_count (6-bit, 1..=63; upper bits reserved zero)
//! [u64 timestamp]      time_mode != None
//! [u24 period]         time_mode == Array
//! sample_count × elem  fixed-size payload identified by tdf_id
//! ```
//!
//! The element size is not on the wire; readers resolve it from the id, so
//! `encoded size = header_size(mode) + sample_count × elem_len` always
//! holds.

use crate::error::{Result, TdfError};
use infuse_proto::{EpochTime, TdfId};

/// Header bytes before any time fields.
pub const TDF_HEADER_BASE_LEN: usize = 3;
/// Largest encodable sample count (6-bit field).
pub const MAX_SAMPLE_COUNT: u8 = 63;
/// Largest encodable array period (24-bit, in 1/65536 s units).
pub const MAX_PERIOD: u32 = 0x00ff_ffff;

const MODE_NONE: u16 = 0;
const MODE_ABSOLUTE: u16 = 1;
const MODE_ARRAY: u16 = 2;
const MODE_DIFF: u16 = 3;

/// Time annotation of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdfTime {
    /// No timestamp; the reader falls back to block ordering.
    None,
    /// One timestamp covering every sample.
    Absolute(EpochTime),
    /// Uniformly spaced samples: sample `i` occurred at
    /// `base + i × period` (period in 1/65536 s units).
    Array { base: EpochTime, period: u32 },
    /// Timestamp plus payload-level diff encoding. The codec carries the
    /// bytes opaquely; expansion is the reader's concern.
    Diff(EpochTime),
}

impl TdfTime {
    fn mode(self) -> u16 {
        match self {
            TdfTime::None => MODE_NONE,
            TdfTime::Absolute(_) => MODE_ABSOLUTE,
            TdfTime::Array { .. } => MODE_ARRAY,
            TdfTime::Diff(_) => MODE_DIFF,
        }
    }

    fn encoded_len(self) -> usize {
        match self {
            TdfTime::None => 0,
            TdfTime::Absolute(_) | TdfTime::Diff(_) => 8,
            TdfTime::Array { .. } => 11,
        }
    }
}

/// One TDF record, borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdfRecord<'a> {
    pub id: TdfId,
    pub time: TdfTime,
    pub sample_count: u8,
    pub payload: &'a [u8],
}

impl<'a> TdfRecord<'a> {
    /// A single-sample record.
    pub fn single(id: TdfId, time: TdfTime, payload: &'a [u8]) -> Self {
        TdfRecord {
            id,
            time,
            sample_count: 1,
            payload,
        }
    }

    pub fn elem_len(&self) -> usize {
        self.payload.len() / self.sample_count as usize
    }

    pub fn encoded_len(&self) -> usize {
        TDF_HEADER_BASE_LEN + self.time.encoded_len() + self.payload.len()
    }

    /// Timestamp of sample `i`, when the record carries time.
    pub fn sample_time(&self, i: u8) -> Option<EpochTime> {
        match self.time {
            TdfTime::None => None,
            TdfTime::Absolute(t) | TdfTime::Diff(t) => Some(t),
            TdfTime::Array { base, period } => Some(EpochTime::from_raw(
                base.raw() + period as u64 * i as u64,
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id == TdfId::TERMINATOR || self.id.0 > TdfId::MASK {
            return Err(TdfError::InvalidRecord("reserved tdf id"));
        }
        if self.sample_count == 0 || self.sample_count > MAX_SAMPLE_COUNT {
            return Err(TdfError::InvalidRecord("sample count out of range"));
        }
        if self.payload.is_empty()
            || self.payload.len() % self.sample_count as usize != 0
        {
            return Err(TdfError::InvalidRecord("payload not a sample multiple"));
        }
        if let TdfTime::Array { period, .. } = self.time {
            if period > MAX_PERIOD {
                return Err(TdfError::InvalidRecord("period exceeds 24 bits"));
            }
        }
        Ok(())
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        self.validate()?;
        let word = (self.id.0 & TdfId::MASK) | (self.time.mode() << 14);
        out.extend_from_slice(&word.to_le_bytes());
        out.push(self.sample_count);
        match self.time {
            TdfTime::None => {}
            TdfTime::Absolute(t) | TdfTime::Diff(t) => {
                out.extend_from_slice(&t.raw().to_le_bytes());
            }
            TdfTime::Array { base, period } => {
                out.extend_from_slice(&base.raw().to_le_bytes());
                out.extend_from_slice(&period.to_le_bytes()[..3]);
            }
        }
        out.extend_from_slice(self.payload);
        Ok(())
    }

    /// Decodes one record from the front of `bytes`.
    ///
    /// `elem_len_of` resolves the fixed payload size of an id; ids it does
    /// not know make the stream undecodable from this point.
    pub fn decode(
        bytes: &'a [u8],
        elem_len_of: &dyn Fn(TdfId) -> Option<usize>,
    ) -> Result<(Self, usize)> {
        if bytes.len() < TDF_HEADER_BASE_LEN {
            return Err(TdfError::InvalidRecord("truncated header"));
        }
        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
        let id = TdfId(word & TdfId::MASK);
        if id == TdfId::TERMINATOR {
            return Err(TdfError::InvalidRecord("terminator"));
        }
        let mode = word >> 14;
        if bytes[2] & !MAX_SAMPLE_COUNT != 0 {
            return Err(TdfError::InvalidRecord("reserved count bits set"));
        }
        let sample_count = bytes[2] & MAX_SAMPLE_COUNT;
        if sample_count == 0 {
            return Err(TdfError::InvalidRecord("zero sample count"));
        }

        let mut at = TDF_HEADER_BASE_LEN;
        let read_u64 = |at: usize| -> Result<u64> {
            bytes
                .get(at..at + 8)
                .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
                .ok_or(TdfError::InvalidRecord("truncated timestamp"))
        };
        let time = match mode {
            MODE_NONE => TdfTime::None,
            MODE_ABSOLUTE => {
                let t = TdfTime::Absolute(EpochTime::from_raw(read_u64(at)?));
                at += 8;
                t
            }
            MODE_ARRAY => {
                let base = EpochTime::from_raw(read_u64(at)?);
                at += 8;
                let p = bytes
                    .get(at..at + 3)
                    .ok_or(TdfError::InvalidRecord("truncated period"))?;
                at += 3;
                TdfTime::Array {
                    base,
                    period: u32::from_le_bytes([p[0], p[1], p[2], 0]),
                }
            }
            _ => {
                let t = TdfTime::Diff(EpochTime::from_raw(read_u64(at)?));
                at += 8;
                t
            }
        };

        let elem_len = elem_len_of(id).ok_or(TdfError::InvalidRecord("unknown tdf id"))?;
        let payload_len = elem_len * sample_count as usize;
        let payload = bytes
            .get(at..at + payload_len)
            .ok_or(TdfError::InvalidRecord("truncated payload"))?;

        Ok((
            TdfRecord {
                id,
                time,
                sample_count,
                payload,
            },
            at + payload_len,
        ))
    }
}
