//! ePacket frame layouts.
//!
//! All fields are little-endian. Two associated-data variants exist:
//!
//! ```text
//! versioned   (11 B): version | type | flags u16 | key_id u24 | device_upper u32
//! unversioned (10 B):           type | flags u16 | key_id u24 | device_upper u32
//! nonce       (12 B): device_lower u32 | epoch_seconds u32 | sequence u16 | entropy u16
//! ```
//!
//! The associated data and nonce are both covered by the AEAD tag. Which
//! variant an interface speaks is a fixed property of its transport.

use crate::error::{EpacketError, Result};
use bitflags::bitflags;
use infuse_proto::constants::{
    AD_LEN_UNVERSIONED, AD_LEN_VERSIONED, EPACKET_VERSION, NONCE_LEN, TAG_LEN,
};
use infuse_proto::{KeyId, Sequence};

bitflags! {
    /// Frame flag bits carried in the associated data.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u16 {
        /// Payload travels in the clear with no tag. Only key-id
        /// advertisements are accepted in this form.
        const UNENCRYPTED = 0x0001;
        /// The sender keeps its UDP socket open for unsolicited RX.
        const UDP_ALWAYS_RX = 0x0002;
    }
}

/// Frame shape spoken by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Leading version byte in the associated data.
    pub versioned: bool,
    /// Sync + length header before the frame (serial only).
    pub serial_header: bool,
}

impl FrameFormat {
    pub const SERIAL: FrameFormat = FrameFormat {
        versioned: false,
        serial_header: true,
    };
    pub const UDP: FrameFormat = FrameFormat {
        versioned: true,
        serial_header: false,
    };
    pub const BLUETOOTH: FrameFormat = FrameFormat {
        versioned: false,
        serial_header: false,
    };

    pub fn ad_len(self) -> usize {
        if self.versioned {
            AD_LEN_VERSIONED
        } else {
            AD_LEN_UNVERSIONED
        }
    }

    /// Worst-case bytes around the plaintext payload, excluding any serial
    /// header.
    pub fn overhead(self) -> usize {
        self.ad_len() + NONCE_LEN + TAG_LEN
    }
}

/// The nonce fields in struct form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NonceParts {
    pub device_lower: u32,
    pub epoch_seconds: u32,
    pub sequence: Sequence,
    pub entropy: u16,
}

impl NonceParts {
    pub fn to_bytes(self) -> [u8; NONCE_LEN] {
        let mut out = [0u8; NONCE_LEN];
        out[0..4].copy_from_slice(&self.device_lower.to_le_bytes());
        out[4..8].copy_from_slice(&self.epoch_seconds.to_le_bytes());
        out[8..10].copy_from_slice(&self.sequence.0.to_le_bytes());
        out[10..12].copy_from_slice(&self.entropy.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; NONCE_LEN]) -> Self {
        NonceParts {
            device_lower: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            epoch_seconds: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            sequence: Sequence(u16::from_le_bytes(bytes[8..10].try_into().unwrap())),
            entropy: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
        }
    }
}

/// Parsed or to-be-serialized frame header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Raw payload-type byte; customer values pass through untouched.
    pub payload_type: u8,
    pub flags: FrameFlags,
    pub key_id: KeyId,
    pub device_upper: u32,
    pub nonce: NonceParts,
}

impl FrameInfo {
    /// Serializes the associated data for `fmt`. Returns the buffer and the
    /// number of valid bytes.
    pub fn ad_bytes(&self, fmt: FrameFormat) -> ([u8; AD_LEN_VERSIONED], usize) {
        let mut out = [0u8; AD_LEN_VERSIONED];
        let mut at = 0;
        if fmt.versioned {
            out[at] = EPACKET_VERSION;
            at += 1;
        }
        out[at] = self.payload_type;
        out[at + 1..at + 3].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[at + 3..at + 6].copy_from_slice(&self.key_id.to_wire());
        out[at + 6..at + 10].copy_from_slice(&self.device_upper.to_le_bytes());
        (out, at + 10)
    }
}

/// A frame split into its header fields and payload location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame {
    pub info: FrameInfo,
    /// Byte range of the ciphertext (or cleartext) within the wire slice,
    /// excluding the tag.
    pub payload_start: usize,
    pub payload_end: usize,
    /// Absent only on unencrypted frames.
    pub has_tag: bool,
}

impl ParsedFrame {
    pub fn payload_len(&self) -> usize {
        self.payload_end - self.payload_start
    }
}

/// Splits `wire` into header fields and payload range for `fmt`.
pub fn parse(fmt: FrameFormat, wire: &[u8]) -> Result<ParsedFrame> {
    let ad_len = fmt.ad_len();
    if wire.len() < ad_len + NONCE_LEN {
        return Err(EpacketError::Malformed("frame shorter than header"));
    }

    let mut at = 0;
    if fmt.versioned {
        if wire[0] != EPACKET_VERSION {
            return Err(EpacketError::Malformed("unsupported version"));
        }
        at = 1;
    }

    let payload_type = wire[at];
    let flags = FrameFlags::from_bits_retain(u16::from_le_bytes(
        wire[at + 1..at + 3].try_into().unwrap(),
    ));
    let key_id = KeyId::from_wire(wire[at + 3..at + 6].try_into().unwrap());
    let device_upper = u32::from_le_bytes(wire[at + 6..at + 10].try_into().unwrap());
    let nonce = NonceParts::from_bytes(wire[ad_len..ad_len + NONCE_LEN].try_into().unwrap());

    let has_tag = !flags.contains(FrameFlags::UNENCRYPTED);
    let payload_start = ad_len + NONCE_LEN;
    let payload_end = if has_tag {
        if wire.len() < payload_start + TAG_LEN {
            return Err(EpacketError::Malformed("frame shorter than tag"));
        }
        wire.len() - TAG_LEN
    } else {
        wire.len()
    };

    Ok(ParsedFrame {
        info: FrameInfo {
            payload_type,
            flags,
            key_id,
            device_upper,
            nonce,
        },
        payload_start,
        payload_end,
        has_tag,
    })
}
