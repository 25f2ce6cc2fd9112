//! # Infuse Proto
//!
//! Shared value types for the Infuse telemetry stack: identifiers, payload
//! classification, the fixed-point epoch clock representation, blocking
//! deadlines, and the tick source abstraction.
//!
//! Everything here is a leaf: no transport, storage, or scheduling logic.

pub mod constants;
pub mod deadline;
pub mod epoch;
pub mod time;

pub use deadline::Deadline;
pub use epoch::{EpochSource, EpochTime, FixedEpoch, TimeSource};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};

macro_rules! infuse_newtype {
    ($name:ident, $inner:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            fn from(val: $inner) -> Self {
                $name(val)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

infuse_newtype!(
    DeviceId,
    u64,
    "Globally unique device identifier. The upper four bytes travel in the \
     frame associated data, the lower four in the nonce."
);

impl DeviceId {
    pub fn upper(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn lower(self) -> u32 {
        self.0 as u32
    }

    pub fn from_halves(upper: u32, lower: u32) -> Self {
        DeviceId(((upper as u64) << 32) | lower as u64)
    }
}

infuse_newtype!(
    KeyId,
    u32,
    "24-bit key identifier derived from key material; names which AEAD key \
     protects a frame."
);

impl KeyId {
    pub const MASK: u32 = 0x00ff_ffff;

    pub fn new(raw: u32) -> Self {
        KeyId(raw & Self::MASK)
    }

    pub fn to_wire(self) -> [u8; 3] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    pub fn from_wire(bytes: [u8; 3]) -> Self {
        KeyId(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }
}

infuse_newtype!(
    TdfId,
    u16,
    "Tagged Data Format record identifier (14-bit). Id 0 terminates a block."
);

impl TdfId {
    pub const MASK: u16 = 0x3fff;
    /// Reserved terminator written into block padding.
    pub const TERMINATOR: TdfId = TdfId(0);

    pub fn new(raw: u16) -> Self {
        TdfId(raw & Self::MASK)
    }
}

infuse_newtype!(
    Sequence,
    u16,
    "Per-interface monotonic send sequence number."
);

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0.wrapping_add(1))
    }
}

infuse_newtype!(
    InterfaceId,
    u8,
    "Index of a registered packet interface."
);

/// Classifies the plaintext carried by a frame.
///
/// Values below 128 are reserved for Infuse; 128 and above are
/// customer-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// A committed TDF data-logger block.
    Tdf,
    EchoReq,
    EchoRsp,
    RpcCmd,
    RpcData,
    RpcRsp,
    RpcDataAck,
    /// Unencrypted advertisement of the sender's current key identifiers.
    KeyIds,
    Custom(u8),
}

impl PayloadType {
    pub fn to_wire(self) -> u8 {
        match self {
            PayloadType::Tdf => 0,
            PayloadType::EchoReq => 1,
            PayloadType::EchoRsp => 2,
            PayloadType::RpcCmd => 3,
            PayloadType::RpcData => 4,
            PayloadType::RpcRsp => 5,
            PayloadType::RpcDataAck => 6,
            PayloadType::KeyIds => 7,
            PayloadType::Custom(v) => v,
        }
    }

    /// Returns `None` for reserved Infuse values that this build does not
    /// understand.
    pub fn from_wire(val: u8) -> Option<Self> {
        match val {
            0 => Some(PayloadType::Tdf),
            1 => Some(PayloadType::EchoReq),
            2 => Some(PayloadType::EchoRsp),
            3 => Some(PayloadType::RpcCmd),
            4 => Some(PayloadType::RpcData),
            5 => Some(PayloadType::RpcRsp),
            6 => Some(PayloadType::RpcDataAck),
            7 => Some(PayloadType::KeyIds),
            v if v >= constants::PAYLOAD_TYPE_CUSTOM_BASE => Some(PayloadType::Custom(v)),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadType::Custom(v) => write!(f, "Custom({v})"),
            other => write!(f, "{other:?}"),
        }
    }
}
