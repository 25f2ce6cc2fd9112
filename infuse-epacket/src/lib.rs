//! # Infuse ePacket
//!
//! The authenticated-encrypted frame shared by every Infuse transport, plus
//! the per-transport interface abstraction around it.
//!
//! A frame is associated data (type, flags, key identifier, upper device id,
//! optionally a version byte), a 12-byte nonce (lower device id, epoch
//! seconds, send sequence, fresh entropy), and ciphertext followed by a
//! 16-byte AEAD tag. The serial transport wraps the frame in a sync + length
//! header; datagram transports carry it bare.
//!
//! ## Architecture
//!
//! - **Framing**: fixed little-endian layouts in [`frame`].
//! - **Keys**: network/device key store with 24-bit CRC-derived identifiers
//!   in [`keys`].
//! - **Buffers**: owned, pool-homed packet buffers in [`pool`]; TX ownership
//!   passes to the transport on queue, RX ownership to the handler.
//! - **Interfaces**: registry, state callbacks, RX arming and the send path
//!   in [`interface`]; validated-receive classification in [`dispatch`].

pub mod bt;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod interface;
pub mod keys;
pub mod loopback;
pub mod pool;
pub mod serial;
pub mod udp;

pub use dispatch::{DefaultHandler, ReceiveHandler, RxMetadata};
pub use error::{EpacketError, Result};
pub use frame::{FrameFlags, FrameFormat, FrameInfo};
pub use interface::{
    Address, InterfaceConfig, InterfaceStats, ListenerHandle, PacketInterface, Transport, TxFrame,
};
pub use keys::{Auth, KeyScope, KeyStore};
pub use pool::{PacketBuf, PacketPool};
