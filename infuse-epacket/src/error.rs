use infuse_proto::KeyId;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EpacketError {
    /// The interface buffer pool was exhausted within the allowed wait.
    #[error("no packet buffer available")]
    NoBuffer,
    /// The transport is not ready to carry frames.
    #[error("interface down")]
    InterfaceDown,
    /// AEAD tag verification failed.
    #[error("frame failed authentication")]
    Unauthenticated,
    /// No key with the frame's identifier is loaded.
    #[error("unknown key id {0}")]
    UnknownKey(KeyId),
    /// The framing layer rejected the bytes before decryption.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    /// A bounded wait elapsed.
    #[error("timed out")]
    Timeout,
    /// Payload larger than the transport can carry.
    #[error("payload of {got} bytes exceeds interface maximum of {max}")]
    PayloadTooLarge { got: usize, max: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, EpacketError>;
