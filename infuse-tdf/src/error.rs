use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TdfError {
    /// The record can never fit a block of the target logger.
    #[error("record of {record} bytes exceeds block capacity of {capacity}")]
    RecordTooLarge { record: usize, capacity: usize },
    #[error("invalid record: {0}")]
    InvalidRecord(&'static str),
    #[error("bad block: {0}")]
    BadBlock(&'static str),
    /// The backend does not implement this optional operation.
    #[error("not supported by this backend")]
    NotSupported,
    /// A backend write failed; the logger will not retry indefinitely.
    #[error("persist failure: {0}")]
    PersistFailure(String),
    #[error("no logger registered for mask bit {0}")]
    UnknownLogger(u8),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("packet error: {0}")]
    Epacket(#[from] infuse_epacket::EpacketError),
}

pub type Result<T> = std::result::Result<T, TdfError>;
