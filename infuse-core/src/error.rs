use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("watchdog already started")]
    WatchdogStarted,
    #[error("no task registered for task id {0}")]
    UnknownTask(u16),
    #[error("runner already iterating")]
    AlreadyIterating,
    #[error("kv store corrupt: {0}")]
    KvCorrupt(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
