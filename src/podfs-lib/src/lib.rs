mod codec;
mod config;
mod content_type;
mod feed_client;
mod memory_store;
mod meta;
mod path;
mod path_cache;
mod store;
mod topic;
mod worker_pool;

pub use codec::*;
pub use config::*;
pub use content_type::*;
pub use feed_client::*;
pub use memory_store::*;
pub use meta::*;
pub use path::*;
pub use path_cache::*;
pub use store::*;
pub use topic::*;
pub use worker_pool::*;

use thiserror::Error;

#[macro_use]
extern crate log;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PodFsError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("resource was deleted: {0}")]
    ResourceDeleted(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("length mismatch: {0}")]
    LengthMismatch(String),
    #[error("offset too large: {0}")]
    OffsetTooLarge(String),
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("timeout: {0}")]
    Timeout(String),
}

impl PodFsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PodFsError::NotFound(_))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, PodFsError::ResourceDeleted(_))
    }
}

pub type PodFsResult<T> = std::result::Result<T, PodFsError>;

impl From<std::io::Error> for PodFsError {
    fn from(err: std::io::Error) -> Self {
        PodFsError::IoError(err.to_string())
    }
}

impl From<PodFsError> for std::io::Error {
    fn from(err: PodFsError) -> Self {
        let kind = match &err {
            PodFsError::NotFound(_) | PodFsError::ResourceDeleted(_) => {
                std::io::ErrorKind::NotFound
            }
            PodFsError::InvalidParam(_) | PodFsError::OffsetTooLarge(_) => {
                std::io::ErrorKind::InvalidInput
            }
            PodFsError::Timeout(_) => std::io::ErrorKind::TimedOut,
            PodFsError::DecodeError(_) => std::io::ErrorKind::InvalidData,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err.to_string())
    }
}

/// Current wall-clock time as unix seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
