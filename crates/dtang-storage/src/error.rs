//! # error
//!
//! why: persistence and bootstrap failures are returned, never panicked on
//! relations: returned by lib.rs stores and bootstrap.rs
//! what: StorageError

use dtang_linkeddata::LinkedDataError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    LinkedData(#[from] LinkedDataError),

    /// names become file names and may not contain separators
    #[error("invalid record name {0:?}")]
    InvalidName(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("stored identity {0} is inconsistent: {1}")]
    Corrupt(String, String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
