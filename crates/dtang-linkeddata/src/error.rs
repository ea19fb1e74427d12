//! # error
//!
//! why: give signing and key handling a single failure type
//! relations: returned by signature.rs, keys.rs, did_document.rs, capability.rs
//! what: LinkedDataError

use thiserror::Error;

/// failures raised while producing linked-data structures
///
/// verification never returns these; a failed check is a `false`.
#[derive(Debug, Error)]
pub enum LinkedDataError {
    /// the signable has no proof envelope to fill in
    #[error("signable has no proof")]
    MissingProof,

    /// the operating system could not supply randomness
    #[error("randomness unavailable: {0}")]
    Randomness(#[from] rand::Error),

    /// a base58 key string did not decode into key material
    #[error("invalid key encoding: {0}")]
    InvalidKey(String),

    /// the structure could not be turned into canonical json
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LinkedDataError>;
