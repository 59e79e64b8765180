//! Error taxonomy for frame ingestion
//!
//! Every pipeline error is locally recovered: the offending frame is dropped,
//! a diagnostic is logged and the worker moves on to the next frame.

use thiserror::Error;

/// Frame could not be turned into a JSON object
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame carries no JSON payload")]
    NoPayload,

    #[error("malformed JSON payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encrypted envelope could not be opened
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("invalid IV: {0}")]
    InvalidIv(String),

    #[error("invalid ciphertext encoding: {0}")]
    InvalidCiphertextEncoding(String),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("decrypted payload is not JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Decoded event matched none of the known shapes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized event shape (code: {code:?})")]
pub struct ClassificationMiss {
    pub code: Option<i64>,
}

/// Persistence Gateway read/write failure
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Umbrella error returned by `PipelineEngine::process_frame`
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    ClassificationMiss(#[from] ClassificationMiss),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
