//! Error types for fanin-state

use thiserror::Error;

/// Errors raised by timeline stores and snapshot lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Pipeline name was empty or whitespace.
    #[error("Pipeline name must not be empty")]
    EmptyPipelineName,

    /// The same stage was reported twice for one instance.
    #[error("Duplicate stage '{stage}' in instance of {pipeline}")]
    DuplicateStage { pipeline: String, stage: String },

    /// Fingerprint was not a 64-char hex digest.
    #[error("Invalid fingerprint: {fingerprint}")]
    InvalidFingerprint { fingerprint: String },

    /// Backend failure (lock poisoning, I/O, remote store).
    #[error("Timeline backend failure: {0}")]
    Backend(String),
}
