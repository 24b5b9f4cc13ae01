//! Error type shared by the library and the binary.
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A record failed a required-field or range check before reaching the store.
    #[error("Validation failed for '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    /// An import aborted at the first structurally invalid record.
    #[error("Invalid measurement at index {index}: {reason}")]
    MalformedImport { index: usize, reason: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
}

impl Error {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }
}
