//! Error types for the keyed store.

use thiserror::Error;

/// Main error type for store operations.
///
/// Absence of a record is never an error: single-key reads return the
/// value's absence marker and bulk reads return an empty list.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Duplicate key {key} in table {table}")]
    DuplicateKey { table: String, key: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Subscription closed")]
    SubscriptionClosed,
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
