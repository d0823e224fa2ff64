//! Error types for the list store.

use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid view configuration: {0}")]
    Configuration(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    #[error("Store is unusable: {0}")]
    Unusable(ObservationError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Terminal failure delivered to subscribers once the store can no longer
/// be trusted. Subscribers must resubscribe after the store is reopened.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ObservationError {
    #[error("journal corrupted: {0}")]
    Corruption(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
