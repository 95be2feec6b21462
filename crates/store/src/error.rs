//! Store error types

use thiserror::Error;

/// Store result type
pub type Result<T> = std::result::Result<T, Error>;

/// Store errors
///
/// A transaction whose optimistic precondition failed is NOT an error;
/// that outcome is reported through `TxnOutcome`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected at {0}")]
    WriteRejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
