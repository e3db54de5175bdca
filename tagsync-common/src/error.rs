//! Common error types for TagSync

use thiserror::Error;

/// Common result type for TagSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across TagSync crates
///
/// Every Local Store read or write reports failures through this type.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (for example an empty store key)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
