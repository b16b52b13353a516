//! Error types shared across trove crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, TroveError>;

/// Base error type for trove
#[derive(Error, Debug)]
pub enum TroveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
