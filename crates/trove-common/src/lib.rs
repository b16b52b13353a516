//! Trove Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the trove workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `TroveError` and the `Result` alias
//! - **Checksums**: SHA-256 digests used to detect already-loaded files
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: small value types shared between crates
//!
//! # Example
//!
//! ```no_run
//! use trove_common::checksum::compute_file_checksum;
//!
//! fn fingerprint(path: &str) -> trove_common::Result<String> {
//!     compute_file_checksum(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TroveError};
