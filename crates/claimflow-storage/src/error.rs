//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Source Errors
//! - `SourceUnreadable`: The source file is missing or could not be streamed
//!
//! ### Chunk Errors
//! - `WriteFailed`: A chunk could not be persisted after retries
//! - `ReadFailed`: A chunk could not be fetched after retries
//!
//! ### Content Errors
//! - `Codec`: The header of a source or chunk is not a valid claim header
//!
//! ### Configuration Errors
//! - `InvalidConfig`: Storage configuration rejected by `validate()`
//!
//! All storage operations return `Result<T>`, aliased to `Result<T, Error>`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Source unreadable: {path}: {reason}")]
    SourceUnreadable { path: String, reason: String },

    #[error("Chunk write failed: {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Chunk read failed: {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] claimflow_core::Error),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}
