//! Error Types for ClaimFlow Core
//!
//! This module defines the errors raised while decoding and encoding claim data.
//!
//! ## Error Categories
//!
//! ### Header Errors
//! - `EmptySource`: The input has no header row at all
//! - `MissingColumn`: A required column is absent from the header
//!
//! ### Row Errors
//! - `FieldCount`: Row has a different number of fields than the header
//! - `InvalidField`: A typed field (UUID, amount, timestamp) failed to parse
//! - `UnterminatedQuote`: A quoted field was never closed
//! - `InvalidEncoding`: The row bytes are not valid UTF-8
//!
//! ### Wire Errors
//! - `Json`: Claim event payload could not be (de)serialized
//!
//! ### Routing Errors
//! - `InvalidPartitionCount`: Partition count of zero
//!
//! Row errors are recoverable: callers skip the row and count it as failed.
//! Header and routing errors abort whatever unit of work they occur in.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Source has no header row")]
    EmptySource,

    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),

    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Invalid value for {column}: '{value}'")]
    InvalidField { column: &'static str, value: String },

    #[error("Unterminated quoted field")]
    UnterminatedQuote,

    #[error("Row is not valid UTF-8 (invalid byte at offset {offset})")]
    InvalidEncoding { offset: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Partition count must be greater than zero")]
    InvalidPartitionCount,
}

impl Error {
    /// True for errors confined to a single row.
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            Error::FieldCount { .. }
                | Error::InvalidField { .. }
                | Error::UnterminatedQuote
                | Error::InvalidEncoding { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
