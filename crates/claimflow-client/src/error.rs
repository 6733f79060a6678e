//! Error types for ClaimFlow client operations.
//!
//! ## Error Handling Strategy
//!
//! - **Retriable errors**: `Transport`, `Timeout` (retried with backoff at
//!   the publisher boundary)
//! - **Permanent errors**: `Rejected`, `InvalidPartition`, `RecordTooLarge`
//! - **Configuration errors**: `ConfigError`
//! - **Lower layers**: `Storage`, `Codec`
//!
//! Any error returned from [`EventPublisher::publish`](crate::EventPublisher::publish)
//! fails the whole chunk. Row-level decode failures never surface here; they
//! are counted in the publish report instead.

use thiserror::Error;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The stream transport is temporarily unavailable.
    #[error("Stream transport unavailable: {0}")]
    Transport(String),

    /// The stream transport did not answer in time.
    #[error("Stream transport timed out: {0}")]
    Timeout(String),

    /// The stream transport refused a batch and will keep refusing it.
    #[error("Batch rejected by stream transport: {0}")]
    Rejected(String),

    /// Partition id outside the transport's range.
    #[error("Partition {partition} does not exist (partition count: {partition_count})")]
    InvalidPartition { partition: u32, partition_count: u32 },

    /// A single message does not fit into an empty batch.
    #[error("Record of {size} bytes exceeds maximum batch size of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    /// Invalid publisher or transport configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] claimflow_storage::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] claimflow_core::Error),
}

impl ClientError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout(_))
    }
}
