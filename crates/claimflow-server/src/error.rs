//! Error types for the run coordinator and pipeline

use claimflow_agent::AgentError;
use claimflow_client::{ClientError, Retryable};
use claimflow_metadata::MetadataError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Invalid pipeline configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    /// The run was cancelled; it stays resumable
    #[error("Run {run_id} cancelled")]
    Cancelled { run_id: i64 },

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Storage error: {0}")]
    Storage(#[from] claimflow_storage::Error),

    #[error("Stream error: {0}")]
    Client(#[from] ClientError),

    #[error("Consumer error: {0}")]
    Agent(#[from] AgentError),
}

impl Retryable for CoordinatorError {
    fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::Metadata(e) => e.is_retryable(),
            CoordinatorError::Client(e) => e.is_retryable(),
            CoordinatorError::Agent(e) => e.is_retryable(),
            _ => false,
        }
    }
}
