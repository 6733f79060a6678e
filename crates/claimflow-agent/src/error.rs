//! Error types for the ClaimFlow agent

use claimflow_client::{ClientError, Retryable};
use claimflow_core::EntityId;
use claimflow_metadata::MetadataError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Entity actor {0} stopped")]
    ActorStopped(EntityId),

    #[error("Update for entity {actual} sent to actor of {expected}")]
    EntityMismatch { expected: EntityId, actual: EntityId },

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Stream error: {0}")]
    Stream(#[from] ClientError),

    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Retryable for AgentError {
    /// A stopped actor is respawned by the registry on the next call.
    fn is_retryable(&self) -> bool {
        match self {
            AgentError::ActorStopped(_) => true,
            AgentError::Metadata(e) => e.is_retryable(),
            AgentError::Stream(e) => e.is_retryable(),
            AgentError::EntityMismatch { .. } | AgentError::Join(_) => false,
        }
    }
}
