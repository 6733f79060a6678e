//! ClaimFlow Agent - Stream Consumers and Entity Actors
//!
//! This crate is the consuming side of the claims stream.
//!
//! ## Architecture
//!
//! ```text
//!  StreamTransport (partitions 0..N)
//!        │ fetch from checkpoint
//!        ▼
//!  ConsumerHost ── one PartitionConsumer per partition, created lazily
//!        │ decode ClaimEvent → EntityUpdate
//!        ▼
//!  ActorRegistry ── one EntityActor per entity, created lazily
//!        │ serialized merge, write-through
//!        ▼
//!  MetadataStore (entity_states, consumer_checkpoints)
//! ```
//!
//! ## Components
//!
//! - **EntityActor**: Single writer of one entity's state
//! - **ActorRegistry**: Concurrent map from entity id to actor
//! - **PartitionConsumer**: Decodes and forwards the messages of one partition
//! - **ConsumerHost**: Pumps partitions and commits checkpoints
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use claimflow_agent::{ActorRegistry, ConsumerConfig, ConsumerHost};
//! use claimflow_client::{InMemoryTransport, RetryPolicy};
//! use claimflow_metadata::{MetadataStore, SqliteMetadataStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new_in_memory().await?);
//! let registry = Arc::new(ActorRegistry::new(store.clone()));
//! let host = ConsumerHost::new(
//!     Arc::new(InMemoryTransport::new(32)),
//!     store,
//!     registry,
//!     ConsumerConfig::default(),
//! );
//!
//! // Apply everything published so far
//! host.drain(&RetryPolicy::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod consumer;
pub mod error;

pub use actor::{
    ActorRegistry, ApplyOutcome, EntityActorHandle, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAILBOX_CAPACITY,
};
pub use consumer::{ConsumerConfig, ConsumerHost, Delivery, PartitionConsumer, PumpOutcome};
pub use error::{AgentError, Result};
