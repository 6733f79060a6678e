//! ClaimFlow Metadata Store
//!
//! Durable bookkeeping for the ingestion pipeline. Blob storage holds the
//! chunk files; this store holds everything needed to answer "where was I?"
//! after a crash:
//!
//! - **Runs**: one row per ingestion, with the coordinator's current state
//! - **Chunks**: descriptors written by the chunk writer, a `dispatched` flag
//!   and the processor's result once known
//! - **Summaries**: the terminal aggregate of each run
//! - **Entity states**: one JSON document per entity, written by its actor
//! - **Consumer checkpoints**: next offset per consumer group and partition
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   states, chunks    ┌──────────────────┐
//! │ Run Coordinator  │ ──────────────────► │                  │
//! └──────────────────┘                     │                  │
//! ┌──────────────────┐   checkpoints       │  Metadata Store  │
//! │ Consumer Host    │ ──────────────────► │    (SQLite)      │
//! └──────────────────┘                     │                  │
//! ┌──────────────────┐   entity states     │                  │
//! │ Entity Actors    │ ──────────────────► │                  │
//! └──────────────────┘                     └──────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use claimflow_metadata::{MetadataStore, SqliteMetadataStore};
//!
//! let store = SqliteMetadataStore::new("claimflow.db").await?;
//!
//! let run = store.create_run("tenant-a", "claims.csv").await?;
//! store.record_chunks(run.run_id, &descriptors).await?;
//!
//! for chunk in store.list_chunks(run.run_id).await? {
//!     if chunk.result.is_none() {
//!         store.mark_chunk_dispatched(run.run_id, &chunk.descriptor.chunk_id).await?;
//!         // ... process ...
//!     }
//! }
//! ```
//!
//! ## Thread Safety
//! - SQLx connection pool handles concurrent access
//! - Multi-row updates run in a single transaction
//! - Safe to share across async tasks via `Arc<dyn MetadataStore>`

pub mod error;
pub mod store;
pub mod types;

pub use error::{MetadataError, Result};
pub use store::SqliteMetadataStore;
pub use types::*;

use async_trait::async_trait;
use claimflow_core::{EntityId, EntityState};

/// Metadata store trait - abstracts over storage backends.
///
/// ## Implementations
///
/// - **SqliteMetadataStore**: file-backed or in-memory SQLite
///
/// ## Error Handling
///
/// All methods return `Result<T>`. Lookups of optional data return
/// `Ok(None)`; mutations that address a missing run return `RunNotFound`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ============================================================
    // RUN OPERATIONS
    // ============================================================

    /// Create a run in the `Scheduled` state.
    ///
    /// The run id is allocated by the store and strictly increases.
    /// Duplicate calls create independent runs.
    async fn create_run(&self, tenant_id: &str, file_name: &str) -> Result<Run>;

    /// Get a run by id.
    async fn get_run(&self, run_id: i64) -> Result<Option<Run>>;

    /// Move a run to a new state.
    ///
    /// # Errors
    ///
    /// - `RunNotFound`: No such run
    async fn update_run_state(&self, run_id: i64, state: RunState) -> Result<()>;

    // ============================================================
    // CHUNK OPERATIONS
    // ============================================================

    /// Record every chunk descriptor of a run and move it to `FanningOut`.
    ///
    /// Both happen in one transaction: either the whole chunk set is visible
    /// together with the new state, or nothing is. Descriptors that already
    /// exist are left untouched.
    async fn record_chunks(&self, run_id: i64, descriptors: &[ChunkDescriptor]) -> Result<()>;

    /// List a run's chunks ordered by chunk id.
    async fn list_chunks(&self, run_id: i64) -> Result<Vec<ChunkRecord>>;

    /// Flag a chunk as handed to a processor.
    ///
    /// # Errors
    ///
    /// - `ChunkNotFound`: No such descriptor
    async fn mark_chunk_dispatched(&self, run_id: i64, chunk_id: &str) -> Result<()>;

    /// Persist the result of one chunk, replacing any earlier result.
    ///
    /// # Errors
    ///
    /// - `ChunkNotFound`: No such descriptor
    async fn record_chunk_result(&self, result: &ChunkResult) -> Result<()>;

    // ============================================================
    // SUMMARY OPERATIONS
    // ============================================================

    /// Store the run summary and move the run to its terminal state.
    ///
    /// The run becomes `Failed` when `summary.failure` is set and `Completed`
    /// otherwise. Summary and state are written in one transaction.
    async fn complete_run(&self, summary: &RunSummary) -> Result<()>;

    /// Get the stored summary of a run.
    async fn get_run_summary(&self, run_id: i64) -> Result<Option<RunSummary>>;

    // ============================================================
    // ENTITY STATE OPERATIONS
    // ============================================================

    /// Load the persisted state of one entity.
    async fn load_entity_state(&self, entity_id: &EntityId) -> Result<Option<EntityState>>;

    /// Write the full state of one entity in a single transaction.
    async fn save_entity_state(&self, state: &EntityState) -> Result<()>;

    // ============================================================
    // CONSUMER CHECKPOINT OPERATIONS
    // ============================================================

    /// Next offset for a consumer group on a partition, if one was committed.
    async fn get_checkpoint(&self, consumer_group: &str, partition: u32) -> Result<Option<u64>>;

    /// Commit the next offset for a consumer group on a partition.
    async fn commit_checkpoint(&self, consumer_group: &str, partition: u32, offset: u64)
        -> Result<()>;

    /// All checkpoints of a consumer group, ordered by partition.
    async fn list_checkpoints(&self, consumer_group: &str) -> Result<Vec<ConsumerCheckpoint>>;
}
