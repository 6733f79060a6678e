//! ClaimFlow Server
//!
//! Orchestration layer of the claims ingestion pipeline:
//! - **Run Coordinator**: persisted, re-entrant run state machine
//! - **Chunk Processor**: failure boundary around one chunk's publication
//! - **Pipeline**: wiring plus the trigger and query surface
//!
//! ## Example
//!
//! ```ignore
//! use claimflow_server::{Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::from_env()?, object_store, metadata, transport)?;
//! let run_id = pipeline.schedule_run("tenant-a", "claims.csv").await?;
//! let (_cancel_tx, cancel) = tokio::sync::watch::channel(false);
//! let summary = pipeline.execute_run(run_id, cancel).await?;
//! pipeline.drain_consumers().await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod processor;

pub use config::PipelineConfig;
pub use coordinator::RunCoordinator;
pub use error::{CoordinatorError, Result};
pub use pipeline::Pipeline;
pub use processor::ChunkProcessor;
