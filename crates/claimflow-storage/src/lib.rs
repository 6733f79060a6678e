//! ClaimFlow Storage Layer
//!
//! Blob-storage side of the pipeline: splitting source files into chunk
//! files and reading chunks back.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────┐
//! │   Source file    │  {container}/{file_name}
//! └────────┬─────────┘
//!          │ streamed
//!          ▼
//! ┌──────────────────┐
//! │   ChunkWriter    │ ◄── split(): header + ≤ N rows per chunk
//! └────────┬─────────┘
//!          │ PUT (retried)
//!          ▼
//! ┌──────────────────┐
//! │  Object store    │  {container}/{tenant}/{run}/chunk-NNNN.csv
//! └────────┬─────────┘
//!          │ GET (retried)
//!          ▼
//! ┌──────────────────┐
//! │   ChunkReader    │ ◄── read(): header + raw rows
//! └──────────────────┘
//! ```
//!
//! Any `object_store` backend works: `InMemory` in tests, `LocalFileSystem`
//! for the CLI, S3/Azure/GCS in deployment.
//!
//! ## Usage Example
//!
//! ```ignore
//! use claimflow_storage::{ChunkReader, ChunkWriter, StorageConfig};
//! use object_store::memory::InMemory;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemory::new());
//! let writer = ChunkWriter::new(store.clone(), StorageConfig::default());
//! let chunks = writer.split("claims.csv", run_id, "tenant-a").await?;
//!
//! let reader = ChunkReader::new(store, StorageConfig::default());
//! let contents = reader.read(&chunks[0]).await?;
//! ```

pub mod config;
pub mod error;
pub mod reader;
mod retry;
pub mod writer;

pub use config::{chunk_id, StorageConfig};
pub use error::{Error, Result};
pub use reader::{ChunkContents, ChunkReader};
pub use writer::ChunkWriter;
