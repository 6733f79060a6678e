//! Metadata Error Types
//!
//! All metadata store operations return `Result<T>`, aliased to
//! `Result<T, MetadataError>`, so database and serialization failures
//! propagate with `?`.
//!
//! ## Error Categories
//!
//! ### Lookup Errors
//! - `RunNotFound`: No run with the given id
//! - `ChunkNotFound`: No chunk descriptor with the given run/chunk id
//!
//! ### Data Errors
//! - `InvalidState`: A persisted value could not be interpreted
//! - `SerializationError`: Entity state JSON could not be (de)serialized
//!
//! ### Database Errors
//! - `DatabaseError`: SQLite operation failed (connection, query, constraint)
//! - `MigrationError`: Embedded schema migrations failed to apply

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Chunk not found: {run_id}/{chunk_id}")]
    ChunkNotFound { run_id: i64, chunk_id: String },

    #[error("Invalid persisted state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl From<sqlx::migrate::MigrateError> for MetadataError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MetadataError::MigrationError(e.to_string())
    }
}
