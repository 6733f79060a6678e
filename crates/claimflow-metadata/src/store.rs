//! SQLite Metadata Store Implementation
//!
//! ## Usage
//!
//! ### File-Based (Production)
//! ```ignore
//! use claimflow_metadata::{SqliteMetadataStore, MetadataStore};
//!
//! // Creates claimflow.db (or opens it if it exists)
//! let store = SqliteMetadataStore::new("claimflow.db").await?;
//! ```
//!
//! ### In-Memory (Testing)
//! ```ignore
//! let store = SqliteMetadataStore::new_in_memory().await?;
//! ```
//!
//! ## Implementation Details
//!
//! ### Connection Pool
//! - File databases use a small pool in WAL mode with a busy timeout, so
//!   actor writes and coordinator updates can interleave
//! - In-memory databases use exactly one connection: every SQLite
//!   connection to `:memory:` opens a separate, empty database
//!
//! ### Migrations
//! - Applied on startup via `sqlx::migrate!`
//!
//! ### Transactions
//! - Recording a chunk set and the `FanningOut` transition is atomic
//! - Storing a summary and the terminal transition is atomic
//! - Entity states are written whole, one transaction per mutation

use crate::{
    error::{MetadataError, Result},
    types::*,
    MetadataStore,
};
use async_trait::async_trait;
use claimflow_core::{EntityId, EntityState};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-based metadata store implementation
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (or create) a file-backed store and apply migrations.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing)
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn run_from_row(r: &SqliteRow) -> Result<Run> {
        Ok(Run {
            run_id: r.try_get("run_id")?,
            tenant_id: r.try_get("tenant_id")?,
            file_name: r.try_get("file_name")?,
            submitted_at: r.try_get("submitted_at")?,
            state: r.try_get::<String, _>("state")?.parse()?,
            failure: r.try_get("failure")?,
            updated_at: r.try_get("updated_at")?,
        })
    }

    fn chunk_from_row(r: &SqliteRow) -> Result<ChunkRecord> {
        let descriptor = ChunkDescriptor {
            run_id: r.try_get("run_id")?,
            tenant_id: r.try_get("tenant_id")?,
            chunk_id: r.try_get("chunk_id")?,
            location: r.try_get("location")?,
            line_start: r.try_get::<i64, _>("line_start")? as u64,
            line_end: r.try_get::<i64, _>("line_end")? as u64,
            line_count: r.try_get::<i64, _>("line_count")? as u64,
            created_at: r.try_get("created_at")?,
        };

        // Result columns come from a LEFT JOIN and are NULL until recorded
        let result = match r.try_get::<Option<bool>, _>("success")? {
            Some(success) => Some(ChunkResult {
                run_id: descriptor.run_id,
                tenant_id: descriptor.tenant_id.clone(),
                chunk_id: descriptor.chunk_id.clone(),
                success,
                lines_processed: r.try_get::<Option<i64>, _>("lines_processed")?.unwrap_or(0)
                    as u64,
                lines_failed: r.try_get::<Option<i64>, _>("lines_failed")?.unwrap_or(0) as u64,
                error: r.try_get("error")?,
                started_at: r.try_get::<Option<i64>, _>("started_at")?.unwrap_or(0),
                completed_at: r.try_get::<Option<i64>, _>("completed_at")?.unwrap_or(0),
            }),
            None => None,
        };

        Ok(ChunkRecord {
            descriptor,
            dispatched: r.try_get("dispatched")?,
            result,
        })
    }

    fn summary_from_row(r: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: r.try_get("run_id")?,
            tenant_id: r.try_get("tenant_id")?,
            file_name: r.try_get("file_name")?,
            started_at: r.try_get("started_at")?,
            completed_at: r.try_get("completed_at")?,
            total_chunks: r.try_get::<i64, _>("total_chunks")? as u64,
            successful_chunks: r.try_get::<i64, _>("successful_chunks")? as u64,
            failed_chunks: r.try_get::<i64, _>("failed_chunks")? as u64,
            total_lines_processed: r.try_get::<i64, _>("total_lines_processed")? as u64,
            total_lines_failed: r.try_get::<i64, _>("total_lines_failed")? as u64,
            success: r.try_get("success")?,
            failure: r.try_get("failure")?,
        })
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_run(&self, tenant_id: &str, file_name: &str) -> Result<Run> {
        let now = Self::now_ms();

        let run_id: i64 = sqlx::query(
            r#"
            INSERT INTO runs (tenant_id, file_name, submitted_at, state, failure, updated_at)
            VALUES (?, ?, ?, ?, NULL, ?)
            RETURNING run_id
            "#,
        )
        .bind(tenant_id)
        .bind(file_name)
        .bind(now)
        .bind(RunState::Scheduled.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?
        .try_get("run_id")?;

        Ok(Run {
            run_id,
            tenant_id: tenant_id.to_string(),
            file_name: file_name.to_string(),
            submitted_at: now,
            state: RunState::Scheduled,
            failure: None,
            updated_at: now,
        })
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
        let row = sqlx::query(
            r#"
            SELECT run_id, tenant_id, file_name, submitted_at, state, failure, updated_at
            FROM runs
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::run_from_row).transpose()
    }

    async fn update_run_state(&self, run_id: i64, state: RunState) -> Result<()> {
        let rows_affected = sqlx::query("UPDATE runs SET state = ?, updated_at = ? WHERE run_id = ?")
            .bind(state.as_str())
            .bind(Self::now_ms())
            .bind(run_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(MetadataError::RunNotFound(run_id));
        }

        Ok(())
    }

    async fn record_chunks(&self, run_id: i64, descriptors: &[ChunkDescriptor]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Self::now_ms();

        let rows_affected = sqlx::query("UPDATE runs SET state = ?, updated_at = ? WHERE run_id = ?")
            .bind(RunState::FanningOut.as_str())
            .bind(now)
            .bind(run_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(MetadataError::RunNotFound(run_id));
        }

        for d in descriptors {
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    run_id, chunk_id, tenant_id, location,
                    line_start, line_end, line_count, created_at, dispatched
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT(run_id, chunk_id) DO NOTHING
                "#,
            )
            .bind(run_id)
            .bind(&d.chunk_id)
            .bind(&d.tenant_id)
            .bind(&d.location)
            .bind(d.line_start as i64)
            .bind(d.line_end as i64)
            .bind(d.line_count as i64)
            .bind(d.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_chunks(&self, run_id: i64) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.run_id, c.chunk_id, c.tenant_id, c.location,
                   c.line_start, c.line_end, c.line_count, c.created_at, c.dispatched,
                   r.success, r.lines_processed, r.lines_failed, r.error,
                   r.started_at, r.completed_at
            FROM chunks c
            LEFT JOIN chunk_results r
                ON r.run_id = c.run_id AND r.chunk_id = c.chunk_id
            WHERE c.run_id = ?
            ORDER BY c.line_start
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::chunk_from_row).collect()
    }

    async fn mark_chunk_dispatched(&self, run_id: i64, chunk_id: &str) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE chunks SET dispatched = 1, dispatched_at = ? WHERE run_id = ? AND chunk_id = ?",
        )
        .bind(Self::now_ms())
        .bind(run_id)
        .bind(chunk_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(MetadataError::ChunkNotFound {
                run_id,
                chunk_id: chunk_id.to_string(),
            });
        }

        Ok(())
    }

    async fn record_chunk_result(&self, result: &ChunkResult) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM chunks WHERE run_id = ? AND chunk_id = ?")
            .bind(result.run_id)
            .bind(&result.chunk_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        if !exists {
            return Err(MetadataError::ChunkNotFound {
                run_id: result.run_id,
                chunk_id: result.chunk_id.clone(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO chunk_results (
                run_id, chunk_id, tenant_id, success, lines_processed, lines_failed,
                error, started_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id, chunk_id) DO UPDATE SET
                success = excluded.success,
                lines_processed = excluded.lines_processed,
                lines_failed = excluded.lines_failed,
                error = excluded.error,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(result.run_id)
        .bind(&result.chunk_id)
        .bind(&result.tenant_id)
        .bind(result.success)
        .bind(result.lines_processed as i64)
        .bind(result.lines_failed as i64)
        .bind(&result.error)
        .bind(result.started_at)
        .bind(result.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn complete_run(&self, summary: &RunSummary) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let state = if summary.failure.is_some() {
            RunState::Failed
        } else {
            RunState::Completed
        };

        let rows_affected = sqlx::query(
            "UPDATE runs SET state = ?, failure = ?, updated_at = ? WHERE run_id = ?",
        )
        .bind(state.as_str())
        .bind(&summary.failure)
        .bind(Self::now_ms())
        .bind(summary.run_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(MetadataError::RunNotFound(summary.run_id));
        }

        sqlx::query(
            r#"
            INSERT INTO run_summaries (
                run_id, tenant_id, file_name, started_at, completed_at,
                total_chunks, successful_chunks, failed_chunks,
                total_lines_processed, total_lines_failed, success, failure
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                total_chunks = excluded.total_chunks,
                successful_chunks = excluded.successful_chunks,
                failed_chunks = excluded.failed_chunks,
                total_lines_processed = excluded.total_lines_processed,
                total_lines_failed = excluded.total_lines_failed,
                success = excluded.success,
                failure = excluded.failure
            "#,
        )
        .bind(summary.run_id)
        .bind(&summary.tenant_id)
        .bind(&summary.file_name)
        .bind(summary.started_at)
        .bind(summary.completed_at)
        .bind(summary.total_chunks as i64)
        .bind(summary.successful_chunks as i64)
        .bind(summary.failed_chunks as i64)
        .bind(summary.total_lines_processed as i64)
        .bind(summary.total_lines_failed as i64)
        .bind(summary.success)
        .bind(&summary.failure)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_run_summary(&self, run_id: i64) -> Result<Option<RunSummary>> {
        let row = sqlx::query(
            r#"
            SELECT run_id, tenant_id, file_name, started_at, completed_at,
                   total_chunks, successful_chunks, failed_chunks,
                   total_lines_processed, total_lines_failed, success, failure
            FROM run_summaries
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn load_entity_state(&self, entity_id: &EntityId) -> Result<Option<EntityState>> {
        let row = sqlx::query("SELECT state FROM entity_states WHERE entity_id = ?")
            .bind(entity_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let json: String = r.try_get("state")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn save_entity_state(&self, state: &EntityState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO entity_states (entity_id, state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(entity_id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.entity_id.to_string())
        .bind(json)
        .bind(Self::now_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_checkpoint(&self, consumer_group: &str, partition: u32) -> Result<Option<u64>> {
        let row = sqlx::query(
            "SELECT next_offset FROM consumer_checkpoints WHERE consumer_group = ? AND partition_id = ?",
        )
        .bind(consumer_group)
        .bind(partition as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_get::<i64, _>("next_offset")? as u64)),
            None => Ok(None),
        }
    }

    async fn commit_checkpoint(
        &self,
        consumer_group: &str,
        partition: u32,
        offset: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_checkpoints (consumer_group, partition_id, next_offset, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(consumer_group, partition_id) DO UPDATE SET
                next_offset = excluded.next_offset,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(consumer_group)
        .bind(partition as i64)
        .bind(offset as i64)
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_checkpoints(&self, consumer_group: &str) -> Result<Vec<ConsumerCheckpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT consumer_group, partition_id, next_offset, updated_at
            FROM consumer_checkpoints
            WHERE consumer_group = ?
            ORDER BY partition_id
            "#,
        )
        .bind(consumer_group)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<ConsumerCheckpoint> {
                Ok(ConsumerCheckpoint {
                    consumer_group: r.try_get("consumer_group")?,
                    partition: r.try_get::<i64, _>("partition_id")? as u32,
                    offset: r.try_get::<i64, _>("next_offset")? as u64,
                    updated_at: r.try_get("updated_at")?,
                })
            })
            .collect()
    }
}
