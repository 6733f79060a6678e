//! Metadata Type Definitions
//!
//! ## Types Overview
//!
//! ### Run
//! One ingestion invocation and the state-machine position of its
//! coordinator. The state is what makes a run resumable after a crash.
//!
//! ### ChunkDescriptor
//! One bounded slice of a source file, written to blob storage by the chunk
//! writer. Read-only once recorded.
//!
//! ### ChunkRecord
//! A descriptor plus its dispatch flag and (once known) its result.
//!
//! ### ChunkResult / RunSummary
//! Per-chunk outcome and the run-level fold of all outcomes.
//!
//! ### ConsumerCheckpoint
//! Next offset a consumer group will read from a partition.
//!
//! Timestamps are i64 milliseconds since the epoch; line counts are u64.

use crate::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coordinator state of a run.
///
/// ```text
/// Scheduled → Splitting → FanningOut → Aggregating → Completed
///                 │            │
///                 └────────────┴──────► Failed (fatal errors only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Scheduled,
    Splitting,
    FanningOut,
    Aggregating,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Scheduled => "scheduled",
            RunState::Splitting => "splitting",
            RunState::FanningOut => "fanning_out",
            RunState::Aggregating => "aggregating",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` runs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunState::Scheduled),
            "splitting" => Ok(RunState::Splitting),
            "fanning_out" => Ok(RunState::FanningOut),
            "aggregating" => Ok(RunState::Aggregating),
            "completed" => Ok(RunState::Completed),
            "failed" => Ok(RunState::Failed),
            other => Err(MetadataError::InvalidState(format!(
                "unknown run state '{}'",
                other
            ))),
        }
    }
}

/// One ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Allocated by the store, monotonically increasing
    pub run_id: i64,
    pub tenant_id: String,
    /// Source object name, relative to the storage root
    pub file_name: String,
    pub submitted_at: i64,
    pub state: RunState,
    /// Set when the run moved to `Failed`
    pub failure: Option<String>,
    pub updated_at: i64,
}

/// Metadata for one chunk of a run's source file.
///
/// `line_start`/`line_end` are zero-based, inclusive indices into the data
/// rows of the source (the header is not counted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub run_id: i64,
    pub tenant_id: String,
    /// `chunk-0001`, `chunk-0002`, ...
    pub chunk_id: String,
    /// Object path of the chunk blob
    pub location: String,
    pub line_start: u64,
    pub line_end: u64,
    pub line_count: u64,
    pub created_at: i64,
}

/// Outcome of processing one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub run_id: i64,
    pub tenant_id: String,
    pub chunk_id: String,
    pub success: bool,
    pub lines_processed: u64,
    pub lines_failed: u64,
    pub error: Option<String>,
    pub started_at: i64,
    pub completed_at: i64,
}

impl ChunkResult {
    /// A chunk that could not be processed: every line counts as failed.
    pub fn failed(
        descriptor: &ChunkDescriptor,
        error: impl Into<String>,
        started_at: i64,
        completed_at: i64,
    ) -> Self {
        Self {
            run_id: descriptor.run_id,
            tenant_id: descriptor.tenant_id.clone(),
            chunk_id: descriptor.chunk_id.clone(),
            success: false,
            lines_processed: 0,
            lines_failed: descriptor.line_count,
            error: Some(error.into()),
            started_at,
            completed_at,
        }
    }
}

/// A chunk descriptor together with its coordinator bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub descriptor: ChunkDescriptor,
    /// Set before the chunk processor is invoked
    pub dispatched: bool,
    pub result: Option<ChunkResult>,
}

/// Terminal aggregate of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub tenant_id: String,
    pub file_name: String,
    pub started_at: i64,
    pub completed_at: i64,
    pub total_chunks: u64,
    pub successful_chunks: u64,
    pub failed_chunks: u64,
    pub total_lines_processed: u64,
    pub total_lines_failed: u64,
    /// `failed_chunks == 0` and no run-level failure
    pub success: bool,
    /// Run-level fatal error, if any
    pub failure: Option<String>,
}

impl RunSummary {
    /// Fold chunk results into a summary.
    ///
    /// An empty result set yields an empty, successful summary.
    pub fn aggregate(run: &Run, results: &[ChunkResult], started_at: i64, completed_at: i64) -> Self {
        let successful_chunks = results.iter().filter(|r| r.success).count() as u64;
        let failed_chunks = results.len() as u64 - successful_chunks;

        Self {
            run_id: run.run_id,
            tenant_id: run.tenant_id.clone(),
            file_name: run.file_name.clone(),
            started_at,
            completed_at,
            total_chunks: results.len() as u64,
            successful_chunks,
            failed_chunks,
            total_lines_processed: results.iter().map(|r| r.lines_processed).sum(),
            total_lines_failed: results.iter().map(|r| r.lines_failed).sum(),
            success: failed_chunks == 0,
            failure: None,
        }
    }

    /// Summary of a run aborted by a fatal error.
    pub fn fatal(run: &Run, failure: impl Into<String>, started_at: i64, completed_at: i64) -> Self {
        Self {
            run_id: run.run_id,
            tenant_id: run.tenant_id.clone(),
            file_name: run.file_name.clone(),
            started_at,
            completed_at,
            total_chunks: 0,
            successful_chunks: 0,
            failed_chunks: 0,
            total_lines_processed: 0,
            total_lines_failed: 0,
            success: false,
            failure: Some(failure.into()),
        }
    }
}

/// Committed read position of a consumer group on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerCheckpoint {
    pub consumer_group: String,
    pub partition: u32,
    /// Next offset to read
    pub offset: u64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> Run {
        Run {
            run_id: 7,
            tenant_id: "tenant".to_string(),
            file_name: "claims.csv".to_string(),
            submitted_at: 0,
            state: RunState::Aggregating,
            failure: None,
            updated_at: 0,
        }
    }

    fn result(chunk: &str, success: bool, processed: u64, failed: u64) -> ChunkResult {
        ChunkResult {
            run_id: 7,
            tenant_id: "tenant".to_string(),
            chunk_id: chunk.to_string(),
            success,
            lines_processed: processed,
            lines_failed: failed,
            error: None,
            started_at: 0,
            completed_at: 1,
        }
    }

    #[test]
    fn test_run_state_round_trip() {
        for state in [
            RunState::Scheduled,
            RunState::Splitting,
            RunState::FanningOut,
            RunState::Aggregating,
            RunState::Completed,
            RunState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
        assert!("paused".parse::<RunState>().is_err());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::FanningOut.is_terminal());
    }

    #[test]
    fn test_aggregate_counts_every_line() {
        let results = vec![
            result("chunk-0001", true, 10_000, 0),
            result("chunk-0002", false, 0, 10_000),
            result("chunk-0003", true, 4_998, 2),
        ];
        let summary = RunSummary::aggregate(&run(), &results, 0, 5);

        assert_eq!(summary.total_chunks, 3);
        assert_eq!(summary.successful_chunks, 2);
        assert_eq!(summary.failed_chunks, 1);
        assert_eq!(summary.total_lines_processed + summary.total_lines_failed, 25_000);
        assert!(!summary.success);
    }

    #[test]
    fn test_aggregate_empty_run_succeeds() {
        let summary = RunSummary::aggregate(&run(), &[], 0, 0);
        assert_eq!(summary.total_chunks, 0);
        assert!(summary.success);
    }

    #[test]
    fn test_fatal_summary() {
        let summary = RunSummary::fatal(&run(), "partition count is zero", 0, 0);
        assert!(!summary.success);
        assert_eq!(summary.total_chunks, 0);
        assert_eq!(summary.failure.as_deref(), Some("partition count is zero"));
    }

    #[test]
    fn test_failed_chunk_result_counts_all_lines() {
        let descriptor = ChunkDescriptor {
            run_id: 7,
            tenant_id: "tenant".to_string(),
            chunk_id: "chunk-0002".to_string(),
            location: "tenant/7/chunk-0002.csv".to_string(),
            line_start: 10_000,
            line_end: 19_999,
            line_count: 10_000,
            created_at: 0,
        };
        let failed = ChunkResult::failed(&descriptor, "boom", 1, 2);
        assert!(!failed.success);
        assert_eq!(failed.lines_processed, 0);
        assert_eq!(failed.lines_failed, 10_000);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
