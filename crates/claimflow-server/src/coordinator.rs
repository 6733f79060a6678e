//! Run Coordinator
//!
//! Drives one run through its persisted state machine:
//!
//! ```text
//! Scheduled ──► Splitting ──► FanningOut ──► Aggregating ──► Completed
//!                   │              │
//!                   └──── fatal ───┴──────────────────────► Failed
//! ```
//!
//! ## Re-entry
//!
//! Every step is recorded in the metadata store before the next one starts,
//! so [`RunCoordinator::execute`] can be called again for the same run after
//! a crash or a cancellation and will pick up where the last call stopped:
//!
//! - **Splitting**: descriptors already recorded for the run are reused;
//!   otherwise the source is split (chunk paths are deterministic, so a
//!   repeated split overwrites) and the descriptors are recorded together
//!   with the move to `FanningOut`
//! - **FanningOut**: only chunks without a recorded result are dispatched.
//!   A chunk found dispatched but unfinished is issued again; its repeated
//!   events are absorbed by the entity actors
//! - **Aggregating**: the summary and the move to `Completed` are written in
//!   one transaction
//! - **Completed / Failed**: the stored summary is returned as is
//!
//! ## Fan-out
//!
//! At most `max_parallel_chunks` chunk processors run at once. The fan-in
//! waits for every one of them; a failed chunk is reported, never fatal.
//!
//! Before any chunk is dispatched the stream transport is pinged (with
//! retries). A transport that stays unreachable is a run-level failure, not
//! a chunk-level one: the run goes to `Failed` with nothing dispatched, and
//! can be triggered again once the stream is back.
//!
//! ## Cancellation
//!
//! Flipping the cancel signal stops new dispatches. Chunks already running
//! finish and their results are recorded. The run stays in `FanningOut` and
//! `execute` returns [`CoordinatorError::Cancelled`].

use crate::error::{CoordinatorError, Result};
use crate::processor::{now_ms, ChunkProcessor};
use claimflow_client::{retry_with_backoff, RetryPolicy};
use claimflow_metadata::{
    ChunkDescriptor, ChunkResult, MetadataError, MetadataStore, Run, RunState, RunSummary,
};
use claimflow_observability::metrics;
use claimflow_storage::ChunkWriter;
use futures::{future, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct RunCoordinator {
    metadata_store: Arc<dyn MetadataStore>,
    writer: Arc<ChunkWriter>,
    processor: ChunkProcessor,
    max_parallel_chunks: usize,
    retry_policy: RetryPolicy,
}

impl RunCoordinator {
    pub fn new(
        metadata_store: Arc<dyn MetadataStore>,
        writer: Arc<ChunkWriter>,
        processor: ChunkProcessor,
        max_parallel_chunks: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            metadata_store,
            writer,
            processor,
            max_parallel_chunks: max_parallel_chunks.max(1),
            retry_policy,
        }
    }

    /// Record a new run in `Scheduled`.
    ///
    /// Every call creates an independent run.
    pub async fn schedule(&self, tenant_id: &str, file_name: &str) -> Result<i64> {
        let run = self.metadata_store.create_run(tenant_id, file_name).await?;
        info!(
            run_id = run.run_id,
            tenant_id = %run.tenant_id,
            file_name = %run.file_name,
            "Run scheduled"
        );
        Ok(run.run_id)
    }

    /// Advance a run until it is terminal, then return its summary.
    ///
    /// Fatal run-level errors do not surface as `Err`: the run is moved to
    /// `Failed` and its (unsuccessful) summary is returned.
    ///
    /// # Errors
    ///
    /// - `RunNotFound`: No such run
    /// - `Cancelled`: The cancel signal fired; the run can be resumed
    /// - `Metadata`: The store failed while recording a terminal state
    pub async fn execute(&self, run_id: i64, cancel: watch::Receiver<bool>) -> Result<RunSummary> {
        let mut run = self
            .metadata_store
            .get_run(run_id)
            .await?
            .ok_or(CoordinatorError::RunNotFound(run_id))?;

        loop {
            debug!(run_id, state = %run.state, "Coordinator step");

            match run.state {
                RunState::Completed | RunState::Failed => return self.stored_summary(&run).await,

                RunState::Scheduled => {
                    self.persist_state(run_id, RunState::Splitting).await?;
                    run.state = RunState::Splitting;
                }

                RunState::Splitting => match self.split(&run).await {
                    Ok(()) => run.state = RunState::FanningOut,
                    Err(e) => return self.fail(&run, e).await,
                },

                RunState::FanningOut => match self.fan_out(&run, &cancel).await {
                    Ok(()) => {
                        self.persist_state(run_id, RunState::Aggregating).await?;
                        run.state = RunState::Aggregating;
                    }
                    Err(CoordinatorError::Cancelled { run_id }) => {
                        info!(run_id, "Run cancelled, remaining chunks left pending");
                        return Err(CoordinatorError::Cancelled { run_id });
                    }
                    Err(e) => return self.fail(&run, e).await,
                },

                RunState::Aggregating => match self.aggregate(&run).await? {
                    Some(summary) => return Ok(summary),
                    None => {
                        // Results missing; go back and finish them
                        self.persist_state(run_id, RunState::FanningOut).await?;
                        run.state = RunState::FanningOut;
                    }
                },
            }
        }
    }

    async fn split(&self, run: &Run) -> Result<()> {
        let existing = self.metadata_store.list_chunks(run.run_id).await?;
        if !existing.is_empty() {
            info!(
                run_id = run.run_id,
                chunks = existing.len(),
                "Reusing chunks recorded before restart"
            );
            self.persist_state(run.run_id, RunState::FanningOut).await?;
            return Ok(());
        }

        let descriptors = self
            .writer
            .split(&run.file_name, run.run_id, &run.tenant_id)
            .await?;

        info!(
            run_id = run.run_id,
            chunks = descriptors.len(),
            rows = descriptors.iter().map(|d| d.line_count).sum::<u64>(),
            "Source split"
        );

        retry_with_backoff(&self.retry_policy, || {
            self.metadata_store.record_chunks(run.run_id, &descriptors)
        })
        .await?;
        Ok(())
    }

    async fn fan_out(&self, run: &Run, cancel: &watch::Receiver<bool>) -> Result<()> {
        let chunks = self.metadata_store.list_chunks(run.run_id).await?;
        let total = chunks.len();

        let pending: Vec<ChunkDescriptor> = chunks
            .into_iter()
            .filter(|c| c.result.is_none())
            .map(|c| {
                if c.dispatched {
                    warn!(
                        run_id = run.run_id,
                        chunk_id = %c.descriptor.chunk_id,
                        "Chunk dispatched before restart without result, re-issuing"
                    );
                }
                c.descriptor
            })
            .collect();

        info!(
            run_id = run.run_id,
            total_chunks = total,
            pending = pending.len(),
            max_parallel = self.max_parallel_chunks,
            "Fanning out"
        );

        if pending.is_empty() {
            return Ok(());
        }

        if let Err(e) = retry_with_backoff(&self.retry_policy, || self.processor.ping()).await {
            error!(run_id = run.run_id, error = %e, "Stream transport unreachable");
            return Err(e.into());
        }

        let pending_count = pending.len();
        let mut completed = 0usize;
        let mut fatal: Option<CoordinatorError> = None;

        // take_while is polled only when a slot frees up, so a cancel stops
        // the next dispatch without touching the ones in flight
        let mut results = futures::stream::iter(pending)
            .take_while(|_| future::ready(!*cancel.borrow()))
            .map(|descriptor| self.dispatch(descriptor))
            .buffer_unordered(self.max_parallel_chunks);

        while let Some(outcome) = results.next().await {
            match outcome {
                Ok(_) => completed += 1,
                Err(e) => {
                    error!(run_id = run.run_id, error = %e, "Failed to record chunk result");
                    fatal.get_or_insert(e);
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if completed < pending_count {
            return Err(CoordinatorError::Cancelled { run_id: run.run_id });
        }
        Ok(())
    }

    async fn dispatch(&self, descriptor: ChunkDescriptor) -> Result<ChunkResult> {
        retry_with_backoff(&self.retry_policy, || {
            self.metadata_store
                .mark_chunk_dispatched(descriptor.run_id, &descriptor.chunk_id)
        })
        .await?;

        let result = self.processor.process(&descriptor).await;

        retry_with_backoff(&self.retry_policy, || {
            self.metadata_store.record_chunk_result(&result)
        })
        .await?;

        Ok(result)
    }

    /// `None` when some chunk has no result yet.
    async fn aggregate(&self, run: &Run) -> Result<Option<RunSummary>> {
        let chunks = self.metadata_store.list_chunks(run.run_id).await?;
        let total = chunks.len();
        let results: Vec<ChunkResult> = chunks.into_iter().filter_map(|c| c.result).collect();

        if results.len() < total {
            warn!(
                run_id = run.run_id,
                missing = total - results.len(),
                "Chunks without result at aggregation"
            );
            return Ok(None);
        }

        let summary = RunSummary::aggregate(run, &results, run.submitted_at, now_ms());

        retry_with_backoff(&self.retry_policy, || self.metadata_store.complete_run(&summary))
            .await?;

        metrics::RUNS_TOTAL.with_label_values(&["completed"]).inc();
        info!(
            run_id = run.run_id,
            state = "Completed",
            success_count = summary.successful_chunks,
            failed_count = summary.failed_chunks,
            lines_processed = summary.total_lines_processed,
            lines_failed = summary.total_lines_failed,
            success = summary.success,
            "Run completed"
        );

        Ok(Some(summary))
    }

    async fn fail(&self, run: &Run, cause: CoordinatorError) -> Result<RunSummary> {
        error!(run_id = run.run_id, error = %cause, "Run failed");

        let summary = RunSummary::fatal(run, cause.to_string(), run.submitted_at, now_ms());
        retry_with_backoff(&self.retry_policy, || self.metadata_store.complete_run(&summary))
            .await?;

        metrics::RUNS_TOTAL.with_label_values(&["failed"]).inc();
        Ok(summary)
    }

    async fn stored_summary(&self, run: &Run) -> Result<RunSummary> {
        if let Some(summary) = self.metadata_store.get_run_summary(run.run_id).await? {
            return Ok(summary);
        }
        match (&run.state, &run.failure) {
            (RunState::Failed, Some(failure)) => {
                Ok(RunSummary::fatal(run, failure.clone(), run.submitted_at, run.updated_at))
            }
            _ => Err(MetadataError::InvalidState(format!(
                "run {} is {} but has no summary",
                run.run_id, run.state
            ))
            .into()),
        }
    }

    async fn persist_state(&self, run_id: i64, state: RunState) -> Result<()> {
        retry_with_backoff(&self.retry_policy, || {
            self.metadata_store.update_run_state(run_id, state)
        })
        .await?;
        Ok(())
    }
}
