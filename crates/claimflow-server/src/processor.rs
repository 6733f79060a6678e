//! Chunk Processor
//!
//! Publishes one chunk and reports the outcome as a [`ChunkResult`]. Nothing
//! escapes this boundary: publisher errors and even panics in the publish
//! task become a failed result, so one bad chunk can never stall the run's
//! fan-in.
//!
//! | Outcome | `lines_processed` | `lines_failed` |
//! |---|---|---|
//! | published | rows sent | malformed rows skipped |
//! | error or panic | 0 | every line of the chunk |

use claimflow_client::EventPublisher;
use claimflow_metadata::{ChunkDescriptor, ChunkResult};
use claimflow_observability::metrics;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ChunkProcessor {
    publisher: Arc<EventPublisher>,
}

impl ChunkProcessor {
    pub fn new(publisher: Arc<EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Reachability of the stream behind the publisher.
    pub async fn ping(&self) -> claimflow_client::Result<()> {
        self.publisher.ping().await
    }

    pub async fn process(&self, descriptor: &ChunkDescriptor) -> ChunkResult {
        let started_at = now_ms();
        let timer = metrics::CHUNK_LATENCY.start_timer();
        metrics::CHUNKS_IN_FLIGHT.inc();

        let publisher = self.publisher.clone();
        let task_descriptor = descriptor.clone();
        let outcome =
            tokio::spawn(async move { publisher.publish(&task_descriptor).await }).await;

        metrics::CHUNKS_IN_FLIGHT.dec();
        timer.observe_duration();
        let completed_at = now_ms();

        let result = match outcome {
            Ok(Ok(report)) => ChunkResult {
                run_id: descriptor.run_id,
                tenant_id: descriptor.tenant_id.clone(),
                chunk_id: descriptor.chunk_id.clone(),
                success: true,
                lines_processed: report.lines_published,
                lines_failed: report.lines_malformed,
                error: None,
                started_at,
                completed_at,
            },
            Ok(Err(e)) => ChunkResult::failed(descriptor, e.to_string(), started_at, completed_at),
            Err(join_error) => ChunkResult::failed(
                descriptor,
                format!("chunk task aborted: {}", join_error),
                started_at,
                completed_at,
            ),
        };

        if result.success {
            metrics::CHUNKS_PROCESSED_TOTAL
                .with_label_values(&["success"])
                .inc();
            info!(
                run_id = descriptor.run_id,
                chunk_id = %descriptor.chunk_id,
                lines_processed = result.lines_processed,
                lines_failed = result.lines_failed,
                duration_ms = completed_at - started_at,
                "Chunk processed"
            );
        } else {
            metrics::CHUNKS_PROCESSED_TOTAL
                .with_label_values(&["failure"])
                .inc();
            warn!(
                run_id = descriptor.run_id,
                chunk_id = %descriptor.chunk_id,
                error = result.error.as_deref().unwrap_or_default(),
                "Chunk failed"
            );
        }

        result
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
