//! Event Publisher
//!
//! Turns the rows of one chunk into Claim Events on the stream.
//!
//! ## Publish Flow
//!
//! ```text
//! publish(descriptor)
//!     ↓
//! ChunkReader::read → header + raw rows
//!     ↓
//! for each row:
//!     decode ──✗ row error──► lines_malformed += 1, skip
//!     ↓
//!     partition = router.partition_for(entity_id)
//!     ↓
//!     batches[partition].try_add(message)
//!         └─ full? flush it, open a fresh batch, try once more
//!     ↓
//! flush every non-empty batch (ascending partition)
//! ```
//!
//! ## Guarantees
//!
//! - All rows of one entity land on the same partition, in file order
//! - A transient transport failure is retried with jittered backoff
//! - Any error returned from [`EventPublisher::publish`] fails the whole chunk;
//!   events already sent for it stay on the stream
//!
//! Batches are private to one `publish` call, so concurrent calls for
//! different chunks share nothing but the transport.

use crate::batch::{EventBatch, StreamMessage, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_MESSAGES};
use crate::error::{ClientError, Result};
use crate::retry::{retry_with_jittered_backoff, RetryPolicy};
use crate::transport::StreamTransport;
use claimflow_core::{ClaimEvent, Header, PartitionRouter, RawRecord, DEFAULT_STREAM_NAMESPACE};
use claimflow_metadata::ChunkDescriptor;
use claimflow_observability::metrics;
use claimflow_storage::ChunkReader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publisher configuration.
///
/// The effective byte limit of a batch is the smaller of `max_batch_bytes`
/// and the transport's own limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Maximum batch size in bytes (default: 1 MiB)
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Maximum messages per batch (default: 1000)
    #[serde(default = "default_max_batch_messages")]
    pub max_batch_messages: usize,

    /// Namespace tag stamped on every message (default: "PetClaim")
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: default_max_batch_bytes(),
            max_batch_messages: default_max_batch_messages(),
            namespace: default_namespace(),
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_bytes == 0 {
            return Err(ClientError::ConfigError(
                "max_batch_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_batch_messages == 0 {
            return Err(ClientError::ConfigError(
                "max_batch_messages must be greater than zero".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(ClientError::ConfigError(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_batch_bytes() -> usize {
    DEFAULT_MAX_BATCH_BYTES
}

fn default_max_batch_messages() -> usize {
    DEFAULT_MAX_BATCH_MESSAGES
}

fn default_namespace() -> String {
    DEFAULT_STREAM_NAMESPACE.to_string()
}

/// Outcome of publishing one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Rows decoded and sent
    pub lines_published: u64,
    /// Rows that failed to decode and were skipped
    pub lines_malformed: u64,
    pub batches_sent: u64,
}

pub struct EventPublisher {
    transport: Arc<dyn StreamTransport>,
    reader: Arc<ChunkReader>,
    router: PartitionRouter,
    config: PublisherConfig,
    retry_policy: RetryPolicy,
    namespace: Arc<str>,
    max_batch_bytes: usize,
}

impl EventPublisher {
    /// # Errors
    ///
    /// `ConfigError` if the configuration is invalid or the router addresses
    /// more partitions than the transport has.
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        reader: Arc<ChunkReader>,
        router: PartitionRouter,
        config: PublisherConfig,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        config.validate()?;

        if router.partition_count() > transport.partition_count() {
            return Err(ClientError::ConfigError(format!(
                "router uses {} partitions but the transport only has {}",
                router.partition_count(),
                transport.partition_count()
            )));
        }

        let max_batch_bytes = config.max_batch_bytes.min(transport.max_batch_bytes());
        let namespace = Arc::from(config.namespace.as_str());

        Ok(Self {
            transport,
            reader,
            router,
            config,
            retry_policy,
            namespace,
            max_batch_bytes,
        })
    }

    pub fn router(&self) -> PartitionRouter {
        self.router
    }

    /// Check that the stream transport answers.
    pub async fn ping(&self) -> Result<()> {
        self.transport.ping().await
    }

    /// Read a chunk from storage and publish all of its rows.
    pub async fn publish(&self, descriptor: &ChunkDescriptor) -> Result<PublishReport> {
        let contents = self.reader.read(descriptor).await?;

        if contents.rows.len() as u64 != descriptor.line_count {
            warn!(
                run_id = descriptor.run_id,
                chunk_id = %descriptor.chunk_id,
                expected = descriptor.line_count,
                actual = contents.rows.len(),
                "Chunk row count differs from descriptor"
            );
        }

        self.publish_rows(descriptor, &contents.header, &contents.rows)
            .await
    }

    /// Publish already-loaded rows on behalf of `descriptor`.
    ///
    /// Rows that fail with a row error (bad field count, bad field value,
    /// unterminated quote, invalid UTF-8) are skipped and counted.
    pub async fn publish_rows(
        &self,
        descriptor: &ChunkDescriptor,
        header: &Header,
        rows: &[RawRecord],
    ) -> Result<PublishReport> {
        let mut report = PublishReport::default();
        let mut batches: BTreeMap<u32, EventBatch> = BTreeMap::new();

        for (i, row) in rows.iter().enumerate() {
            let record = match row.as_text().and_then(|text| header.decode(text)) {
                Ok(record) => record,
                Err(e) if !e.is_row_error() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        run_id = descriptor.run_id,
                        chunk_id = %descriptor.chunk_id,
                        line = descriptor.line_start + i as u64,
                        error = %e,
                        "Skipping malformed row"
                    );
                    metrics::RECORDS_MALFORMED_TOTAL.inc();
                    report.lines_malformed += 1;
                    continue;
                }
            };

            let entity_id = record.entity_id();
            let partition = self.router.partition_for(&entity_id);
            let event = ClaimEvent::new(descriptor.run_id, &descriptor.tenant_id, &record, partition)?;
            let message = StreamMessage::new(
                partition,
                entity_id.to_string(),
                self.namespace.clone(),
                event.encode()?,
            );

            let batch = batches
                .entry(partition)
                .or_insert_with(|| self.new_batch(partition));

            if !batch.try_add(&message) {
                if batch.is_empty() {
                    return Err(self.too_large(&message));
                }

                let full = std::mem::replace(batch, self.new_batch(partition));
                self.flush(full).await?;
                report.batches_sent += 1;

                if !batch.try_add(&message) {
                    return Err(self.too_large(&message));
                }
            }

            report.lines_published += 1;
        }

        for (_, batch) in batches {
            if batch.is_empty() {
                continue;
            }
            self.flush(batch).await?;
            report.batches_sent += 1;
        }

        metrics::RECORDS_PUBLISHED_TOTAL.inc_by(report.lines_published);

        debug!(
            run_id = descriptor.run_id,
            chunk_id = %descriptor.chunk_id,
            published = report.lines_published,
            malformed = report.lines_malformed,
            batches = report.batches_sent,
            "Chunk published"
        );

        Ok(report)
    }

    fn new_batch(&self, partition: u32) -> EventBatch {
        EventBatch::new(partition, self.max_batch_bytes, self.config.max_batch_messages)
    }

    fn too_large(&self, message: &StreamMessage) -> ClientError {
        ClientError::RecordTooLarge {
            size: message.size_bytes(),
            max: self.max_batch_bytes,
        }
    }

    async fn flush(&self, batch: EventBatch) -> Result<u64> {
        let partition = batch.partition();
        let len = batch.len();

        let result = retry_with_jittered_backoff(&self.retry_policy, || {
            let batch = batch.clone();
            async move {
                let result = self.transport.send(batch).await;
                if let Err(ref e) = result {
                    if e.is_retryable() {
                        metrics::PUBLISH_ERRORS_TOTAL
                            .with_label_values(&["retry"])
                            .inc();
                    }
                }
                result
            }
        })
        .await;

        match result {
            Ok(base_offset) => {
                metrics::BATCHES_FLUSHED_TOTAL
                    .with_label_values(&[&partition.to_string()])
                    .inc();
                metrics::BATCH_SIZE.observe(len as f64);
                debug!(partition, base_offset, messages = len, "Batch flushed");
                Ok(base_offset)
            }
            Err(e) => {
                metrics::PUBLISH_ERRORS_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                Err(e)
            }
        }
    }
}
