//! Stream Transport
//!
//! The partitioned, at-least-once stream between the publisher and the
//! consumers. Each partition is an append-only log; messages get offsets in
//! send order and stay readable so a consumer can re-fetch from its last
//! committed checkpoint after a failure.
//!
//! ```text
//!  EventPublisher ── send(batch) ──► partition 0: [0][1][2][3] ...
//!                                    partition 1: [0][1] ...
//!                                    ...
//!                                    partition N: [0][1][2] ...
//!                                          ▲
//!  ConsumerHost ── fetch(p, offset) ───────┘
//! ```
//!
//! [`InMemoryTransport`] is the process-local implementation used by the
//! CLI and tests.
//!
//! ## Log Identity
//!
//! Offsets only mean something for the log that assigned them. Every
//! transport reports a [`StreamTransport::log_id`]; consumers scope their
//! stored checkpoints by it, so a checkpoint taken against one in-memory
//! log is never applied to a fresh one that restarted at offset 0.

use crate::batch::{EventBatch, StoredMessage, DEFAULT_MAX_BATCH_BYTES};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Number of partitions; valid partition ids are `0..partition_count()`
    fn partition_count(&self) -> u32;

    /// Identity of the log behind this transport. Stable for as long as its
    /// offsets are; a durable log keeps it across restarts.
    fn log_id(&self) -> &str;

    /// Largest batch, in bytes, the transport accepts in one send
    fn max_batch_bytes(&self) -> usize;

    /// Append a batch to its partition.
    ///
    /// Returns the offset assigned to the first message. All messages of
    /// the batch are appended contiguously and in order.
    async fn send(&self, batch: EventBatch) -> Result<u64>;

    /// Read up to `max` messages of a partition starting at `from_offset`.
    async fn fetch(&self, partition: u32, from_offset: u64, max: usize)
        -> Result<Vec<StoredMessage>>;

    /// Offset the next appended message will get.
    async fn high_watermark(&self, partition: u32) -> Result<u64>;

    /// Resolve once a message with offset `offset` exists in the partition.
    async fn wait_for(&self, partition: u32, offset: u64) -> Result<()>;

    /// Check that the transport answers at all.
    async fn ping(&self) -> Result<()> {
        self.high_watermark(0).await.map(|_| ())
    }
}

struct PartitionLog {
    messages: RwLock<Vec<StoredMessage>>,
    /// Publishes the high watermark after every append
    watermark: watch::Sender<u64>,
}

/// Process-local stream transport.
pub struct InMemoryTransport {
    log_id: String,
    partitions: Vec<PartitionLog>,
    max_batch_bytes: usize,
}

impl InMemoryTransport {
    pub fn new(partition_count: u32) -> Self {
        Self::with_max_batch_bytes(partition_count, DEFAULT_MAX_BATCH_BYTES)
    }

    pub fn with_max_batch_bytes(partition_count: u32, max_batch_bytes: usize) -> Self {
        let partitions = (0..partition_count)
            .map(|_| PartitionLog {
                messages: RwLock::new(Vec::new()),
                watermark: watch::channel(0).0,
            })
            .collect();

        Self {
            log_id: format!("mem-{}", Uuid::new_v4()),
            partitions,
            max_batch_bytes,
        }
    }

    fn log(&self, partition: u32) -> Result<&PartitionLog> {
        self.partitions
            .get(partition as usize)
            .ok_or(ClientError::InvalidPartition {
                partition,
                partition_count: self.partitions.len() as u32,
            })
    }
}

#[async_trait]
impl StreamTransport for InMemoryTransport {
    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn log_id(&self) -> &str {
        &self.log_id
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    async fn send(&self, batch: EventBatch) -> Result<u64> {
        if batch.size_bytes() > self.max_batch_bytes {
            return Err(ClientError::Rejected(format!(
                "batch of {} bytes exceeds limit of {} bytes",
                batch.size_bytes(),
                self.max_batch_bytes
            )));
        }

        let partition = batch.partition();
        let log = self.log(partition)?;
        let mut messages = log.messages.write().await;

        let base_offset = messages.len() as u64;
        for (i, message) in batch.into_messages().into_iter().enumerate() {
            messages.push(StoredMessage {
                offset: base_offset + i as u64,
                message,
            });
        }
        let high_watermark = messages.len() as u64;
        drop(messages);

        log.watermark.send_replace(high_watermark);
        tracing::trace!(partition, base_offset, high_watermark, "Batch appended");

        Ok(base_offset)
    }

    async fn fetch(
        &self,
        partition: u32,
        from_offset: u64,
        max: usize,
    ) -> Result<Vec<StoredMessage>> {
        let log = self.log(partition)?;
        let messages = log.messages.read().await;

        let start = (from_offset as usize).min(messages.len());
        let end = start.saturating_add(max).min(messages.len());
        Ok(messages[start..end].to_vec())
    }

    async fn high_watermark(&self, partition: u32) -> Result<u64> {
        Ok(*self.log(partition)?.watermark.borrow())
    }

    async fn wait_for(&self, partition: u32, offset: u64) -> Result<()> {
        let mut rx = self.log(partition)?.watermark.subscribe();
        loop {
            if *rx.borrow_and_update() > offset {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(ClientError::Transport(format!(
                    "partition {} closed",
                    partition
                )));
            }
        }
    }
}
