//! Stream Consumers
//!
//! One [`PartitionConsumer`] per stream partition decodes Claim Events and
//! forwards them to the owning entity actor. [`ConsumerHost`] drives them:
//! it pumps each partition from the consumer group's last committed
//! checkpoint and commits after every handled batch.
//!
//! Checkpoints are stored under `{consumer_group}@{log_id}`: an offset is
//! only valid for the log that assigned it, and a transport whose log starts
//! over (a new in-memory stream per process) must not resume from offsets
//! committed against the previous one.
//!
//! ## Pump Loop (per partition)
//!
//! ```text
//! checkpoint = get_checkpoint(group@log, p) or 0
//!     ↓
//! fetch(p, checkpoint, fetch_max)
//!     ↓
//! for each message:
//!     foreign namespace  → skip, acknowledge
//!     undecodable        → log, count, acknowledge
//!     decoded            → actor.apply_update (awaits durability)
//!     ↓
//! commit_checkpoint(group@log, p, last_offset + 1)
//! ```
//!
//! ## Delivery
//!
//! At-least-once. A forwarding failure abandons the batch without committing,
//! so the whole batch is fetched again after a backoff. Entity actors absorb
//! the redelivered updates because merging is idempotent.
//!
//! Decode failures are acknowledged: the payload will never become valid, and
//! retrying it would block the partition forever.

use crate::actor::{ActorRegistry, ApplyOutcome, DEFAULT_IDLE_TIMEOUT};
use crate::error::{AgentError, Result};
use claimflow_client::{retry_with_backoff, RetryPolicy, StoredMessage, StreamTransport};
use claimflow_core::{ClaimEvent, EntityUpdate, DEFAULT_STREAM_NAMESPACE};
use claimflow_metadata::MetadataStore;
use claimflow_observability::metrics;
use dashmap::DashMap;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Applied,
    Duplicate,
    /// Message belongs to another logical stream
    Skipped,
    /// Payload could not be decoded; dropped
    Dropped,
}

/// Consumer of a single partition.
pub struct PartitionConsumer {
    partition: u32,
    namespace: Arc<str>,
    registry: Arc<ActorRegistry>,
}

impl PartitionConsumer {
    pub fn new(partition: u32, namespace: Arc<str>, registry: Arc<ActorRegistry>) -> Self {
        Self {
            partition,
            namespace,
            registry,
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Handle one delivered message.
    ///
    /// # Errors
    ///
    /// Only forwarding errors from the entity actor. Decode failures are
    /// reported as [`Delivery::Dropped`].
    pub async fn handle(&self, stored: &StoredMessage) -> Result<Delivery> {
        let message = &stored.message;

        if message.namespace != self.namespace {
            debug!(
                partition = self.partition,
                offset = stored.offset,
                namespace = %message.namespace,
                "Skipping message from foreign namespace"
            );
            return Ok(Delivery::Skipped);
        }

        let update = match ClaimEvent::decode(&message.payload)
            .and_then(|event| EntityUpdate::from_event(&event))
        {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    partition = self.partition,
                    offset = stored.offset,
                    error = %e,
                    "Dropping undecodable event"
                );
                metrics::DECODE_FAILURES_TOTAL.inc();
                return Ok(Delivery::Dropped);
            }
        };

        let entity_id = update.entity_id;
        match self.registry.apply_update(update).await {
            Ok(ApplyOutcome::Applied) => Ok(Delivery::Applied),
            Ok(ApplyOutcome::Duplicate) => Ok(Delivery::Duplicate),
            Err(e) => {
                warn!(
                    partition = self.partition,
                    offset = stored.offset,
                    entity_id = %entity_id,
                    error = %e,
                    "Failed to forward update to entity actor"
                );
                Err(e)
            }
        }
    }
}

/// Consumer host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Group the checkpoints are stored under (default: "entity-actors")
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Maximum messages fetched per pump (default: 500)
    #[serde(default = "default_fetch_max")]
    pub fetch_max: usize,

    /// Pause before re-fetching after a failed batch (default: 100ms)
    #[serde(default = "default_error_backoff", with = "millis")]
    pub error_backoff: Duration,

    /// Namespace this host consumes (default: "PetClaim")
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Entity actors deactivate after this long without a request
    /// (default: 5 minutes)
    #[serde(default = "default_actor_idle_timeout", with = "millis")]
    pub actor_idle_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_group: default_consumer_group(),
            fetch_max: default_fetch_max(),
            error_backoff: default_error_backoff(),
            namespace: default_namespace(),
            actor_idle_timeout: default_actor_idle_timeout(),
        }
    }
}

fn default_consumer_group() -> String {
    "entity-actors".to_string()
}

fn default_fetch_max() -> usize {
    500
}

fn default_error_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_namespace() -> String {
    DEFAULT_STREAM_NAMESPACE.to_string()
}

fn default_actor_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Outcome of one pump over a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOutcome {
    /// Messages handled and committed
    pub handled: usize,
    /// Checkpoint after the pump
    pub next_offset: u64,
}

/// Owns the partition consumers and their pumps.
pub struct ConsumerHost {
    transport: Arc<dyn StreamTransport>,
    metadata_store: Arc<dyn MetadataStore>,
    registry: Arc<ActorRegistry>,
    consumers: DashMap<u32, Arc<PartitionConsumer>>,
    namespace: Arc<str>,
    checkpoint_group: String,
    config: ConsumerConfig,
}

impl ConsumerHost {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        metadata_store: Arc<dyn MetadataStore>,
        registry: Arc<ActorRegistry>,
        config: ConsumerConfig,
    ) -> Self {
        let namespace = Arc::from(config.namespace.as_str());
        let checkpoint_group = format!("{}@{}", config.consumer_group, transport.log_id());
        Self {
            transport,
            metadata_store,
            registry,
            consumers: DashMap::new(),
            namespace,
            checkpoint_group,
            config,
        }
    }

    /// Key the checkpoints of this host are committed under
    pub fn checkpoint_group(&self) -> &str {
        &self.checkpoint_group
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    /// Partitions that have seen at least one message
    pub fn active_partitions(&self) -> Vec<u32> {
        let mut partitions: Vec<u32> = self.consumers.iter().map(|e| *e.key()).collect();
        partitions.sort_unstable();
        partitions
    }

    fn consumer(&self, partition: u32) -> Arc<PartitionConsumer> {
        self.consumers
            .entry(partition)
            .or_insert_with(|| {
                debug!(partition, "Creating partition consumer");
                Arc::new(PartitionConsumer::new(
                    partition,
                    self.namespace.clone(),
                    self.registry.clone(),
                ))
            })
            .clone()
    }

    /// Fetch and handle one batch of a partition, then commit.
    pub async fn pump_once(&self, partition: u32) -> Result<PumpOutcome> {
        let group = self.checkpoint_group.as_str();
        let from = self
            .metadata_store
            .get_checkpoint(group, partition)
            .await?
            .unwrap_or(0);

        let messages = self
            .transport
            .fetch(partition, from, self.config.fetch_max)
            .await?;
        if messages.is_empty() {
            return Ok(PumpOutcome {
                handled: 0,
                next_offset: from,
            });
        }

        let consumer = self.consumer(partition);
        let label = partition.to_string();
        let mut next_offset = from;

        for stored in &messages {
            consumer.handle(stored).await?;
            metrics::CONSUMER_MESSAGES_TOTAL
                .with_label_values(&[&label])
                .inc();
            next_offset = stored.offset + 1;
        }

        self.metadata_store
            .commit_checkpoint(group, partition, next_offset)
            .await?;

        Ok(PumpOutcome {
            handled: messages.len(),
            next_offset,
        })
    }

    /// Pump every partition until it is caught up with its high watermark.
    ///
    /// Failed batches are retried per `retry_policy`. Returns the number of
    /// messages handled.
    pub async fn drain(&self, retry_policy: &RetryPolicy) -> Result<u64> {
        let partitions = 0..self.transport.partition_count();
        let counts = try_join_all(
            partitions.map(|partition| self.drain_partition(partition, retry_policy)),
        )
        .await?;

        let total: u64 = counts.into_iter().sum();
        debug!(messages = total, "Consumers drained");
        Ok(total)
    }

    async fn drain_partition(&self, partition: u32, retry_policy: &RetryPolicy) -> Result<u64> {
        let high_watermark = self.transport.high_watermark(partition).await?;
        let mut handled = 0u64;

        loop {
            let outcome = retry_with_backoff(retry_policy, || self.pump_once(partition)).await?;
            handled += outcome.handled as u64;
            if outcome.handled == 0 || outcome.next_offset >= high_watermark {
                return Ok(handled);
            }
        }
    }

    /// Run a pump per partition in the background until `shutdown` flips to
    /// `true` (or its sender is dropped).
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let pumps: Vec<_> = (0..self.transport.partition_count())
                .map(|partition| {
                    let host = self.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move { host.run_partition(partition, shutdown).await })
                })
                .collect();

            for pump in pumps {
                pump.await?;
            }
            info!("Consumer host stopped");
            Ok::<(), AgentError>(())
        })
    }

    async fn run_partition(&self, partition: u32, mut shutdown: watch::Receiver<bool>) {
        debug!(partition, "Partition pump started");

        while !*shutdown.borrow() {
            match self.pump_once(partition).await {
                Ok(outcome) if outcome.handled > 0 => continue,
                Ok(outcome) => {
                    // Caught up: park until the next offset exists
                    tokio::select! {
                        result = self.transport.wait_for(partition, outcome.next_offset) => {
                            if let Err(e) = result {
                                warn!(partition, error = %e, "Partition closed");
                                break;
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        partition,
                        error = %e,
                        backoff_ms = self.config.error_backoff.as_millis() as u64,
                        "Batch failed, will redeliver"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!(partition, "Partition pump stopped");
    }
}
