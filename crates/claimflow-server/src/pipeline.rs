//! Pipeline
//!
//! Wires every component from one validated [`PipelineConfig`] and exposes
//! the trigger and query surface.
//!
//! ```text
//! schedule_run ─► RunCoordinator ─► ChunkWriter ─► object store
//!                      │
//!                      └─► ChunkProcessor ─► EventPublisher ─► StreamTransport
//!                                                                  │
//! drain_consumers / spawn_consumers ─► ConsumerHost ◄──────────────┘
//!                                          │
//! entity_state ──────────────────────► ActorRegistry ─► MetadataStore
//! ```

use crate::config::PipelineConfig;
use crate::coordinator::RunCoordinator;
use crate::error::{CoordinatorError, Result};
use crate::processor::ChunkProcessor;
use claimflow_agent::{ActorRegistry, ConsumerHost, DEFAULT_MAILBOX_CAPACITY};
use claimflow_client::{EventPublisher, StreamTransport};
use claimflow_core::{EntityId, EntityState, PartitionRouter};
use claimflow_metadata::{MetadataStore, Run, RunSummary};
use claimflow_storage::{ChunkReader, ChunkWriter};
use object_store::ObjectStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Pipeline {
    config: PipelineConfig,
    metadata_store: Arc<dyn MetadataStore>,
    coordinator: RunCoordinator,
    consumers: Arc<ConsumerHost>,
}

impl Pipeline {
    /// Validate `config` and build every component from it.
    ///
    /// # Errors
    ///
    /// `Config`, `Storage` or `Client` when the configuration is invalid or
    /// does not fit the transport.
    pub fn new(
        config: PipelineConfig,
        object_store: Arc<dyn ObjectStore>,
        metadata_store: Arc<dyn MetadataStore>,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let router = PartitionRouter::new(config.partition_count)
            .map_err(|e| CoordinatorError::Config(e.to_string()))?;

        let writer = Arc::new(ChunkWriter::new(object_store.clone(), config.storage.clone()));
        let reader = Arc::new(ChunkReader::new(object_store, config.storage.clone()));
        let publisher = EventPublisher::new(
            transport.clone(),
            reader,
            router,
            config.publisher.clone(),
            config.retry.clone(),
        )?;

        let coordinator = RunCoordinator::new(
            metadata_store.clone(),
            writer,
            ChunkProcessor::new(Arc::new(publisher)),
            config.max_parallel_chunks,
            config.retry.clone(),
        );

        let consumers = Arc::new(ConsumerHost::new(
            transport,
            metadata_store.clone(),
            Arc::new(ActorRegistry::with_limits(
                metadata_store.clone(),
                DEFAULT_MAILBOX_CAPACITY,
                config.consumer.actor_idle_timeout,
            )),
            config.consumer.clone(),
        ));

        Ok(Self {
            config,
            metadata_store,
            coordinator,
            consumers,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a run for `file_name`. Duplicate calls create independent runs.
    pub async fn schedule_run(&self, tenant_id: &str, file_name: &str) -> Result<i64> {
        self.coordinator.schedule(tenant_id, file_name).await
    }

    /// Drive a run to completion (or resume it). See [`RunCoordinator::execute`].
    pub async fn execute_run(&self, run_id: i64, cancel: watch::Receiver<bool>) -> Result<RunSummary> {
        self.coordinator.execute(run_id, cancel).await
    }

    pub async fn run(&self, run_id: i64) -> Result<Option<Run>> {
        Ok(self.metadata_store.get_run(run_id).await?)
    }

    /// Summary of a terminal run; `None` while the run is still in progress.
    pub async fn run_summary(&self, run_id: i64) -> Result<Option<RunSummary>> {
        if self.metadata_store.get_run(run_id).await?.is_none() {
            return Err(CoordinatorError::RunNotFound(run_id));
        }
        Ok(self.metadata_store.get_run_summary(run_id).await?)
    }

    /// Read an entity through its actor; `None` if it was never written.
    pub async fn entity_state(&self, entity_id: EntityId) -> Result<Option<EntityState>> {
        let state = self.consumers.registry().read_state(entity_id).await?;
        if state.is_empty() {
            return Ok(None);
        }
        Ok(Some(state))
    }

    /// Administrative replacement of an entity's state, through its actor.
    pub async fn replace_entity_state(&self, state: EntityState) -> Result<()> {
        self.consumers.registry().replace_state(state).await?;
        Ok(())
    }

    /// Apply every event published so far. Returns the messages handled.
    pub async fn drain_consumers(&self) -> Result<u64> {
        Ok(self.consumers.drain(&self.config.retry).await?)
    }

    /// Consume continuously in the background until `shutdown` flips.
    pub fn spawn_consumers(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<claimflow_agent::Result<()>> {
        self.consumers.clone().spawn(shutdown)
    }
}
