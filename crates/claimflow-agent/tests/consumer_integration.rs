//! Consumer host and entity actors end to end over the in-memory transport.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use claimflow_agent::{ActorRegistry, ConsumerConfig, ConsumerHost};
use claimflow_client::{EventBatch, InMemoryTransport, RetryPolicy, StreamMessage, StreamTransport};
use claimflow_core::{ClaimEvent, ClaimRecord, EntityId, EntityState, PartitionRouter};
use claimflow_metadata::{
    ChunkDescriptor, ChunkRecord, ChunkResult, ConsumerCheckpoint, MetadataError, MetadataStore,
    Run, RunState, RunSummary, SqliteMetadataStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PARTITIONS: u32 = 4;

fn record(pet: EntityId, claim: &str, cents: i64, day: u32) -> ClaimRecord {
    let ts = Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap();
    ClaimRecord {
        policy_number: "POL-9".to_string(),
        pet_id: pet,
        claim_id: claim.to_string(),
        customer_name: "Sam".to_string(),
        claim_amount_cents: cents,
        date_of_loss: ts,
        claim_date: ts,
        status: "Open".to_string(),
        description: String::new(),
        term_number: None,
        approved_amount_cents: None,
        veterinarian: None,
    }
}

fn message(partition: u32, key: &str, namespace: &str, payload: Bytes) -> StreamMessage {
    StreamMessage::new(partition, key.to_string(), Arc::from(namespace), payload)
}

async fn publish(transport: &InMemoryTransport, records: &[ClaimRecord]) -> u32 {
    let router = PartitionRouter::new(PARTITIONS).unwrap();
    let mut last = 0;
    for r in records {
        let partition = router.partition_for(&r.pet_id);
        let event = ClaimEvent::new(7, "tenant-a", r, partition).unwrap();
        send(
            transport,
            message(partition, &r.pet_id.to_string(), "PetClaim", event.encode().unwrap()),
        )
        .await;
        last = partition;
    }
    last
}

/// Publish onto a single-partition log, whatever the router says.
async fn publish_all(transport: &InMemoryTransport, records: &[ClaimRecord]) {
    for r in records {
        let event = ClaimEvent::new(7, "tenant-a", r, 0).unwrap();
        send(
            transport,
            message(0, &r.pet_id.to_string(), "PetClaim", event.encode().unwrap()),
        )
        .await;
    }
}

async fn send(transport: &InMemoryTransport, message: StreamMessage) {
    let mut batch = EventBatch::new(message.partition, usize::MAX, usize::MAX);
    assert!(batch.try_add(&message));
    transport.send(batch).await.unwrap();
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5), 2.0)
}

fn host(transport: Arc<InMemoryTransport>, store: Arc<dyn MetadataStore>) -> ConsumerHost {
    ConsumerHost::new(
        transport,
        store.clone(),
        Arc::new(ActorRegistry::new(store)),
        ConsumerConfig {
            fetch_max: 2,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_drain_applies_events_and_commits_checkpoints() {
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
    let transport = Arc::new(InMemoryTransport::new(PARTITIONS));
    let pet = EntityId::new(uuid::Uuid::new_v4());

    let partition = publish(
        &transport,
        &[
            record(pet, "C1", 100, 1),
            record(pet, "C2", 200, 2),
            record(pet, "C3", 300, 3),
        ],
    )
    .await;

    let host = host(transport.clone(), store.clone());
    assert_eq!(host.drain(&fast_retries()).await.unwrap(), 3);
    assert_eq!(host.active_partitions(), vec![partition]);

    let state = store.load_entity_state(&pet).await.unwrap().unwrap();
    assert_eq!(state.claims.len(), 3);
    assert_eq!(store.get_checkpoint(host.checkpoint_group(), partition).await.unwrap(), Some(3));

    // Nothing new: a second drain handles nothing
    assert_eq!(host.drain(&fast_retries()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_out_of_order_revisions_converge_to_latest() {
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
    let transport = Arc::new(InMemoryTransport::new(PARTITIONS));
    let pet = EntityId::new(uuid::Uuid::new_v4());

    // Later revision first, as when chunk B is published before chunk A
    publish(&transport, &[record(pet, "C1", 150, 10)]).await;
    publish(&transport, &[record(pet, "C1", 100, 1)]).await;

    let host = host(transport, store.clone());
    host.drain(&fast_retries()).await.unwrap();

    let state = host.registry().read_state(pet).await.unwrap();
    assert_eq!(state.claims.len(), 1);
    assert_eq!(state.claim("C1").unwrap().claimed_amount_cents, 150);
}

#[tokio::test]
async fn test_redelivered_events_are_absorbed() {
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
    let transport = Arc::new(InMemoryTransport::new(PARTITIONS));
    let pet = EntityId::new(uuid::Uuid::new_v4());

    let records = [record(pet, "C1", 100, 1), record(pet, "C2", 200, 2)];
    publish(&transport, &records).await;
    publish(&transport, &records).await;

    let host = host(transport, store.clone());
    assert_eq!(host.drain(&fast_retries()).await.unwrap(), 4);

    let state = store.load_entity_state(&pet).await.unwrap().unwrap();
    assert_eq!(state.claims.len(), 2);
}

#[tokio::test]
async fn test_new_log_ignores_checkpoints_of_a_previous_log() {
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
    let first_pet = EntityId::new(uuid::Uuid::new_v4());
    let second_pet = EntityId::new(uuid::Uuid::new_v4());

    // First process: a long log, fully drained and committed
    let first_log = Arc::new(InMemoryTransport::new(1));
    let records: Vec<ClaimRecord> = (1..=5)
        .map(|day| record(first_pet, &format!("C{day}"), 100, day))
        .collect();
    publish_all(&first_log, &records).await;
    let first = host(first_log, store.clone());
    assert_eq!(first.drain(&fast_retries()).await.unwrap(), 5);
    assert_eq!(store.get_checkpoint(first.checkpoint_group(), 0).await.unwrap(), Some(5));

    // Second process: a fresh log that restarted at offset 0 and is shorter
    let second_log = Arc::new(InMemoryTransport::new(1));
    publish_all(&second_log, &[record(second_pet, "D1", 50, 1), record(second_pet, "D2", 60, 2)])
        .await;
    let second = host(second_log, store.clone());
    assert_ne!(second.checkpoint_group(), first.checkpoint_group());
    assert_eq!(second.drain(&fast_retries()).await.unwrap(), 2);

    let state = store.load_entity_state(&second_pet).await.unwrap().unwrap();
    assert_eq!(state.claims.len(), 2);
    assert_eq!(store.get_checkpoint(second.checkpoint_group(), 0).await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_bad_payloads_and_foreign_namespaces_are_acknowledged() {
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
    let transport = Arc::new(InMemoryTransport::new(PARTITIONS));
    let pet = EntityId::new(uuid::Uuid::new_v4());
    let partition = PartitionRouter::new(PARTITIONS).unwrap().partition_for(&pet);

    send(&transport, message(partition, "x", "PetClaim", Bytes::from_static(b"{not json"))).await;
    send(&transport, message(partition, "x", "Invoices", Bytes::from_static(b"{}"))).await;
    publish(&transport, &[record(pet, "C1", 100, 1)]).await;

    let host = host(transport, store.clone());
    assert_eq!(host.drain(&fast_retries()).await.unwrap(), 3);

    assert_eq!(store.get_checkpoint(host.checkpoint_group(), partition).await.unwrap(), Some(3));
    let state = store.load_entity_state(&pet).await.unwrap().unwrap();
    assert_eq!(state.claims.len(), 1);
}

/// Delegates to SQLite but fails the first `failures` entity writes.
struct FlakyEntityStore {
    inner: SqliteMetadataStore,
    failures: usize,
    writes: AtomicUsize,
}

#[async_trait]
impl MetadataStore for FlakyEntityStore {
    async fn create_run(&self, tenant_id: &str, file_name: &str) -> claimflow_metadata::Result<Run> {
        self.inner.create_run(tenant_id, file_name).await
    }

    async fn get_run(&self, run_id: i64) -> claimflow_metadata::Result<Option<Run>> {
        self.inner.get_run(run_id).await
    }

    async fn update_run_state(&self, run_id: i64, state: RunState) -> claimflow_metadata::Result<()> {
        self.inner.update_run_state(run_id, state).await
    }

    async fn record_chunks(
        &self,
        run_id: i64,
        descriptors: &[ChunkDescriptor],
    ) -> claimflow_metadata::Result<()> {
        self.inner.record_chunks(run_id, descriptors).await
    }

    async fn list_chunks(&self, run_id: i64) -> claimflow_metadata::Result<Vec<ChunkRecord>> {
        self.inner.list_chunks(run_id).await
    }

    async fn mark_chunk_dispatched(&self, run_id: i64, chunk_id: &str) -> claimflow_metadata::Result<()> {
        self.inner.mark_chunk_dispatched(run_id, chunk_id).await
    }

    async fn record_chunk_result(&self, result: &ChunkResult) -> claimflow_metadata::Result<()> {
        self.inner.record_chunk_result(result).await
    }

    async fn complete_run(&self, summary: &RunSummary) -> claimflow_metadata::Result<()> {
        self.inner.complete_run(summary).await
    }

    async fn get_run_summary(&self, run_id: i64) -> claimflow_metadata::Result<Option<RunSummary>> {
        self.inner.get_run_summary(run_id).await
    }

    async fn load_entity_state(&self, entity_id: &EntityId) -> claimflow_metadata::Result<Option<EntityState>> {
        self.inner.load_entity_state(entity_id).await
    }

    async fn save_entity_state(&self, state: &EntityState) -> claimflow_metadata::Result<()> {
        if self.writes.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(MetadataError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        self.inner.save_entity_state(state).await
    }

    async fn get_checkpoint(&self, group: &str, partition: u32) -> claimflow_metadata::Result<Option<u64>> {
        self.inner.get_checkpoint(group, partition).await
    }

    async fn commit_checkpoint(
        &self,
        group: &str,
        partition: u32,
        offset: u64,
    ) -> claimflow_metadata::Result<()> {
        self.inner.commit_checkpoint(group, partition, offset).await
    }

    async fn list_checkpoints(&self, group: &str) -> claimflow_metadata::Result<Vec<ConsumerCheckpoint>> {
        self.inner.list_checkpoints(group).await
    }
}

#[tokio::test]
async fn test_forwarding_failure_redelivers_without_committing() {
    let flaky = Arc::new(FlakyEntityStore {
        inner: SqliteMetadataStore::new_in_memory().await.unwrap(),
        failures: 1,
        writes: AtomicUsize::new(0),
    });
    let store: Arc<dyn MetadataStore> = flaky.clone();
    let transport = Arc::new(InMemoryTransport::new(PARTITIONS));
    let pet = EntityId::new(uuid::Uuid::new_v4());
    let partition = publish(&transport, &[record(pet, "C1", 100, 1)]).await;

    let host = host(transport, store.clone());

    // First pump hits the failing write and commits nothing
    assert!(host.pump_once(partition).await.is_err());
    assert_eq!(store.get_checkpoint(host.checkpoint_group(), partition).await.unwrap(), None);

    // The retry redelivers and succeeds
    assert_eq!(host.drain(&fast_retries()).await.unwrap(), 1);
    assert_eq!(store.get_checkpoint(host.checkpoint_group(), partition).await.unwrap(), Some(1));
    assert_eq!(flaky.writes.load(Ordering::SeqCst), 2);
    assert!(store.load_entity_state(&pet).await.unwrap().is_some());
}

#[tokio::test]
async fn test_background_pumps_follow_new_messages_until_shutdown() {
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new_in_memory().await.unwrap());
    let transport = Arc::new(InMemoryTransport::new(PARTITIONS));
    let host = Arc::new(host(transport.clone(), store.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = host.clone().spawn(shutdown_rx);

    let pet = EntityId::new(uuid::Uuid::new_v4());
    let partition = publish(&transport, &[record(pet, "C1", 100, 1)]).await;

    let mut committed = None;
    for _ in 0..200 {
        committed = store.get_checkpoint(host.checkpoint_group(), partition).await.unwrap();
        if committed == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(committed, Some(1));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
