//! Entity Actors
//!
//! Every entity has exactly one actor: a task that owns the entity's state
//! and works through a mailbox one request at a time. Serializing all calls
//! for an entity through its mailbox is what prevents lost updates; nothing
//! else reads or writes an entity's durable record.
//!
//! ## Request Flow
//!
//! ```text
//! caller ── ActorMessage + oneshot ──► mailbox ──► EntityActor task
//!                                                     │
//!                                                     ├─ load state (first request)
//!                                                     ├─ merge / replace / read
//!                                                     ├─ save_entity_state (if changed)
//!                                                     ▼
//! caller ◄────────────── reply ───────────────────────┘
//! ```
//!
//! A mutation is only acknowledged after the store has committed it. If the
//! write fails the in-memory state is left untouched and the caller gets the
//! error, so a redelivered update will be applied again.
//!
//! ## Registry
//!
//! [`ActorRegistry`] maps entity ids to actor handles and spawns actors
//! lazily, the first time an entity is addressed. An actor that receives
//! nothing for `idle_timeout` deactivates: it closes its mailbox, answers
//! whatever was already queued, drops its cached state and removes itself
//! from the registry. The next request for the entity spawns a fresh actor
//! that reloads the state from the store.

use crate::error::{AgentError, Result};
use claimflow_core::{EntityId, EntityState, EntityUpdate};
use claimflow_metadata::MetadataStore;
use claimflow_observability::metrics;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

/// Default mailbox capacity per actor
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default time an actor stays alive without receiving a request
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

type ActorMap = DashMap<EntityId, EntityActorHandle>;

/// Result of applying an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The state changed and was persisted
    Applied,
    /// The update was already reflected in the state; nothing was written
    Duplicate,
}

enum ActorMessage {
    Apply {
        update: EntityUpdate,
        reply: oneshot::Sender<Result<ApplyOutcome>>,
    },
    Replace {
        state: EntityState,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        reply: oneshot::Sender<Result<EntityState>>,
    },
}

/// Cloneable address of one entity actor.
#[derive(Clone)]
pub struct EntityActorHandle {
    entity_id: EntityId,
    sender: mpsc::Sender<ActorMessage>,
}

impl EntityActorHandle {
    /// Spawn the actor task for `entity_id`.
    ///
    /// Must be called from within a Tokio runtime. The task ends once every
    /// handle has been dropped.
    pub fn spawn(
        entity_id: EntityId,
        metadata_store: Arc<dyn MetadataStore>,
        mailbox_capacity: usize,
    ) -> Self {
        Self::spawn_inner(entity_id, metadata_store, mailbox_capacity, None, Weak::new())
    }

    fn spawn_inner(
        entity_id: EntityId,
        metadata_store: Arc<dyn MetadataStore>,
        mailbox_capacity: usize,
        idle_timeout: Option<Duration>,
        registry: Weak<ActorMap>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(mailbox_capacity.max(1));

        let actor = EntityActor {
            entity_id,
            metadata_store,
            state: None,
            receiver,
            idle_timeout,
            registry,
        };
        tokio::spawn(actor.run());

        Self { entity_id, sender }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }

    /// Merge an update into the entity's state.
    ///
    /// Returns once the merged state is durable.
    pub async fn apply_update(&self, update: EntityUpdate) -> Result<ApplyOutcome> {
        if update.entity_id != self.entity_id {
            return Err(AgentError::EntityMismatch {
                expected: self.entity_id,
                actual: update.entity_id,
            });
        }
        self.request(|reply| ActorMessage::Apply { update, reply })
            .await
    }

    /// Replace the entity's state wholesale.
    pub async fn replace_state(&self, state: EntityState) -> Result<()> {
        if state.entity_id != self.entity_id {
            return Err(AgentError::EntityMismatch {
                expected: self.entity_id,
                actual: state.entity_id,
            });
        }
        self.request(|reply| ActorMessage::Replace { state, reply })
            .await
    }

    /// Current state; an entity that was never written reads as empty.
    pub async fn read_state(&self) -> Result<EntityState> {
        self.request(|reply| ActorMessage::Read { reply }).await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T>>) -> ActorMessage,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(message(reply))
            .await
            .map_err(|_| AgentError::ActorStopped(self.entity_id))?;
        response
            .await
            .map_err(|_| AgentError::ActorStopped(self.entity_id))?
    }
}

struct EntityActor {
    entity_id: EntityId,
    metadata_store: Arc<dyn MetadataStore>,
    /// Loaded on the first request
    state: Option<EntityState>,
    receiver: mpsc::Receiver<ActorMessage>,
    /// `None` keeps the actor alive as long as a handle exists
    idle_timeout: Option<Duration>,
    /// Map to remove ourselves from on deactivation
    registry: Weak<ActorMap>,
}

impl EntityActor {
    async fn run(mut self) {
        metrics::ENTITY_ACTORS_ACTIVE.inc();
        trace!(entity_id = %self.entity_id, "Entity actor started");

        loop {
            let next = match self.idle_timeout {
                Some(idle) => tokio::time::timeout(idle, self.receiver.recv()).await,
                None => Ok(self.receiver.recv().await),
            };

            match next {
                Ok(Some(message)) => self.handle(message).await,
                Ok(None) => break,
                Err(_) => {
                    self.deactivate().await;
                    break;
                }
            }
        }

        metrics::ENTITY_ACTORS_ACTIVE.dec();
        trace!(entity_id = %self.entity_id, "Entity actor stopped");
    }

    async fn handle(&mut self, message: ActorMessage) {
        match message {
            ActorMessage::Apply { update, reply } => {
                let _ = reply.send(self.apply(update).await);
            }
            ActorMessage::Replace { state, reply } => {
                let _ = reply.send(self.replace(state).await);
            }
            ActorMessage::Read { reply } => {
                let _ = reply.send(self.current().await.cloned());
            }
        }
    }

    async fn deactivate(&mut self) {
        debug!(entity_id = %self.entity_id, "Deactivating idle entity actor");

        // Requests queued before the close are still answered
        self.receiver.close();
        while let Some(message) = self.receiver.recv().await {
            self.handle(message).await;
        }

        if let Some(actors) = self.registry.upgrade() {
            actors.remove_if(&self.entity_id, |_, handle| handle.is_stopped());
        }
    }

    async fn current(&mut self) -> Result<&EntityState> {
        if self.state.is_none() {
            self.state = self
                .metadata_store
                .load_entity_state(&self.entity_id)
                .await?;
        }
        let entity_id = self.entity_id;
        Ok(self
            .state
            .get_or_insert_with(|| EntityState::empty(entity_id)))
    }

    async fn apply(&mut self, update: EntityUpdate) -> Result<ApplyOutcome> {
        let mut next = self.current().await?.clone();

        if !next.merge_update(&update) {
            metrics::EVENTS_DUPLICATE_TOTAL.inc();
            trace!(entity_id = %self.entity_id, "Update already applied");
            return Ok(ApplyOutcome::Duplicate);
        }

        self.persist(next).await?;
        metrics::EVENTS_APPLIED_TOTAL.inc();
        Ok(ApplyOutcome::Applied)
    }

    async fn replace(&mut self, state: EntityState) -> Result<()> {
        let current = self.current().await?.clone();

        // Normalize: claims ordered by id, one revision per id
        let mut next = EntityState::empty(self.entity_id);
        next.merge_update(&EntityUpdate::from(state.clone()));
        if next.claims.is_empty() {
            next.policy_number = state.policy_number;
            next.customer_name = state.customer_name;
        }

        if next == current {
            return Ok(());
        }

        self.persist(next).await
    }

    async fn persist(&mut self, next: EntityState) -> Result<()> {
        if let Err(e) = self.metadata_store.save_entity_state(&next).await {
            error!(entity_id = %self.entity_id, error = %e, "Failed to persist entity state");
            return Err(e.into());
        }
        debug!(
            entity_id = %self.entity_id,
            claims = next.claims.len(),
            "Entity state persisted"
        );
        self.state = Some(next);
        Ok(())
    }
}

/// Lazily populated map from entity id to actor.
pub struct ActorRegistry {
    metadata_store: Arc<dyn MetadataStore>,
    actors: Arc<ActorMap>,
    mailbox_capacity: usize,
    idle_timeout: Duration,
}

impl ActorRegistry {
    pub fn new(metadata_store: Arc<dyn MetadataStore>) -> Self {
        Self::with_limits(metadata_store, DEFAULT_MAILBOX_CAPACITY, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_limits(
        metadata_store: Arc<dyn MetadataStore>,
        mailbox_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            metadata_store,
            actors: Arc::new(DashMap::new()),
            mailbox_capacity,
            idle_timeout,
        }
    }

    /// Handle of the entity's actor, spawning it on first use.
    pub fn actor(&self, entity_id: EntityId) -> EntityActorHandle {
        let mut entry = self
            .actors
            .entry(entity_id)
            .or_insert_with(|| self.spawn(entity_id));

        if entry.is_stopped() {
            debug!(entity_id = %entity_id, "Respawning stopped entity actor");
            *entry = self.spawn(entity_id);
        }
        entry.clone()
    }

    fn spawn(&self, entity_id: EntityId) -> EntityActorHandle {
        EntityActorHandle::spawn_inner(
            entity_id,
            self.metadata_store.clone(),
            self.mailbox_capacity,
            Some(self.idle_timeout),
            Arc::downgrade(&self.actors),
        )
    }

    // A handle taken just before its actor deactivated refuses the request
    // without processing it, so one retry on a fresh actor is safe.

    pub async fn apply_update(&self, update: EntityUpdate) -> Result<ApplyOutcome> {
        let entity_id = update.entity_id;
        match self.actor(entity_id).apply_update(update.clone()).await {
            Err(AgentError::ActorStopped(_)) => self.actor(entity_id).apply_update(update).await,
            outcome => outcome,
        }
    }

    pub async fn replace_state(&self, state: EntityState) -> Result<()> {
        let entity_id = state.entity_id;
        match self.actor(entity_id).replace_state(state.clone()).await {
            Err(AgentError::ActorStopped(_)) => self.actor(entity_id).replace_state(state).await,
            outcome => outcome,
        }
    }

    pub async fn read_state(&self, entity_id: EntityId) -> Result<EntityState> {
        match self.actor(entity_id).read_state().await {
            Err(AgentError::ActorStopped(_)) => self.actor(entity_id).read_state().await,
            outcome => outcome,
        }
    }

    /// Number of live actors
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
