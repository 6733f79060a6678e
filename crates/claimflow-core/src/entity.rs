//! Per-Entity Claim History
//!
//! `EntityState` is the durable state owned by one entity actor: a pet and
//! every claim filed for it. Updates arrive at least once and in no particular
//! order across chunks, so the merge here is built to converge:
//!
//! - Claims are keyed by `claim_id`
//! - For the same id, the claim with the higher precedence wins, where
//!   precedence is `updated_at`, then `term_number`, then every remaining
//!   field in declaration order - a total order
//! - Re-applying a claim that does not outrank the stored one is a no-op
//! - Entity-level fields are derived from the highest-precedence claim
//!
//! Together these make merging commutative, associative and idempotent: the
//! state is a pure function of the set of claims applied, so any delivery
//! order converges to the same `EntityState`. The state carries nothing
//! about how it was delivered (run ids, write counts).

use crate::event::ClaimEvent;
use crate::record::{ClaimRecord, EntityId};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One claim in an entity's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetClaim {
    pub claim_id: String,
    pub term_number: i32,
    pub claim_number: String,
    pub policy_number: String,
    pub customer_name: String,
    pub date_of_loss: DateTime<Utc>,
    pub date_of_claim: DateTime<Utc>,
    pub description: Option<String>,
    pub claimed_amount_cents: i64,
    pub approved_amount_cents: Option<i64>,
    pub status: String,
    pub veterinarian: Option<String>,
    /// Claim revision timestamp; later revisions win
    pub updated_at: DateTime<Utc>,
}

impl PetClaim {
    pub fn from_record(record: &ClaimRecord) -> Self {
        let description = Some(record.description.clone()).filter(|d| !d.is_empty());
        Self {
            claim_id: record.claim_id.clone(),
            term_number: record.term_number.unwrap_or(1),
            claim_number: record.claim_id.clone(),
            policy_number: record.policy_number.clone(),
            customer_name: record.customer_name.clone(),
            date_of_loss: record.date_of_loss,
            date_of_claim: record.claim_date,
            description,
            claimed_amount_cents: record.claim_amount_cents,
            approved_amount_cents: record.approved_amount_cents,
            status: record.status.clone(),
            veterinarian: record.veterinarian.clone(),
            updated_at: record.claim_date,
        }
    }

    /// Total order deciding which revision of a claim survives a merge.
    ///
    /// `Equal` only for identical claims.
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        self.updated_at
            .cmp(&other.updated_at)
            .then(self.term_number.cmp(&other.term_number))
            .then_with(|| self.tie_break_key().cmp(&other.tie_break_key()))
    }

    #[allow(clippy::type_complexity)]
    fn tie_break_key(
        &self,
    ) -> (
        &str,
        &str,
        &str,
        &str,
        DateTime<Utc>,
        DateTime<Utc>,
        &Option<String>,
        i64,
        Option<i64>,
        &str,
        &Option<String>,
    ) {
        (
            &self.claim_id,
            &self.claim_number,
            &self.policy_number,
            &self.customer_name,
            self.date_of_loss,
            self.date_of_claim,
            &self.description,
            self.claimed_amount_cents,
            self.approved_amount_cents,
            &self.status,
            &self.veterinarian,
        )
    }
}

/// A set of claims to fold into one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity_id: EntityId,
    pub claims: Vec<PetClaim>,
}

impl EntityUpdate {
    /// Build the update carried by one stream event.
    pub fn from_event(event: &ClaimEvent) -> Result<Self> {
        let record = event.record()?;
        Ok(Self {
            entity_id: event.entity_id,
            claims: vec![PetClaim::from_record(&record)],
        })
    }
}

impl From<EntityState> for EntityUpdate {
    fn from(state: EntityState) -> Self {
        Self {
            entity_id: state.entity_id,
            claims: state.claims,
        }
    }
}

/// Durable state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub policy_number: String,
    pub customer_name: String,
    /// Ordered by `claim_id`
    pub claims: Vec<PetClaim>,
}

impl EntityState {
    pub fn empty(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            policy_number: String::new(),
            customer_name: String::new(),
            claims: Vec::new(),
        }
    }

    /// `true` for an entity nothing has been written to.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty() && self.policy_number.is_empty() && self.customer_name.is_empty()
    }

    pub fn claim(&self, claim_id: &str) -> Option<&PetClaim> {
        self.claims
            .binary_search_by(|c| c.claim_id.as_str().cmp(claim_id))
            .ok()
            .map(|i| &self.claims[i])
    }

    /// Merge one claim. Returns `true` if the state changed.
    pub fn merge_claim(&mut self, claim: PetClaim) -> bool {
        let changed = self.merge_claim_inner(claim);
        if changed {
            self.refresh_owner();
        }
        changed
    }

    /// Merge every claim of an update. Returns `true` if the state changed.
    pub fn merge_update(&mut self, update: &EntityUpdate) -> bool {
        let mut changed = false;
        for claim in &update.claims {
            changed |= self.merge_claim_inner(claim.clone());
        }
        if changed {
            self.refresh_owner();
        }
        changed
    }

    fn merge_claim_inner(&mut self, claim: PetClaim) -> bool {
        match self
            .claims
            .binary_search_by(|c| c.claim_id.cmp(&claim.claim_id))
        {
            Ok(i) => {
                if claim.cmp_precedence(&self.claims[i]) == Ordering::Greater {
                    self.claims[i] = claim;
                    true
                } else {
                    false
                }
            }
            Err(i) => {
                self.claims.insert(i, claim);
                true
            }
        }
    }

    fn refresh_owner(&mut self) {
        if let Some(latest) = self.claims.iter().max_by(|a, b| a.cmp_precedence(b)) {
            self.policy_number = latest.policy_number.clone();
            self.customer_name = latest.customer_name.clone();
        }
    }
}
