//! Claim Event Wire Type
//!
//! A `ClaimEvent` is what the publisher puts on the stream for every decoded
//! row: run/tenant correlation, the routing key, and the record itself
//! serialized as JSON in `line`.
//!
//! ## Wire Format
//!
//! ```text
//! {"run_id":42,"tenant_id":"t-1","entity_id":"6f1c...","partition_key":7,"line":"{...}"}
//! ```
//!
//! The stream message wrapping this payload carries a namespace tag
//! (`DEFAULT_STREAM_NAMESPACE`) so consumers can pick the right decoder.

use crate::error::Result;
use crate::record::{ClaimRecord, EntityId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Namespace tag of the claims stream.
pub const DEFAULT_STREAM_NAMESPACE: &str = "PetClaim";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEvent {
    /// Run that published the event
    pub run_id: i64,

    /// Tenant that owns the run
    pub tenant_id: String,

    /// Target entity (also the message key)
    pub entity_id: EntityId,

    /// Partition derived from `entity_id`
    pub partition_key: u32,

    /// JSON-serialized `ClaimRecord`
    pub line: String,
}

impl ClaimEvent {
    pub fn new(
        run_id: i64,
        tenant_id: impl Into<String>,
        record: &ClaimRecord,
        partition_key: u32,
    ) -> Result<Self> {
        Ok(Self {
            run_id,
            tenant_id: tenant_id.into(),
            entity_id: record.entity_id(),
            partition_key,
            line: serde_json::to_string(record)?,
        })
    }

    /// Serialize for the stream.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Deserialize a stream payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Decode the embedded record.
    pub fn record(&self) -> Result<ClaimRecord> {
        Ok(serde_json::from_str(&self.line)?)
    }
}
