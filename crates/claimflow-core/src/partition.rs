//! Partition Router
//!
//! Maps an entity identifier to a stream partition:
//!
//! ```text
//! hash          = i32::from_le_bytes(routing_bytes[0..4])
//! partition_key = |hash mod partition_count|
//! ```
//!
//! The hash is taken over the identifier's raw bytes, so the mapping is stable
//! across processes, restarts and releases. All rows of one entity land on the
//! same partition, which is what preserves per-entity order within a chunk.

use crate::error::{Error, Result};
use crate::record::EntityId;

/// Partition count used when none is configured.
pub const DEFAULT_PARTITION_COUNT: u32 = 32;

/// Compute the partition key for an entity.
///
/// `partition_count` must be non-zero; use [`PartitionRouter`] to validate once
/// up front instead of on every call.
pub fn partition_key(id: &EntityId, partition_count: u32) -> u32 {
    let bytes = id.routing_bytes();
    let hash = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    ((hash as i64) % (partition_count as i64)).unsigned_abs() as u32
}

/// Validated router for a fixed partition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRouter {
    partition_count: u32,
}

impl PartitionRouter {
    /// # Errors
    ///
    /// `InvalidPartitionCount` when `partition_count` is zero.
    pub fn new(partition_count: u32) -> Result<Self> {
        if partition_count == 0 {
            return Err(Error::InvalidPartitionCount);
        }
        Ok(Self { partition_count })
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn partition_for(&self, id: &EntityId) -> u32 {
        partition_key(id, self.partition_count)
    }
}

impl Default for PartitionRouter {
    fn default() -> Self {
        Self {
            partition_count: DEFAULT_PARTITION_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id(s: &str) -> EntityId {
        s.parse().unwrap()
    }

    #[test]
    fn test_known_partition_values() {
        // First field 0x00000041 = 65 -> 65 % 32 = 1
        assert_eq!(partition_key(&id("00000041-0000-0000-0000-000000000000"), 32), 1);
        // First field 0xffffffff = -1 as i32 -> |-1 % 32| = 1
        assert_eq!(partition_key(&id("ffffffff-0000-0000-0000-000000000000"), 32), 1);
        // First field 0x80000000 = i32::MIN -> |i32::MIN % 32| = 0
        assert_eq!(partition_key(&id("80000000-0000-0000-0000-000000000000"), 32), 0);
        // First field 0xffffffe1 = -31 -> 31
        assert_eq!(partition_key(&id("ffffffe1-1234-5678-9abc-def012345678"), 32), 31);
    }

    #[test]
    fn test_partition_is_deterministic_and_in_range() {
        let router = PartitionRouter::new(7).unwrap();
        for _ in 0..1_000 {
            let entity = EntityId::new(Uuid::new_v4());
            let p = router.partition_for(&entity);
            assert!(p < 7);
            assert_eq!(p, router.partition_for(&entity));
            assert_eq!(p, partition_key(&entity, 7));
        }
    }

    #[test]
    fn test_single_partition() {
        let router = PartitionRouter::new(1).unwrap();
        assert_eq!(router.partition_for(&EntityId::new(Uuid::new_v4())), 0);
    }

    #[test]
    fn test_zero_partitions_rejected() {
        assert!(matches!(
            PartitionRouter::new(0).unwrap_err(),
            Error::InvalidPartitionCount
        ));
        assert_eq!(PartitionRouter::default().partition_count(), 32);
    }
}
