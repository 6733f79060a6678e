pub mod codec;
pub mod entity;
pub mod error;
pub mod event;
pub mod partition;
pub mod record;

pub use codec::{encode_record, Header, RawRecord, RecordSplitter};
pub use entity::{EntityState, EntityUpdate, PetClaim};
pub use error::{Error, Result};
pub use event::{ClaimEvent, DEFAULT_STREAM_NAMESPACE};
pub use partition::{partition_key, PartitionRouter, DEFAULT_PARTITION_COUNT};
pub use record::{ClaimRecord, EntityId};
