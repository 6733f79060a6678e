//! ClaimFlow Client - Stream Transport and Event Publisher
//!
//! This crate is the producing side of the claims stream: the partitioned
//! transport abstraction, bounded per-partition batches, and the publisher
//! that turns chunk rows into Claim Events.
//!
//! # Examples
//!
//! ## Publishing a chunk
//!
//! ```ignore
//! use claimflow_client::{EventPublisher, InMemoryTransport, PublisherConfig, RetryPolicy};
//! use claimflow_core::PartitionRouter;
//!
//! let transport = Arc::new(InMemoryTransport::new(32));
//! let publisher = EventPublisher::new(
//!     transport.clone(),
//!     Arc::new(ChunkReader::new(store, storage_config)),
//!     PartitionRouter::new(32)?,
//!     PublisherConfig::default(),
//!     RetryPolicy::default(),
//! )?;
//!
//! let report = publisher.publish(&descriptor).await?;
//! println!("published {} rows", report.lines_published);
//! ```
//!
//! ## Reading a partition
//!
//! ```ignore
//! let messages = transport.fetch(partition, checkpoint, 500).await?;
//! for stored in messages {
//!     handle(stored.message).await?;
//! }
//! ```

pub mod batch;
pub mod error;
pub mod publisher;
pub mod retry;
pub mod transport;

pub use batch::{EventBatch, StoredMessage, StreamMessage};
pub use error::{ClientError, Result};
pub use publisher::{EventPublisher, PublishReport, PublisherConfig};
pub use retry::{retry_with_backoff, retry_with_jittered_backoff, RetryPolicy, Retryable};
pub use transport::{InMemoryTransport, StreamTransport};
