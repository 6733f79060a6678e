//! Batching Logic for the Event Publisher
//!
//! Messages for one partition are accumulated in an [`EventBatch`] until the
//! next message would exceed either bound, then the batch is sent to the
//! stream transport as one unit.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  EventBatch (partition p)    │
//! │  - messages: Vec<Message>    │
//! │  - size_bytes: usize         │
//! └──────┬───────────────────────┘
//!        │
//!        ├─→ try_add() == false when:
//!        │     size_bytes + message.size_bytes() > max_bytes
//!        │     or messages.len() == max_messages
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │  StreamTransport::send       │
//! └──────────────────────────────┘
//! ```
//!
//! ## Sizing
//!
//! A message's size is its key, namespace and payload plus a fixed
//! per-message overhead ([`MESSAGE_OVERHEAD_BYTES`]) for offsets and framing.
//!
//! ## Thread Safety
//!
//! Batches are owned by a single publish invocation and never shared.

use bytes::Bytes;
use std::sync::Arc;

/// Fixed per-message framing overhead counted against the byte limit
pub const MESSAGE_OVERHEAD_BYTES: usize = 16;

/// Default maximum batch size in bytes (1 MiB)
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

/// Default maximum messages per batch
pub const DEFAULT_MAX_BATCH_MESSAGES: usize = 1000;

/// One message on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Partition the message is routed to
    pub partition: u32,
    /// Message key (entity id)
    pub key: Bytes,
    /// Logical stream tag consumers select decoders by
    pub namespace: Arc<str>,
    /// Encoded event
    pub payload: Bytes,
}

impl StreamMessage {
    pub fn new(partition: u32, key: impl Into<Bytes>, namespace: Arc<str>, payload: Bytes) -> Self {
        Self {
            partition,
            key: key.into(),
            namespace,
            payload,
        }
    }

    /// Size counted against a batch's byte limit.
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.namespace.len() + self.payload.len() + MESSAGE_OVERHEAD_BYTES
    }
}

/// A message as stored by the transport, with its assigned offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub offset: u64,
    pub message: StreamMessage,
}

/// Bounded batch of messages for a single partition.
///
/// # Examples
///
/// ```ignore
/// let mut batch = EventBatch::new(3, 1024 * 1024, 1000);
/// if !batch.try_add(&message) {
///     transport.send(std::mem::replace(&mut batch, EventBatch::new(3, 1024 * 1024, 1000))).await?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EventBatch {
    partition: u32,
    messages: Vec<StreamMessage>,
    size_bytes: usize,
    max_bytes: usize,
    max_messages: usize,
}

impl EventBatch {
    pub fn new(partition: u32, max_bytes: usize, max_messages: usize) -> Self {
        Self {
            partition,
            messages: Vec::new(),
            size_bytes: 0,
            max_bytes,
            max_messages,
        }
    }

    /// Append a message if it fits within both bounds.
    ///
    /// Returns `false`, leaving the batch unchanged, when adding the message
    /// would exceed the byte limit or the message-count limit.
    pub fn try_add(&mut self, message: &StreamMessage) -> bool {
        let size = message.size_bytes();
        if self.messages.len() >= self.max_messages || self.size_bytes + size > self.max_bytes {
            return false;
        }
        self.size_bytes += size;
        self.messages.push(message.clone());
        true
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn messages(&self) -> &[StreamMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<StreamMessage> {
        self.messages
    }
}
