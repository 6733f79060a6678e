//! Chunk Reader
//!
//! Loads one chunk file back from blob storage for the publisher.
//!
//! ## Read Flow
//!
//! ```text
//! read(descriptor)
//!     ↓
//! GET descriptor.location (retried with backoff)
//!     ↓
//! RecordSplitter → header line + raw rows
//!     ↓
//! Header::parse (a chunk without a valid header is unusable)
//!     ↓
//! ChunkContents { header, rows }
//! ```
//!
//! Rows are returned undecoded. Decoding is per row so that one bad row
//! does not make the rest of the chunk unreadable.

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::retry::get_with_retry;
use claimflow_core::{Header, RawRecord, RecordSplitter};
use claimflow_metadata::ChunkDescriptor;
use object_store::{path::Path, ObjectStore};
use std::sync::Arc;

/// Parsed contents of a chunk file
#[derive(Debug, Clone)]
pub struct ChunkContents {
    pub header: Header,
    /// Raw data rows in file order
    pub rows: Vec<RawRecord>,
}

pub struct ChunkReader {
    object_store: Arc<dyn ObjectStore>,
    config: StorageConfig,
}

impl ChunkReader {
    pub fn new(object_store: Arc<dyn ObjectStore>, config: StorageConfig) -> Self {
        Self {
            object_store,
            config,
        }
    }

    /// Fetch and split the chunk described by `descriptor`.
    ///
    /// # Errors
    ///
    /// - `ReadFailed`: The blob is missing or could not be fetched
    /// - `Codec`: The chunk is empty or its header is invalid
    pub async fn read(&self, descriptor: &ChunkDescriptor) -> Result<ChunkContents> {
        let path = Path::from(descriptor.location.as_str());

        let data = get_with_retry(self.object_store.as_ref(), &path, self.config.upload_retries)
            .await
            .map_err(|e| Error::ReadFailed {
                path: descriptor.location.clone(),
                reason: e.to_string(),
            })?;

        let mut splitter = RecordSplitter::new();
        let mut lines = Vec::with_capacity(descriptor.line_count as usize + 1);
        splitter.push(&data, &mut lines);
        if let Some(last) = splitter.finish() {
            lines.push(last);
        }

        let mut lines = lines.into_iter();
        let header = match lines.next() {
            Some(line) => Header::parse(line.as_text()?)?,
            None => return Err(claimflow_core::Error::EmptySource.into()),
        };
        let rows: Vec<RawRecord> = lines.collect();

        if rows.len() as u64 != descriptor.line_count {
            tracing::warn!(
                run_id = descriptor.run_id,
                chunk_id = %descriptor.chunk_id,
                expected = descriptor.line_count,
                found = rows.len(),
                "Chunk row count differs from descriptor"
            );
        }

        tracing::debug!(
            run_id = descriptor.run_id,
            chunk_id = %descriptor.chunk_id,
            rows = rows.len(),
            bytes = data.len(),
            "Chunk loaded"
        );

        Ok(ChunkContents { header, rows })
    }
}
