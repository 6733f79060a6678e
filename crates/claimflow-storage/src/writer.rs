//! Chunk Writer
//!
//! Splits a source file into bounded chunk files in blob storage.
//!
//! ## Split Flow
//!
//! ```text
//! source bytes ──► RecordSplitter ──► header (validated once)
//!                                 └─► rows ──► accumulator
//!                                                │ max_rows_per_chunk reached
//!                                                ▼
//!                                   PUT {container}/{tenant}/{run}/chunk-NNNN.csv
//!                                   (header + rows, retried with backoff)
//!                                                │
//!                                                ▼
//!                                        ChunkDescriptor
//! ```
//!
//! The source is streamed: at most one chunk's rows are held in memory. The
//! remaining partial accumulator is flushed as a final, possibly undersized,
//! chunk. Rows are copied byte for byte, including rows that are not valid
//! UTF-8; decoding happens in the publisher so a malformed row costs one
//! row, not a chunk.
//!
//! ## Failure Semantics
//!
//! Any error aborts the whole split and no descriptors are returned. Chunk
//! paths are deterministic, so a retried split overwrites what an aborted
//! one left behind.

use crate::config::{chunk_id, StorageConfig};
use crate::error::{Error, Result};
use crate::retry::{open_with_retry, put_with_retry};
use bytes::Bytes;
use claimflow_core::{Header, RawRecord, RecordSplitter};
use claimflow_metadata::ChunkDescriptor;
use claimflow_observability::metrics;
use futures::{Stream, StreamExt};
use object_store::ObjectStore;
use std::sync::Arc;

/// Writes chunk files for ingestion runs.
pub struct ChunkWriter {
    object_store: Arc<dyn ObjectStore>,
    config: StorageConfig,
}

/// Accumulator for one split invocation
struct SplitState<'a> {
    run_id: i64,
    tenant_id: &'a str,
    header: Option<String>,
    rows: Vec<RawRecord>,
    /// Data rows seen so far
    line_count: u64,
    descriptors: Vec<ChunkDescriptor>,
}

impl ChunkWriter {
    pub fn new(object_store: Arc<dyn ObjectStore>, config: StorageConfig) -> Self {
        Self {
            object_store,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Split the source file `file_name` for a run.
    ///
    /// # Arguments
    ///
    /// * `file_name` - Source object name, relative to the container
    /// * `run_id` - Run the chunks belong to
    /// * `tenant_id` - Tenant that owns the run
    ///
    /// # Returns
    ///
    /// Descriptors in chunk order. Their line ranges are contiguous and cover
    /// every data row exactly once. A source without data rows yields an
    /// empty list.
    ///
    /// # Errors
    ///
    /// - `SourceUnreadable`: The source is missing or cannot be streamed
    /// - `Codec`: The header lacks a required column
    /// - `WriteFailed`: A chunk could not be persisted after retries
    pub async fn split(
        &self,
        file_name: &str,
        run_id: i64,
        tenant_id: &str,
    ) -> Result<Vec<ChunkDescriptor>> {
        let path = self.config.source_path(file_name);

        let source = open_with_retry(self.object_store.as_ref(), &path, self.config.upload_retries)
            .await
            .map_err(|e| Error::SourceUnreadable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let source_path = path.to_string();
        let stream = source.into_stream().map(move |piece| {
            piece.map_err(|e| Error::SourceUnreadable {
                path: source_path.clone(),
                reason: e.to_string(),
            })
        });

        self.split_stream(stream, run_id, tenant_id).await
    }

    /// Split an already opened source byte stream.
    pub async fn split_stream<S>(
        &self,
        mut source: S,
        run_id: i64,
        tenant_id: &str,
    ) -> Result<Vec<ChunkDescriptor>>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        self.config.validate()?;

        tracing::info!(
            run_id,
            tenant_id,
            chunk_size = self.config.max_rows_per_chunk,
            "Splitting source into chunks"
        );

        let mut state = SplitState {
            run_id,
            tenant_id,
            header: None,
            rows: Vec::with_capacity(self.config.max_rows_per_chunk),
            line_count: 0,
            descriptors: Vec::new(),
        };
        let mut splitter = RecordSplitter::new();
        let mut lines = Vec::new();

        while let Some(piece) = source.next().await {
            splitter.push(&piece?, &mut lines);
            for line in lines.drain(..) {
                self.accept(&mut state, line).await?;
            }
        }
        if let Some(line) = splitter.finish() {
            self.accept(&mut state, line).await?;
        }
        if !state.rows.is_empty() {
            self.flush(&mut state).await?;
        }

        if state.header.is_none() {
            tracing::warn!(run_id, tenant_id, "Source is empty, no chunks created");
        }

        tracing::info!(
            run_id,
            tenant_id,
            total_chunks = state.descriptors.len(),
            total_lines = state.line_count,
            "Split complete"
        );

        Ok(state.descriptors)
    }

    async fn accept(&self, state: &mut SplitState<'_>, line: RawRecord) -> Result<()> {
        if state.header.is_none() {
            let line = line.into_text()?;
            Header::parse(&line)?;
            state.header = Some(line.trim_start_matches('\u{feff}').to_string());
            return Ok(());
        }

        state.rows.push(line);
        state.line_count += 1;
        metrics::SOURCE_ROWS_TOTAL.inc();

        if state.rows.len() >= self.config.max_rows_per_chunk {
            self.flush(state).await?;
        }
        Ok(())
    }

    async fn flush(&self, state: &mut SplitState<'_>) -> Result<()> {
        let header = state.header.as_deref().unwrap_or_default();
        let id = chunk_id(state.descriptors.len() + 1);
        let path = self.config.chunk_path(state.tenant_id, state.run_id, &id);

        let mut body = Vec::with_capacity(
            header.len() + 1 + state.rows.iter().map(|r| r.len() + 1).sum::<usize>(),
        );
        body.extend_from_slice(header.as_bytes());
        body.push(b'\n');
        for row in &state.rows {
            body.extend_from_slice(row.as_bytes());
            body.push(b'\n');
        }

        put_with_retry(
            self.object_store.as_ref(),
            &path,
            Bytes::from(body),
            self.config.upload_retries,
        )
        .await
        .map_err(|e| Error::WriteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let rows = state.rows.len() as u64;
        let descriptor = ChunkDescriptor {
            run_id: state.run_id,
            tenant_id: state.tenant_id.to_string(),
            chunk_id: id,
            location: path.to_string(),
            line_start: state.line_count - rows,
            line_end: state.line_count - 1,
            line_count: rows,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        tracing::debug!(
            run_id = state.run_id,
            chunk_id = %descriptor.chunk_id,
            path = %descriptor.location,
            line_start = descriptor.line_start,
            line_end = descriptor.line_end,
            "Chunk written"
        );
        metrics::CHUNKS_WRITTEN_TOTAL.inc();

        state.descriptors.push(descriptor);
        state.rows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use object_store::memory::InMemory;
    use object_store::path::Path;

    const HEADER: &str = "PolicyNumber,PetId,ClaimId,CustomerName,ClaimAmount,DateOfLoss,ClaimDate,Status,Description";

    fn row(i: usize) -> String {
        format!(
            "POL-{i},6f1c2d3e-0000-4000-8000-{i:012},C{i},Jane,10.00,2024-01-01,2024-01-02,Submitted,checkup"
        )
    }

    fn source(rows: usize) -> String {
        let mut s = format!("{HEADER}\n");
        for i in 0..rows {
            s.push_str(&row(i));
            s.push('\n');
        }
        s
    }

    fn writer(store: Arc<InMemory>, max_rows: usize) -> ChunkWriter {
        ChunkWriter::new(
            store,
            StorageConfig {
                max_rows_per_chunk: max_rows,
                ..Default::default()
            },
        )
    }

    async fn put_source(store: &InMemory, name: &str, body: String) {
        store
            .put(&Path::from(format!("sample-claims/{name}")), Bytes::from(body))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_split_produces_contiguous_chunks() {
        let store = Arc::new(InMemory::new());
        put_source(&store, "claims.csv", source(25)).await;

        let chunks = writer(store.clone(), 10)
            .split("claims.csv", 1, "tenant-a")
            .await
            .unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.line_count).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(chunks[0].chunk_id, "chunk-0001");
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (0, 9));
        assert_eq!((chunks[1].line_start, chunks[1].line_end), (10, 19));
        assert_eq!((chunks[2].line_start, chunks[2].line_end), (20, 24));
        assert_eq!(chunks[2].location, "sample-claims/tenant-a/1/chunk-0003.csv");

        let body = store
            .get(&Path::from(chunks[2].location.as_str()))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], row(20));
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_chunk() {
        let store = Arc::new(InMemory::new());
        put_source(&store, "claims.csv", source(20)).await;

        let chunks = writer(store, 10)
            .split("claims.csv", 1, "tenant-a")
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_header_only_source_yields_no_chunks() {
        let store = Arc::new(InMemory::new());
        put_source(&store, "empty.csv", format!("{HEADER}\n")).await;

        let chunks = writer(store, 10).split("empty.csv", 1, "t").await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_unreadable() {
        let store = Arc::new(InMemory::new());
        let err = writer(store, 10).split("nope.csv", 1, "t").await.unwrap_err();
        assert!(matches!(err, Error::SourceUnreadable { .. }));
    }

    #[tokio::test]
    async fn test_bad_header_aborts_split() {
        let store = Arc::new(InMemory::new());
        put_source(&store, "bad.csv", "Foo,Bar\n1,2\n".to_string()).await;

        let err = writer(store, 10).split("bad.csv", 1, "t").await.unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[tokio::test]
    async fn test_resplit_overwrites_same_paths() {
        let store = Arc::new(InMemory::new());
        put_source(&store, "claims.csv", source(15)).await;
        let w = writer(store.clone(), 10);

        let first = w.split("claims.csv", 9, "t").await.unwrap();
        let second = w.split("claims.csv", 9, "t").await.unwrap();

        let first_paths: Vec<_> = first.iter().map(|c| c.location.clone()).collect();
        let second_paths: Vec<_> = second.iter().map(|c| c.location.clone()).collect();
        assert_eq!(first_paths, second_paths);

        let listed = store
            .list_with_delimiter(Some(&Path::from("sample-claims/t/9")))
            .await
            .unwrap();
        assert_eq!(listed.objects.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_row_is_kept_byte_for_byte() {
        let store = Arc::new(InMemory::new());
        let mut body = format!("{HEADER}\n{}\n", row(0)).into_bytes();
        body.extend_from_slice(b"POL-1,bad,C\xe9,Jos\xe9,1.00,2024-01-01,2024-01-02,Open,x\n");
        body.extend_from_slice(format!("{}\n", row(2)).as_bytes());
        store
            .put(&Path::from("sample-claims/latin1.csv"), Bytes::from(body))
            .await
            .unwrap();

        let chunks = writer(store.clone(), 10)
            .split("latin1.csv", 4, "t")
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_count, 3);

        let contents = crate::ChunkReader::new(store, StorageConfig::default())
            .read(&chunks[0])
            .await
            .unwrap();
        assert_eq!(contents.rows.len(), 3);
        assert_eq!(contents.rows[0], row(0).as_str());
        assert_eq!(
            contents.rows[1].as_bytes(),
            b"POL-1,bad,C\xe9,Jos\xe9,1.00,2024-01-01,2024-01-02,Open,x"
        );
        let err = contents.rows[1].as_text().unwrap_err();
        assert!(matches!(err, claimflow_core::Error::InvalidEncoding { offset: 11 }));
        assert_eq!(contents.rows[2], row(2).as_str());
    }

    #[tokio::test]
    async fn test_invalid_utf8_header_aborts_split() {
        let store = Arc::new(InMemory::new());
        store
            .put(
                &Path::from("sample-claims/bad-header.csv"),
                Bytes::from_static(b"Policy\xffNumber,PetId\n1,2\n"),
            )
            .await
            .unwrap();

        let err = writer(store, 10)
            .split("bad-header.csv", 1, "t")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(claimflow_core::Error::InvalidEncoding { .. })
        ));
    }

    #[tokio::test]
    async fn test_split_stream_handles_quoted_newlines_across_pieces() {
        let store = Arc::new(InMemory::new());
        let body = format!(
            "{HEADER}\r\nPOL-1,6f1c2d3e-0000-4000-8000-000000000001,C1,\"Doe, Jane\",1.00,2024-01-01,2024-01-02,Open,\"line one\nline two\"\r\n"
        );
        let pieces: Vec<Result<Bytes>> = body
            .as_bytes()
            .chunks(5)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let chunks = writer(store, 10)
            .split_stream(stream::iter(pieces), 3, "t")
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_count, 1);
    }
}
