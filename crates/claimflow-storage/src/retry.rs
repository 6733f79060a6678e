//! Blob operations with exponential backoff.
//!
//! Each attempt sleeps `100ms * 2^attempt` before the next one. `NotFound` is
//! returned immediately since retrying cannot make the object appear.

use bytes::Bytes;
use claimflow_observability::metrics;
use object_store::{path::Path, ObjectStore};
use std::future::Future;
use std::time::{Duration, Instant};

async fn with_retries<T, F, Fut>(
    operation: &'static str,
    path: &Path,
    attempts: u32,
    mut op: F,
) -> Result<T, object_store::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, object_store::Error>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        metrics::STORAGE_REQUESTS_TOTAL
            .with_label_values(&[operation])
            .inc();
        let start = Instant::now();

        match op().await {
            Ok(value) => {
                metrics::STORAGE_LATENCY
                    .with_label_values(&[operation])
                    .observe(start.elapsed().as_secs_f64());
                return Ok(value);
            }
            Err(e @ object_store::Error::NotFound { .. }) => {
                metrics::STORAGE_ERRORS_TOTAL
                    .with_label_values(&[operation, "not_found"])
                    .inc();
                return Err(e);
            }
            Err(e) if attempt + 1 < attempts => {
                metrics::STORAGE_ERRORS_TOTAL
                    .with_label_values(&[operation, "retry"])
                    .inc();

                let backoff_ms = 100 * 2_u64.pow(attempt);
                tracing::warn!(
                    path = %path,
                    operation,
                    attempt = attempt + 1,
                    backoff_ms,
                    error = %e,
                    "Blob operation failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
            Err(e) => {
                metrics::STORAGE_ERRORS_TOTAL
                    .with_label_values(&[operation, "failed"])
                    .inc();
                tracing::error!(
                    path = %path,
                    operation,
                    attempts,
                    error = %e,
                    "Blob operation failed after all retries"
                );
                return Err(e);
            }
        }
    }
}

pub(crate) async fn put_with_retry(
    store: &dyn ObjectStore,
    path: &Path,
    data: Bytes,
    attempts: u32,
) -> Result<(), object_store::Error> {
    with_retries("PUT", path, attempts, || {
        let data = data.clone();
        async move { store.put(path, data).await.map(|_| ()) }
    })
    .await
}

pub(crate) async fn get_with_retry(
    store: &dyn ObjectStore,
    path: &Path,
    attempts: u32,
) -> Result<Bytes, object_store::Error> {
    with_retries("GET", path, attempts, || async move {
        store.get(path).await?.bytes().await
    })
    .await
}

pub(crate) async fn open_with_retry(
    store: &dyn ObjectStore,
    path: &Path,
    attempts: u32,
) -> Result<object_store::GetResult, object_store::Error> {
    with_retries("GET", path, attempts, || async move { store.get(path).await }).await
}
