use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Chunk Writer Metrics
    // ============================================================================

    /// Chunks written to blob storage
    pub static ref CHUNKS_WRITTEN_TOTAL: IntCounter = IntCounter::new(
        "claimflow_chunks_written_total",
        "Total chunk files written to blob storage"
    ).expect("metric can be created");

    /// Data rows read from source files
    pub static ref SOURCE_ROWS_TOTAL: IntCounter = IntCounter::new(
        "claimflow_source_rows_total",
        "Total data rows read from source files"
    ).expect("metric can be created");

    /// Blob storage requests by operation type
    pub static ref STORAGE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("claimflow_storage_requests_total", "Total blob storage requests"),
        &["operation"] // GET, PUT
    ).expect("metric can be created");

    /// Blob storage errors
    pub static ref STORAGE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("claimflow_storage_errors_total", "Total blob storage errors"),
        &["operation", "error_type"] // retry, failed, not_found
    ).expect("metric can be created");

    /// Blob storage request latency
    pub static ref STORAGE_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("claimflow_storage_latency_seconds", "Blob storage latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["operation"]
    ).expect("metric can be created");

    // ============================================================================
    // Publisher Metrics
    // ============================================================================

    /// Claim events published to the stream
    pub static ref RECORDS_PUBLISHED_TOTAL: IntCounter = IntCounter::new(
        "claimflow_records_published_total",
        "Total claim events published"
    ).expect("metric can be created");

    /// Rows skipped because they could not be decoded
    pub static ref RECORDS_MALFORMED_TOTAL: IntCounter = IntCounter::new(
        "claimflow_records_malformed_total",
        "Total malformed rows skipped by the publisher"
    ).expect("metric can be created");

    /// Batches sent to the stream transport
    pub static ref BATCHES_FLUSHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("claimflow_batches_flushed_total", "Total batches sent to the stream"),
        &["partition"]
    ).expect("metric can be created");

    /// Messages per flushed batch
    pub static ref BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new("claimflow_batch_size", "Batch size in messages")
            .buckets(vec![1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0])
    ).expect("metric can be created");

    /// Transport send errors
    pub static ref PUBLISH_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("claimflow_publish_errors_total", "Total stream send errors"),
        &["error_type"] // retry, failed
    ).expect("metric can be created");

    // ============================================================================
    // Coordinator Metrics
    // ============================================================================

    /// Chunks processed by outcome
    pub static ref CHUNKS_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("claimflow_chunks_processed_total", "Total chunks processed"),
        &["outcome"] // success, failure
    ).expect("metric can be created");

    /// Chunk processing latency
    pub static ref CHUNK_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new("claimflow_chunk_latency_seconds", "Chunk processing latency in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
    ).expect("metric can be created");

    /// Runs reaching a terminal state
    pub static ref RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("claimflow_runs_total", "Total runs by terminal state"),
        &["state"] // completed, failed
    ).expect("metric can be created");

    /// Chunks in flight across all runs
    pub static ref CHUNKS_IN_FLIGHT: IntGauge = IntGauge::new(
        "claimflow_chunks_in_flight",
        "Chunk processors currently running"
    ).expect("metric can be created");

    // ============================================================================
    // Consumer / Actor Metrics
    // ============================================================================

    /// Stream messages handled per partition
    pub static ref CONSUMER_MESSAGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("claimflow_consumer_messages_total", "Total stream messages consumed"),
        &["partition"]
    ).expect("metric can be created");

    /// Stream messages dropped because they could not be decoded
    pub static ref DECODE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "claimflow_decode_failures_total",
        "Total undecodable stream messages dropped"
    ).expect("metric can be created");

    /// Entity updates that changed state
    pub static ref EVENTS_APPLIED_TOTAL: IntCounter = IntCounter::new(
        "claimflow_events_applied_total",
        "Total entity updates that changed state"
    ).expect("metric can be created");

    /// Entity updates absorbed as duplicates
    pub static ref EVENTS_DUPLICATE_TOTAL: IntCounter = IntCounter::new(
        "claimflow_events_duplicate_total",
        "Total entity updates that were no-ops"
    ).expect("metric can be created");

    /// Live entity actors
    pub static ref ENTITY_ACTORS_ACTIVE: IntGauge = IntGauge::new(
        "claimflow_entity_actors_active",
        "Number of live entity actors"
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        // Chunk writer metrics
        REGISTRY
            .register(Box::new(CHUNKS_WRITTEN_TOTAL.clone()))
            .expect("chunks_written_total can be registered");
        REGISTRY
            .register(Box::new(SOURCE_ROWS_TOTAL.clone()))
            .expect("source_rows_total can be registered");
        REGISTRY
            .register(Box::new(STORAGE_REQUESTS_TOTAL.clone()))
            .expect("storage_requests_total can be registered");
        REGISTRY
            .register(Box::new(STORAGE_ERRORS_TOTAL.clone()))
            .expect("storage_errors_total can be registered");
        REGISTRY
            .register(Box::new(STORAGE_LATENCY.clone()))
            .expect("storage_latency can be registered");

        // Publisher metrics
        REGISTRY
            .register(Box::new(RECORDS_PUBLISHED_TOTAL.clone()))
            .expect("records_published_total can be registered");
        REGISTRY
            .register(Box::new(RECORDS_MALFORMED_TOTAL.clone()))
            .expect("records_malformed_total can be registered");
        REGISTRY
            .register(Box::new(BATCHES_FLUSHED_TOTAL.clone()))
            .expect("batches_flushed_total can be registered");
        REGISTRY
            .register(Box::new(BATCH_SIZE.clone()))
            .expect("batch_size can be registered");
        REGISTRY
            .register(Box::new(PUBLISH_ERRORS_TOTAL.clone()))
            .expect("publish_errors_total can be registered");

        // Coordinator metrics
        REGISTRY
            .register(Box::new(CHUNKS_PROCESSED_TOTAL.clone()))
            .expect("chunks_processed_total can be registered");
        REGISTRY
            .register(Box::new(CHUNK_LATENCY.clone()))
            .expect("chunk_latency can be registered");
        REGISTRY
            .register(Box::new(RUNS_TOTAL.clone()))
            .expect("runs_total can be registered");
        REGISTRY
            .register(Box::new(CHUNKS_IN_FLIGHT.clone()))
            .expect("chunks_in_flight can be registered");

        // Consumer / actor metrics
        REGISTRY
            .register(Box::new(CONSUMER_MESSAGES_TOTAL.clone()))
            .expect("consumer_messages_total can be registered");
        REGISTRY
            .register(Box::new(DECODE_FAILURES_TOTAL.clone()))
            .expect("decode_failures_total can be registered");
        REGISTRY
            .register(Box::new(EVENTS_APPLIED_TOTAL.clone()))
            .expect("events_applied_total can be registered");
        REGISTRY
            .register(Box::new(EVENTS_DUPLICATE_TOTAL.clone()))
            .expect("events_duplicate_total can be registered");
        REGISTRY
            .register(Box::new(ENTITY_ACTORS_ACTIVE.clone()))
            .expect("entity_actors_active can be registered");
    });
}
