//! Pipeline Configuration
//!
//! All settings are gathered once into a [`PipelineConfig`], validated, and
//! passed to each component explicitly. Nothing reads the environment after
//! startup.
//!
//! ## Environment Variables
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `CLAIMFLOW_PARTITION_COUNT` | `partition_count` | 32 |
//! | `CLAIMFLOW_MAX_PARALLEL_CHUNKS` | `max_parallel_chunks` | 8 |
//! | `CLAIMFLOW_CONTAINER` | `storage.container` | sample-claims |
//! | `CLAIMFLOW_MAX_ROWS_PER_CHUNK` | `storage.max_rows_per_chunk` | 10000 |
//! | `CLAIMFLOW_UPLOAD_RETRIES` | `storage.upload_retries` | 3 |
//! | `CLAIMFLOW_MAX_BATCH_BYTES` | `publisher.max_batch_bytes` | 1048576 |
//! | `CLAIMFLOW_MAX_BATCH_MESSAGES` | `publisher.max_batch_messages` | 1000 |
//! | `CLAIMFLOW_NAMESPACE` | `publisher.namespace`, `consumer.namespace` | PetClaim |
//! | `CLAIMFLOW_CONSUMER_GROUP` | `consumer.consumer_group` | entity-actors |
//! | `CLAIMFLOW_ACTOR_IDLE_TIMEOUT_MS` | `consumer.actor_idle_timeout` | 300000 |
//! | `CLAIMFLOW_MAX_RETRIES` | `retry.max_retries` | 5 |
//!
//! ## Usage
//!
//! ```ignore
//! let config = PipelineConfig::from_env()?;
//! config.validate()?;
//! ```

use crate::error::{CoordinatorError, Result};
use claimflow_agent::ConsumerConfig;
use claimflow_client::{PublisherConfig, RetryPolicy};
use claimflow_core::DEFAULT_PARTITION_COUNT;
use claimflow_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Stream partitions; fixed for the lifetime of the stream (default: 32)
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,

    /// Chunk processors running at once per run (default: 8)
    #[serde(default = "default_max_parallel_chunks")]
    pub max_parallel_chunks: usize,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Backoff for stream sends, metadata writes and consumer redelivery
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partition_count: default_partition_count(),
            max_parallel_chunks: default_max_parallel_chunks(),
            storage: StorageConfig::default(),
            publisher: PublisherConfig::default(),
            consumer: ConsumerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_partition_count() -> u32 {
    DEFAULT_PARTITION_COUNT
}

fn default_max_parallel_chunks() -> usize {
    8
}

impl PipelineConfig {
    /// Defaults overridden by `CLAIMFLOW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "CLAIMFLOW_PARTITION_COUNT")? {
            config.partition_count = v;
        }
        if let Some(v) = parse(&lookup, "CLAIMFLOW_MAX_PARALLEL_CHUNKS")? {
            config.max_parallel_chunks = v;
        }
        if let Some(v) = lookup("CLAIMFLOW_CONTAINER") {
            config.storage.container = v;
        }
        if let Some(v) = parse(&lookup, "CLAIMFLOW_MAX_ROWS_PER_CHUNK")? {
            config.storage.max_rows_per_chunk = v;
        }
        if let Some(v) = parse(&lookup, "CLAIMFLOW_UPLOAD_RETRIES")? {
            config.storage.upload_retries = v;
        }
        if let Some(v) = parse(&lookup, "CLAIMFLOW_MAX_BATCH_BYTES")? {
            config.publisher.max_batch_bytes = v;
        }
        if let Some(v) = parse(&lookup, "CLAIMFLOW_MAX_BATCH_MESSAGES")? {
            config.publisher.max_batch_messages = v;
        }
        if let Some(v) = lookup("CLAIMFLOW_NAMESPACE") {
            config.publisher.namespace = v.clone();
            config.consumer.namespace = v;
        }
        if let Some(v) = lookup("CLAIMFLOW_CONSUMER_GROUP") {
            config.consumer.consumer_group = v;
        }
        if let Some(v) = parse(&lookup, "CLAIMFLOW_ACTOR_IDLE_TIMEOUT_MS")? {
            config.consumer.actor_idle_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "CLAIMFLOW_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }

        Ok(config)
    }

    /// Check every setting once, before any component is built.
    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(CoordinatorError::Config(
                "partition_count must be greater than zero".to_string(),
            ));
        }
        if self.max_parallel_chunks == 0 {
            return Err(CoordinatorError::Config(
                "max_parallel_chunks must be greater than zero".to_string(),
            ));
        }
        if self.consumer.fetch_max == 0 {
            return Err(CoordinatorError::Config(
                "consumer.fetch_max must be greater than zero".to_string(),
            ));
        }
        if self.consumer.actor_idle_timeout.is_zero() {
            return Err(CoordinatorError::Config(
                "consumer.actor_idle_timeout must be greater than zero".to_string(),
            ));
        }
        if self.consumer.namespace != self.publisher.namespace {
            return Err(CoordinatorError::Config(format!(
                "consumer namespace {:?} does not match publisher namespace {:?}",
                self.consumer.namespace, self.publisher.namespace
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(CoordinatorError::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        self.storage.validate()?;
        self.publisher.validate()?;
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoordinatorError::Config(format!("{key}: invalid value {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.partition_count, 32);
        assert_eq!(config.max_parallel_chunks, 8);
        assert_eq!(config.storage.max_rows_per_chunk, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("CLAIMFLOW_PARTITION_COUNT", "8"),
            ("CLAIMFLOW_MAX_ROWS_PER_CHUNK", " 500 "),
            ("CLAIMFLOW_NAMESPACE", "DogClaim"),
            ("CLAIMFLOW_CONSUMER_GROUP", "replay"),
            ("CLAIMFLOW_ACTOR_IDLE_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.partition_count, 8);
        assert_eq!(config.storage.max_rows_per_chunk, 500);
        assert_eq!(config.publisher.namespace, "DogClaim");
        assert_eq!(config.consumer.namespace, "DogClaim");
        assert_eq!(config.consumer.consumer_group, "replay");
        assert_eq!(config.consumer.actor_idle_timeout, Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unparsable_value_is_an_error() {
        let err = PipelineConfig::from_lookup(lookup(&[("CLAIMFLOW_PARTITION_COUNT", "many")]))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = PipelineConfig {
            partition_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.storage.max_rows_per_chunk = 0;
        assert!(matches!(config.validate(), Err(CoordinatorError::Storage(_))));

        let mut config = PipelineConfig::default();
        config.consumer.namespace = "Other".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.consumer.actor_idle_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"partition_count": 4, "storage": {"max_rows_per_chunk": 10}}"#)
                .unwrap();
        assert_eq!(config.partition_count, 4);
        assert_eq!(config.storage.max_rows_per_chunk, 10);
        assert_eq!(config.storage.container, "sample-claims");
        assert_eq!(config.retry, RetryPolicy::default());
    }
}
