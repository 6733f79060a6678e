//! Storage Configuration
//!
//! ## StorageConfig
//!
//! Controls where source files and chunk files live and how the write path
//! behaves:
//!
//! - **container**: Prefix under which both sources and chunks are stored
//!   (default: `sample-claims`)
//! - **max_rows_per_chunk**: Data rows per chunk file (default: 10,000)
//! - **upload_retries**: Attempts per blob operation with exponential
//!   backoff (default: 3)
//!
//! ## Layout
//!
//! ```text
//! {container}/{file_name}                          source file
//! {container}/{tenant}/{run_id}/chunk-0001.csv     first chunk of a run
//! ```
//!
//! Chunk paths depend only on tenant, run id and sequence number, so
//! re-splitting the same run overwrites its chunks instead of adding new ones.
//!
//! ## Usage
//!
//! ```ignore
//! use claimflow_storage::StorageConfig;
//!
//! let config = StorageConfig {
//!     max_rows_per_chunk: 1_000,
//!     ..Default::default()
//! };
//! ```

use crate::error::{Error, Result};
use object_store::path::Path;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Prefix for sources and chunks (default: "sample-claims")
    #[serde(default = "default_container")]
    pub container: String,

    /// Maximum data rows per chunk (default: 10,000)
    #[serde(default = "default_max_rows_per_chunk")]
    pub max_rows_per_chunk: usize,

    /// Attempts per blob operation with exponential backoff (default: 3)
    #[serde(default = "default_retries")]
    pub upload_retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            max_rows_per_chunk: default_max_rows_per_chunk(),
            upload_retries: default_retries(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_rows_per_chunk == 0 {
            return Err(Error::InvalidConfig(
                "max_rows_per_chunk must be greater than zero".to_string(),
            ));
        }
        if self.upload_retries == 0 {
            return Err(Error::InvalidConfig(
                "upload_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Object path of a source file.
    pub fn source_path(&self, file_name: &str) -> Path {
        Path::from(format!("{}/{}", self.container, file_name))
    }

    /// Object path of one chunk of a run.
    pub fn chunk_path(&self, tenant_id: &str, run_id: i64, chunk_id: &str) -> Path {
        Path::from(format!(
            "{}/{}/{}/{}.csv",
            self.container, tenant_id, run_id, chunk_id
        ))
    }
}

/// Chunk id for a 1-based sequence number: `chunk-0001`.
pub fn chunk_id(sequence: usize) -> String {
    format!("chunk-{:04}", sequence)
}

fn default_container() -> String {
    "sample-claims".to_string()
}

fn default_max_rows_per_chunk() -> usize {
    10_000
}

fn default_retries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.container, "sample-claims");
        assert_eq!(config.max_rows_per_chunk, 10_000);
        assert_eq!(config.upload_retries, 3);
        assert!(config.validate().is_ok());

        let parsed: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_paths_are_deterministic() {
        let config = StorageConfig::default();
        assert_eq!(chunk_id(1), "chunk-0001");
        assert_eq!(chunk_id(12), "chunk-0012");
        assert_eq!(
            config.chunk_path("tenant-a", 42, &chunk_id(3)).to_string(),
            "sample-claims/tenant-a/42/chunk-0003.csv"
        );
        assert_eq!(
            config.source_path("claims.csv").to_string(),
            "sample-claims/claims.csv"
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = StorageConfig {
            max_rows_per_chunk: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = StorageConfig {
            upload_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
