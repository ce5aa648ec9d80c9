use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::ProbeFailurePolicy;

/// Default buffered write size for downloads (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

const CONFIG_FILE_NAME: &str = "config.json";
const DATABASE_FILE_NAME: &str = "model_cache.db";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid config: {message}")]
  Invalid { message: String },
}

/// Bounded polling used when waiting for an artifact another writer is
/// still producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
  pub max_attempts: u32,
  pub delay_ms: u64,
}

impl Default for WaitConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      delay_ms: 1000,
    }
  }
}

impl WaitConfig {
  pub fn delay(&self) -> Duration {
    Duration::from_millis(self.delay_ms)
  }
}

/// Top-level configuration for the model cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Path to the sqlite registry. Relative paths are resolved against the
  /// data directory; `None` means `<data_dir>/model_cache.db`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub database_path: Option<PathBuf>,

  /// Buffered write size used while streaming downloads to disk.
  pub chunk_size: usize,

  /// Minimum progress, as a fraction of the total, between two progress
  /// callbacks.
  pub progress_step: f64,

  pub probe_failure: ProbeFailurePolicy,

  /// Number of LRU records considered when building an advisory eviction
  /// plan for a download that does not fit.
  pub max_eviction_candidates: u32,

  pub wait: WaitConfig,

  pub user_agent: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      database_path: None,
      chunk_size: DEFAULT_CHUNK_SIZE,
      progress_step: 0.002,
      probe_failure: ProbeFailurePolicy::default(),
      max_eviction_candidates: 100,
      wait: WaitConfig::default(),
      user_agent: concat!("modelcache/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl CacheConfig {
  /// Load `config.json` from the data directory, falling back to defaults
  /// when the file does not exist.
  pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
    let path = data_dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
      return Ok(Self::default());
    }
    Self::from_file(&path)
  }

  /// Load configuration from an explicit JSON file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  /// Check value ranges that serde cannot express.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.chunk_size == 0 {
      return Err(ConfigError::Invalid {
        message: "chunk_size must be greater than zero".to_string(),
      });
    }
    if !(0.0..=1.0).contains(&self.progress_step) {
      return Err(ConfigError::Invalid {
        message: format!("progress_step must be within 0..=1, got {}", self.progress_step),
      });
    }
    Ok(())
  }

  /// Resolve the registry database path for a data directory.
  pub fn database_path(&self, data_dir: &Path) -> PathBuf {
    match &self.database_path {
      Some(path) if path.is_absolute() => path.clone(),
      Some(path) => data_dir.join(path),
      None => data_dir.join(DATABASE_FILE_NAME),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::load(dir.path()).unwrap();

    assert_eq!(config, CacheConfig::default());
    assert_eq!(config.chunk_size, 4 * 1024 * 1024);
    assert_eq!(config.wait.max_attempts, 5);
    assert_eq!(config.probe_failure, ProbeFailurePolicy::FailOpen);
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("config.json"),
      r#"{"probe_failure": "fail_closed", "wait": {"delay_ms": 250}}"#,
    )
    .unwrap();

    let config = CacheConfig::load(dir.path()).unwrap();
    assert_eq!(config.probe_failure, ProbeFailurePolicy::FailClosed);
    assert_eq!(config.wait.delay_ms, 250);
    assert_eq!(config.wait.max_attempts, 5);
    assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
  }

  #[test]
  fn test_invalid_chunk_size_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.json"), r#"{"chunk_size": 0}"#).unwrap();

    let err = CacheConfig::load(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
  }

  #[test]
  fn test_database_path_resolution() {
    let data_dir = Path::new("/var/lib/modelcache");
    let mut config = CacheConfig::default();
    assert_eq!(
      config.database_path(data_dir),
      PathBuf::from("/var/lib/modelcache/model_cache.db")
    );

    config.database_path = Some(PathBuf::from("db/registry.db"));
    assert_eq!(
      config.database_path(data_dir),
      PathBuf::from("/var/lib/modelcache/db/registry.db")
    );

    config.database_path = Some(PathBuf::from("/tmp/other.db"));
    assert_eq!(config.database_path(data_dir), PathBuf::from("/tmp/other.db"));
  }

  #[test]
  fn test_probe_failure_policy() {
    assert!(ProbeFailurePolicy::FailOpen.sufficient_on_failure());
    assert!(!ProbeFailurePolicy::FailClosed.sufficient_on_failure());
  }
}
