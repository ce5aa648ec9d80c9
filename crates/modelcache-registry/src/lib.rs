//! Modelcache Registry
//!
//! This crate provides the durable store of artifact metadata and key/value
//! settings for the model cache. Data is persisted to a single SQLite file.
//!
//! The [`Registry`] trait defines operations for:
//! - Registering artifacts and recording their use
//! - Querying artifacts by path, recency, and eviction eligibility
//! - Reading and writing settings
//!
//! Each operation runs in its own transaction. There is no atomicity across
//! operations: a [`Registry::list_lru`] followed by a [`Registry::delete`] can
//! interleave with other callers.

mod sqlite;
mod types;

pub use sqlite::SqliteRegistry;
pub use types::{ArtifactRecord, ArtifactRegistration, CategoryCount, RegistryStats};

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Setting key holding the free space floor in GiB.
pub const MIN_FREE_SPACE_GB: &str = "min_free_space_gb";

/// Value used when [`MIN_FREE_SPACE_GB`] is unset or unreadable.
pub const DEFAULT_MIN_FREE_SPACE_GB: &str = "10";

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// No record exists for the path.
  #[error("no artifact registered at {path}")]
  NotFound { path: String },

  /// The underlying store failed (disk full, corruption, permissions).
  #[error("registry storage error: {0}")]
  Storage(#[from] sqlx::Error),

  /// Schema initialization failed.
  #[error("registry migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("failed to prepare registry location {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl RegistryError {
  pub fn not_found(path: impl Into<String>) -> Self {
    Self::NotFound { path: path.into() }
  }

  /// True for failures of the storage layer itself, as opposed to a
  /// missing record.
  pub fn is_storage(&self) -> bool {
    !matches!(self, Self::NotFound { .. })
  }
}

/// Storage trait for artifact records and settings.
#[async_trait]
pub trait Registry: Send + Sync {
  /// Insert a record, or for a known path update its size and last use and
  /// increment its use count. Existing `protected`/`ignore_for_eviction`
  /// flags are preserved.
  async fn upsert(
    &self,
    registration: &ArtifactRegistration,
  ) -> Result<ArtifactRecord, RegistryError>;

  /// Get a record by path.
  async fn get(&self, path: &str) -> Result<Option<ArtifactRecord>, RegistryError>;

  /// All records, most recently used first.
  async fn list_all(&self) -> Result<Vec<ArtifactRecord>, RegistryError>;

  /// Evictable records (neither protected nor ignored), least recently used
  /// first, ties broken by ascending id.
  async fn list_lru(&self, limit: u32) -> Result<Vec<ArtifactRecord>, RegistryError>;

  /// Record a use of an existing artifact. Returns `false` when the path has
  /// no record; nothing is inserted in that case.
  async fn touch(&self, path: &str, at: DateTime<Utc>) -> Result<bool, RegistryError>;

  /// Remove the record for a path.
  async fn delete(&self, path: &str) -> Result<(), RegistryError>;

  async fn set_protected(&self, path: &str, protected: bool) -> Result<(), RegistryError>;

  async fn set_ignore_for_eviction(&self, path: &str, ignore: bool) -> Result<(), RegistryError>;

  /// Get a setting, or `default` when it is unset.
  async fn get_setting(&self, key: &str, default: &str) -> Result<String, RegistryError>;

  async fn set_setting(&self, key: &str, value: &str) -> Result<(), RegistryError>;

  /// All settings ordered by key.
  async fn list_settings(&self) -> Result<Vec<(String, String)>, RegistryError>;

  async fn stats(&self) -> Result<RegistryStats, RegistryError>;
}
