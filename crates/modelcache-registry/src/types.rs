use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A cached artifact as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ArtifactRecord {
  pub id: i64,
  /// Absolute filesystem path, unique across records.
  pub path: String,
  /// Artifact class, e.g. "checkpoints" or "loras".
  #[sqlx(rename = "model_type")]
  pub category: String,
  pub filename: String,
  /// Size observed at the last (re)download or registration. Never negative.
  pub size_bytes: i64,
  pub last_used: DateTime<Utc>,
  pub use_count: i64,
  #[sqlx(rename = "download_date")]
  pub downloaded_at: DateTime<Utc>,
  pub protected: bool,
  #[sqlx(rename = "is_ignore")]
  pub ignore_for_eviction: bool,
}

impl ArtifactRecord {
  /// Whether the record may ever appear in an eviction candidate list.
  pub fn is_evictable(&self) -> bool {
    !self.protected && !self.ignore_for_eviction
  }
}

/// Input for [`Registry::upsert`](crate::Registry::upsert).
///
/// `protected` and `ignore_for_eviction` only apply when the path is new; an
/// existing record keeps its flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRegistration {
  pub path: String,
  pub category: String,
  pub size_bytes: i64,
  pub protected: bool,
  pub ignore_for_eviction: bool,
  /// Becomes `last_used`, and `downloaded_at` on first insert.
  pub observed_at: DateTime<Utc>,
}

impl ArtifactRegistration {
  pub fn new(path: impl Into<String>, category: impl Into<String>, size_bytes: i64) -> Self {
    Self {
      path: path.into(),
      category: category.into(),
      size_bytes: size_bytes.max(0),
      protected: false,
      ignore_for_eviction: false,
      observed_at: Utc::now(),
    }
  }

  pub fn protected(mut self, protected: bool) -> Self {
    self.protected = protected;
    self
  }

  pub fn ignore_for_eviction(mut self, ignore: bool) -> Self {
    self.ignore_for_eviction = ignore;
    self
  }

  pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
    self.observed_at = at;
    self
  }

  /// Basename of the path, or the whole path when it has none.
  pub fn filename(&self) -> String {
    Path::new(&self.path)
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.path.clone())
  }
}

/// Number of records per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CategoryCount {
  #[sqlx(rename = "model_type")]
  pub category: String,
  pub count: i64,
}

/// Aggregate view over the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
  pub count: i64,
  pub total_bytes: i64,
  pub by_category: Vec<CategoryCount>,
  /// Top records by use count.
  pub most_used: Vec<ArtifactRecord>,
}
