use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::debug;

use crate::{
  ArtifactRecord, ArtifactRegistration, CategoryCount, Registry, RegistryError, RegistryStats,
};

const MOST_USED_LIMIT: i64 = 5;

/// SQLite-based registry implementation.
///
/// The pool is capped at one connection, so in-process callers share a
/// single owned connection and their transactions are serialized. Separate
/// processes writing the same file are not coordinated.
pub struct SqliteRegistry {
  pool: SqlitePool,
}

impl SqliteRegistry {
  /// Create a new SQLite registry with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the registry file at `path` and bring its
  /// schema up to date.
  pub async fn open(path: &Path) -> Result<Self, RegistryError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;

    let registry = Self::new(pool);
    registry.migrate().await?;
    debug!(path = %path.display(), "opened model registry");
    Ok(registry)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  /// Close the underlying pool, waiting for in-flight operations.
  pub async fn close(&self) {
    self.pool.close().await;
  }

  async fn set_flag(&self, path: &str, sql: &str, value: bool) -> Result<(), RegistryError> {
    let result = sqlx::query(sql)
      .bind(value)
      .bind(path)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 0 {
      return Err(RegistryError::not_found(path));
    }
    Ok(())
  }
}

#[async_trait]
impl Registry for SqliteRegistry {
  async fn upsert(
    &self,
    registration: &ArtifactRegistration,
  ) -> Result<ArtifactRecord, RegistryError> {
    let record: ArtifactRecord = sqlx::query_as(
      r#"
            INSERT INTO models (path, model_type, filename, size_bytes, last_used, use_count, download_date, protected, is_ignore)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT (path) DO UPDATE SET
              size_bytes = excluded.size_bytes,
              last_used = excluded.last_used,
              use_count = models.use_count + 1
            RETURNING id, path, model_type, filename, size_bytes, last_used, use_count, download_date, protected, is_ignore
            "#,
    )
    .bind(&registration.path)
    .bind(&registration.category)
    .bind(registration.filename())
    .bind(registration.size_bytes)
    .bind(registration.observed_at)
    .bind(registration.observed_at)
    .bind(registration.protected)
    .bind(registration.ignore_for_eviction)
    .fetch_one(&self.pool)
    .await?;

    debug!(
      path = %record.path,
      use_count = record.use_count,
      size_bytes = record.size_bytes,
      "registered artifact"
    );
    Ok(record)
  }

  async fn get(&self, path: &str) -> Result<Option<ArtifactRecord>, RegistryError> {
    let record = sqlx::query_as(
      r#"
            SELECT id, path, model_type, filename, size_bytes, last_used, use_count, download_date, protected, is_ignore
            FROM models
            WHERE path = ?
            "#,
    )
    .bind(path)
    .fetch_optional(&self.pool)
    .await?;

    Ok(record)
  }

  async fn list_all(&self) -> Result<Vec<ArtifactRecord>, RegistryError> {
    let records = sqlx::query_as(
      r#"
            SELECT id, path, model_type, filename, size_bytes, last_used, use_count, download_date, protected, is_ignore
            FROM models
            ORDER BY last_used DESC, id DESC
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(records)
  }

  async fn list_lru(&self, limit: u32) -> Result<Vec<ArtifactRecord>, RegistryError> {
    let records = sqlx::query_as(
      r#"
            SELECT id, path, model_type, filename, size_bytes, last_used, use_count, download_date, protected, is_ignore
            FROM models
            WHERE protected = 0 AND is_ignore = 0
            ORDER BY last_used ASC, id ASC
            LIMIT ?
            "#,
    )
    .bind(i64::from(limit))
    .fetch_all(&self.pool)
    .await?;

    Ok(records)
  }

  async fn touch(&self, path: &str, at: DateTime<Utc>) -> Result<bool, RegistryError> {
    let result = sqlx::query(
      r#"
            UPDATE models
            SET last_used = ?, use_count = use_count + 1
            WHERE path = ?
            "#,
    )
    .bind(at)
    .bind(path)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn delete(&self, path: &str) -> Result<(), RegistryError> {
    let result = sqlx::query("DELETE FROM models WHERE path = ?")
      .bind(path)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 0 {
      return Err(RegistryError::not_found(path));
    }
    debug!(path = %path, "deleted artifact record");
    Ok(())
  }

  async fn set_protected(&self, path: &str, protected: bool) -> Result<(), RegistryError> {
    self
      .set_flag(
        path,
        "UPDATE models SET protected = ? WHERE path = ?",
        protected,
      )
      .await
  }

  async fn set_ignore_for_eviction(&self, path: &str, ignore: bool) -> Result<(), RegistryError> {
    self
      .set_flag(path, "UPDATE models SET is_ignore = ? WHERE path = ?", ignore)
      .await
  }

  async fn get_setting(&self, key: &str, default: &str) -> Result<String, RegistryError> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;

    Ok(value.unwrap_or_else(|| default.to_string()))
  }

  async fn set_setting(&self, key: &str, value: &str) -> Result<(), RegistryError> {
    sqlx::query(
      r#"
            INSERT INTO settings (key, value)
            VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
    )
    .bind(key)
    .bind(value)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_settings(&self) -> Result<Vec<(String, String)>, RegistryError> {
    let settings = sqlx::query_as("SELECT key, value FROM settings ORDER BY key ASC")
      .fetch_all(&self.pool)
      .await?;

    Ok(settings)
  }

  async fn stats(&self) -> Result<RegistryStats, RegistryError> {
    let mut tx = self.pool.begin().await?;

    let (count, total_bytes): (i64, i64) =
      sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM models")
        .fetch_one(&mut *tx)
        .await?;

    let by_category: Vec<CategoryCount> = sqlx::query_as(
      r#"
            SELECT model_type, COUNT(*) AS count
            FROM models
            GROUP BY model_type
            ORDER BY model_type ASC
            "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let most_used: Vec<ArtifactRecord> = sqlx::query_as(
      r#"
            SELECT id, path, model_type, filename, size_bytes, last_used, use_count, download_date, protected, is_ignore
            FROM models
            ORDER BY use_count DESC, id ASC
            LIMIT ?
            "#,
    )
    .bind(MOST_USED_LIMIT)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(RegistryStats {
      count,
      total_bytes,
      by_category,
      most_used,
    })
  }
}
