use std::path::{Path, PathBuf};
use std::sync::Arc;

use modelcache_config::CacheConfig;
use modelcache_fetch::{
  DownloadCoordinator, FetchOutcome, FetchRequest, ProgressFn, UsageTracker, registry_key,
};
use modelcache_policy::{
  DiskProbe, EvictionPlan, EvictionPlanner, Fs4Probe, SpaceMonitor, SpaceReport,
};
use modelcache_registry::{
  ArtifactRecord, ArtifactRegistration, Registry, RegistryStats, SqliteRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CacheError;

/// The model artifact cache.
pub struct ModelCache {
  config: CacheConfig,
  registry: Arc<dyn Registry>,
  space: Arc<SpaceMonitor>,
  planner: Arc<EvictionPlanner>,
  usage: UsageTracker,
  coordinator: DownloadCoordinator,
}

impl ModelCache {
  /// Open the cache rooted at `data_dir`, creating and migrating the
  /// registry database as needed. Any failure here is fatal for the cache.
  pub async fn open(data_dir: &Path, config: CacheConfig) -> Result<Self, CacheError> {
    config.validate()?;
    let database_path = config.database_path(data_dir);
    let registry = SqliteRegistry::open(&database_path).await?;
    info!(path = %database_path.display(), "opened model cache registry");

    Self::with_registry(Arc::new(registry), config)
  }

  /// Build the cache over an existing registry using the OS disk probe.
  pub fn with_registry(
    registry: Arc<dyn Registry>,
    config: CacheConfig,
  ) -> Result<Self, CacheError> {
    Self::with_parts(registry, Arc::new(Fs4Probe), config)
  }

  /// Build the cache over an existing registry and disk probe.
  pub fn with_parts(
    registry: Arc<dyn Registry>,
    probe: Arc<dyn DiskProbe>,
    config: CacheConfig,
  ) -> Result<Self, CacheError> {
    let space = Arc::new(SpaceMonitor::with_probe(
      Arc::clone(&registry),
      probe,
      config.probe_failure,
    ));
    let planner = Arc::new(EvictionPlanner::new(Arc::clone(&registry)));
    let usage = UsageTracker::new(Arc::clone(&registry));
    let coordinator = DownloadCoordinator::new(
      &config,
      Arc::clone(&registry),
      Arc::clone(&space),
      Arc::clone(&planner),
    )?;

    Ok(Self {
      config,
      registry,
      space,
      planner,
      usage,
      coordinator,
    })
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  pub fn registry(&self) -> &Arc<dyn Registry> {
    &self.registry
  }

  /// Register an artifact, or record another use of a known one. Flags of
  /// an existing record are kept; `ignore` only applies to new records.
  pub async fn register_model(
    &self,
    path: &Path,
    category: &str,
    size_bytes: u64,
    ignore: bool,
  ) -> Result<ArtifactRecord, CacheError> {
    let registration = ArtifactRegistration::new(
      registry_key(path),
      category,
      i64::try_from(size_bytes).unwrap_or(i64::MAX),
    )
    .ignore_for_eviction(ignore);

    Ok(self.registry.upsert(&registration).await?)
  }

  /// Record a use of the artifact at `path`, registering it if unknown.
  pub async fn update_usage(&self, path: &Path) -> Result<(), CacheError> {
    Ok(self.usage.touch(path).await?)
  }

  pub async fn get_info(&self, path: &Path) -> Result<Option<ArtifactRecord>, CacheError> {
    Ok(self.registry.get(&registry_key(path)).await?)
  }

  pub async fn list_all(&self) -> Result<Vec<ArtifactRecord>, CacheError> {
    Ok(self.registry.list_all().await?)
  }

  pub async fn list_lru(&self, limit: u32) -> Result<Vec<ArtifactRecord>, CacheError> {
    Ok(self.registry.list_lru(limit).await?)
  }

  pub async fn check_free_space(&self, dir: &Path, required_bytes: u64) -> SpaceReport {
    self.space.check_free_space(dir, required_bytes).await
  }

  pub async fn fetch(
    &self,
    request: &FetchRequest,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
  ) -> Result<FetchOutcome, CacheError> {
    Ok(self.coordinator.fetch(request, progress, cancel).await?)
  }

  /// Fetch into the directory `request.dest`, naming the file from the
  /// response.
  pub async fn fetch_into_dir(
    &self,
    request: &FetchRequest,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
  ) -> Result<FetchOutcome, CacheError> {
    Ok(self.coordinator.fetch_into_dir(request, progress, cancel).await?)
  }

  /// Read a setting. Storage failures are logged and yield `default`.
  pub async fn get_setting(&self, key: &str, default: &str) -> String {
    match self.registry.get_setting(key, default).await {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "failed to read setting, using default");
        default.to_string()
      }
    }
  }

  pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), CacheError> {
    Ok(self.registry.set_setting(key, value).await?)
  }

  pub async fn list_settings(&self) -> Result<Vec<(String, String)>, CacheError> {
    Ok(self.registry.list_settings().await?)
  }

  /// Remove the record for `path`. The file itself is left alone.
  pub async fn delete(&self, path: &Path) -> Result<(), CacheError> {
    Ok(self.registry.delete(&registry_key(path)).await?)
  }

  pub async fn protect(&self, path: &Path, protected: bool) -> Result<(), CacheError> {
    Ok(self
      .registry
      .set_protected(&registry_key(path), protected)
      .await?)
  }

  pub async fn set_ignore(&self, path: &Path, ignore: bool) -> Result<(), CacheError> {
    Ok(self
      .registry
      .set_ignore_for_eviction(&registry_key(path), ignore)
      .await?)
  }

  pub async fn stats(&self) -> Result<RegistryStats, CacheError> {
    Ok(self.registry.stats().await?)
  }

  /// Plan which artifacts to evict to reclaim `target_bytes`. Uses the
  /// configured candidate limit when `max_candidates` is `None`.
  pub async fn plan_eviction(
    &self,
    target_bytes: u64,
    max_candidates: Option<u32>,
  ) -> Result<EvictionPlan, CacheError> {
    let max_candidates = max_candidates.unwrap_or(self.config.max_eviction_candidates);
    Ok(self.planner.plan(target_bytes, max_candidates).await?)
  }

  /// Wait, within the configured bound, for another writer to publish
  /// `path`.
  pub async fn wait_for_artifact(
    &self,
    path: &Path,
    cancel: &CancellationToken,
  ) -> Result<PathBuf, CacheError> {
    Ok(modelcache_fetch::wait_for_artifact(path, &self.config.wait, cancel).await?)
  }
}
