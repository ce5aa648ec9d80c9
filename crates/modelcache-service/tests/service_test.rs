//! Integration tests for the `ModelCache` facade.

use std::io;
use std::path::Path;
use std::sync::Arc;

use modelcache_config::{CacheConfig, ConfigError, WaitConfig};
use modelcache_policy::{BYTES_PER_GB, DiskProbe, DiskUsage};
use modelcache_registry::{Registry, SqliteRegistry};
use modelcache_service::{CacheError, MIN_FREE_SPACE_GB, ModelCache, registry_key};
use tokio_util::sync::CancellationToken;

struct FixedProbe(u64);

impl DiskProbe for FixedProbe {
  fn usage(&self, _path: &Path) -> io::Result<DiskUsage> {
    Ok(DiskUsage {
      free_bytes: self.0,
      total_bytes: self.0 * 4,
    })
  }
}

async fn open_cache() -> (ModelCache, tempfile::TempDir) {
  let dir = tempfile::tempdir().unwrap();
  let cache = ModelCache::open(dir.path(), CacheConfig::default())
    .await
    .expect("failed to open cache");
  (cache, dir)
}

#[tokio::test]
async fn test_open_creates_database_and_seeds_floor() {
  let (cache, dir) = open_cache().await;

  assert!(dir.path().join("model_cache.db").exists());
  assert_eq!(cache.get_setting(MIN_FREE_SPACE_GB, "42").await, "10");
  assert_eq!(cache.get_setting("missing_key", "fallback").await, "fallback");
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
  let dir = tempfile::tempdir().unwrap();
  let config = CacheConfig {
    chunk_size: 0,
    ..CacheConfig::default()
  };

  let err = ModelCache::open(dir.path(), config).await.err().unwrap();
  assert!(matches!(err, CacheError::Config(ConfigError::Invalid { .. })));
}

#[tokio::test]
async fn test_protect_hides_from_lru() {
  let (cache, _dir) = open_cache().await;
  let path = Path::new("/models/a.safetensors");

  cache.register_model(path, "loras", 100, false).await.unwrap();
  let lru = cache.list_lru(1).await.unwrap();
  assert_eq!(lru.len(), 1);
  assert_eq!(lru[0].path, "/models/a.safetensors");

  cache.protect(path, true).await.unwrap();
  assert!(cache.list_lru(1).await.unwrap().is_empty());

  cache.protect(path, false).await.unwrap();
  assert_eq!(cache.list_lru(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_twice_counts_use_and_keeps_ignore() {
  let (cache, _dir) = open_cache().await;
  let path = Path::new("/models/vae/static.safetensors");

  let first = cache.register_model(path, "vae", 10, true).await.unwrap();
  let second = cache.register_model(path, "vae", 10, false).await.unwrap();

  assert_eq!(first.id, second.id);
  assert_eq!(second.use_count, 2);
  assert!(second.ignore_for_eviction);
  assert_eq!(cache.list_all().await.unwrap().len(), 1);
  assert!(cache.list_lru(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_relative_paths_share_a_record() {
  let (cache, _dir) = open_cache().await;
  let relative = Path::new("models/loras/rel.safetensors");

  cache.register_model(relative, "loras", 5, false).await.unwrap();
  let absolute = std::env::current_dir().unwrap().join(relative);

  let record = cache.get_info(&absolute).await.unwrap().unwrap();
  assert_eq!(record.path, registry_key(relative));
}

#[tokio::test]
async fn test_update_usage_registers_unknown() {
  let (cache, dir) = open_cache().await;
  let path = dir.path().join("models/checkpoints/sd.ckpt");
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(&path, vec![1u8; 256]).unwrap();

  cache.update_usage(&path).await.unwrap();
  cache.update_usage(&path).await.unwrap();

  let record = cache.get_info(&path).await.unwrap().unwrap();
  assert_eq!(record.category, "checkpoints");
  assert_eq!(record.size_bytes, 256);
  assert_eq!(record.use_count, 2);
}

#[tokio::test]
async fn test_missing_records_are_not_found() {
  let (cache, _dir) = open_cache().await;
  let path = Path::new("/models/none.bin");

  assert!(cache.get_info(path).await.unwrap().is_none());
  assert!(cache.delete(path).await.unwrap_err().is_not_found());
  assert!(cache.protect(path, true).await.unwrap_err().is_not_found());
  assert!(cache.set_ignore(path, true).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_removes_record() {
  let (cache, _dir) = open_cache().await;
  let path = Path::new("/models/loras/old.safetensors");
  cache.register_model(path, "loras", 1, false).await.unwrap();

  cache.delete(path).await.unwrap();
  assert!(cache.get_info(path).await.unwrap().is_none());
}

#[tokio::test]
async fn test_space_and_plan_through_facade() {
  let dir = tempfile::tempdir().unwrap();
  let registry: Arc<dyn Registry> = Arc::new(
    SqliteRegistry::open(&dir.path().join("model_cache.db"))
      .await
      .unwrap(),
  );
  let cache = ModelCache::with_parts(
    registry,
    Arc::new(FixedProbe(5 * BYTES_PER_GB)),
    CacheConfig::default(),
  )
  .unwrap();

  let report = cache.check_free_space(Path::new("/models"), 0).await;
  assert!(!report.sufficient);

  cache
    .register_model(Path::new("/models/one.bin"), "loras", 100, false)
    .await
    .unwrap();
  cache
    .register_model(Path::new("/models/two.bin"), "loras", 80, false)
    .await
    .unwrap();

  let plan = cache.plan_eviction(150, None).await.unwrap();
  assert!(plan.met_target);
  assert_eq!(plan.reclaimable, 180);
  assert_eq!(plan.candidates.len(), 2);

  let limited = cache.plan_eviction(150, Some(1)).await.unwrap();
  assert!(!limited.met_target);
  assert_eq!(limited.candidates.len(), 1);

  cache.set_setting(MIN_FREE_SPACE_GB, "1").await.unwrap();
  assert!(cache.check_free_space(Path::new("/models"), 0).await.sufficient);
}

#[tokio::test]
async fn test_settings_and_stats() {
  let (cache, _dir) = open_cache().await;
  cache.set_setting("theme", "dark").await.unwrap();
  cache
    .register_model(Path::new("/models/loras/a.bin"), "loras", 10, false)
    .await
    .unwrap();
  cache
    .register_model(Path::new("/models/vae/b.bin"), "vae", 20, false)
    .await
    .unwrap();

  let settings = cache.list_settings().await.unwrap();
  assert!(settings.contains(&("theme".to_string(), "dark".to_string())));
  assert!(settings.contains(&(MIN_FREE_SPACE_GB.to_string(), "10".to_string())));

  let stats = cache.stats().await.unwrap();
  assert_eq!(stats.count, 2);
  assert_eq!(stats.total_bytes, 30);
  assert_eq!(stats.by_category.len(), 2);
}

#[tokio::test]
async fn test_wait_for_artifact_uses_configured_bound() {
  let dir = tempfile::tempdir().unwrap();
  let config = CacheConfig {
    wait: WaitConfig {
      max_attempts: 2,
      delay_ms: 10,
    },
    ..CacheConfig::default()
  };
  let cache = ModelCache::open(dir.path(), config).await.unwrap();

  let present = dir.path().join("present.bin");
  std::fs::write(&present, b"x").unwrap();
  assert_eq!(
    cache
      .wait_for_artifact(&present, &CancellationToken::new())
      .await
      .unwrap(),
    present
  );

  let err = cache
    .wait_for_artifact(&dir.path().join("absent.bin"), &CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    CacheError::Fetch(modelcache_fetch::FetchError::NotAvailable { attempts: 2, .. })
  ));
}
