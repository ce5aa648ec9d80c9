use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use modelcache_registry::{ArtifactRegistration, Registry, RegistryError};
use tokio::fs;
use tracing::debug;

const UNKNOWN_CATEGORY: &str = "unknown";

/// Records artifact accesses in the registry.
#[derive(Clone)]
pub struct UsageTracker {
  registry: Arc<dyn Registry>,
}

impl UsageTracker {
  pub fn new(registry: Arc<dyn Registry>) -> Self {
    Self { registry }
  }

  /// Record a use of the artifact at `path`.
  ///
  /// A known artifact gets `use_count + 1` and `last_used = now`. An unknown
  /// one is registered with its live file size (0 if the file is missing)
  /// and a category inferred from the path.
  pub async fn touch(&self, path: &Path) -> Result<(), RegistryError> {
    let key = registry_key(path);
    let now = Utc::now();

    if self.registry.touch(&key, now).await? {
      debug!(path = %key, "recorded artifact use");
      return Ok(());
    }

    let size_bytes = match fs::metadata(path).await {
      Ok(metadata) => i64::try_from(metadata.len()).unwrap_or(i64::MAX),
      Err(_) => 0,
    };
    let category = infer_category(Path::new(&key));
    let registration = ArtifactRegistration::new(key, category, size_bytes).observed_at(now);
    self.registry.upsert(&registration).await?;

    debug!(path = %registration.path, size_bytes, "registered artifact on first use");
    Ok(())
  }
}

/// The registry key for a filesystem path: the path made absolute against
/// the current directory, without resolving symlinks.
pub fn registry_key(path: &Path) -> String {
  let absolute: PathBuf = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
  absolute.to_string_lossy().into_owned()
}

/// Category of an artifact from its location: the directory directly below
/// the innermost `models` directory, e.g. `.../models/loras/x.safetensors`
/// is `loras`. Anything else is `unknown`.
pub fn infer_category(path: &Path) -> String {
  let parts: Vec<&str> = path
    .components()
    .filter_map(|component| match component {
      Component::Normal(part) => part.to_str(),
      _ => None,
    })
    .collect();

  // The last component is the file itself, never a category.
  let dirs = parts.len().saturating_sub(1);
  parts[..dirs]
    .iter()
    .rposition(|part| *part == "models")
    .and_then(|index| parts[..dirs].get(index + 1))
    .map(|category| category.to_string())
    .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
}
