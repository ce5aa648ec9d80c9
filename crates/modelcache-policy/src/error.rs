use modelcache_registry::RegistryError;

/// Errors that can occur while planning evictions.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
  /// The registry could not be read.
  #[error("failed to read eviction candidates: {0}")]
  Registry(#[from] RegistryError),
}
