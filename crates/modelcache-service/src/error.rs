use modelcache_config::ConfigError;
use modelcache_fetch::FetchError;
use modelcache_policy::PolicyError;
use modelcache_registry::RegistryError;

/// Errors surfaced by [`ModelCache`](crate::ModelCache).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Policy(#[from] PolicyError),

  #[error(transparent)]
  Fetch(#[from] FetchError),
}

impl CacheError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::Registry(RegistryError::NotFound { .. }))
  }
}
