//! Modelcache Service
//!
//! [`ModelCache`] is the single entry point used by pipeline steps that need
//! model artifacts on disk. It owns one registry handle and shares it with
//! the space monitor, the eviction planner and the download coordinator.
//!
//! Paths passed to the facade are converted to registry keys with
//! [`registry_key`], so relative and absolute spellings of the same file
//! refer to the same record.

mod cache;
mod error;

pub use cache::ModelCache;
pub use error::CacheError;

pub use modelcache_config::{CacheConfig, ProbeFailurePolicy, WaitConfig};
pub use modelcache_fetch::{
  FetchOutcome, FetchRequest, Progress, ProgressFn, infer_category, registry_key, resolve_token,
};
pub use modelcache_policy::{EvictionPlan, SpaceReport};
pub use modelcache_registry::{ArtifactRecord, MIN_FREE_SPACE_GB, RegistryStats};
