//! Modelcache Config
//!
//! This crate contains the serializable configuration for the model cache.
//! Configuration is read from a JSON file in the data directory
//! (`config.json`); every field has a default, so a missing file or a
//! partial file is valid.
//!
//! Runtime-tunable values that must survive restarts and be shared between
//! processes (such as the minimum free space floor) are stored as registry
//! settings instead, not here.

mod cache;
mod policy;

pub use cache::{CacheConfig, ConfigError, DEFAULT_CHUNK_SIZE, WaitConfig};
pub use policy::ProbeFailurePolicy;
