//! Modelcache Policy
//!
//! Space accounting for the model cache:
//! - [`SpaceMonitor`] answers whether a filesystem has room for a download
//!   while keeping the configured free space floor.
//! - [`EvictionPlanner`] picks which evictable artifacts would cover a
//!   reclaim target, least recently used first.
//!
//! Both are read-only with respect to the filesystem and the registry. An
//! [`EvictionPlan`] is advisory; nothing here deletes files or records.

mod error;
mod eviction;
mod probe;
mod space;

pub use error::PolicyError;
pub use eviction::{EvictionPlan, EvictionPlanner};
pub use probe::{DiskProbe, DiskUsage, Fs4Probe};
pub use space::{BYTES_PER_GB, SpaceMonitor, SpaceReport};
