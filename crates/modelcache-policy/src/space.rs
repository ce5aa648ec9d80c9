use std::path::{Path, PathBuf};
use std::sync::Arc;

use modelcache_config::ProbeFailurePolicy;
use modelcache_registry::{DEFAULT_MIN_FREE_SPACE_GB, MIN_FREE_SPACE_GB, Registry};
use serde::Serialize;
use tracing::{debug, warn};

use crate::probe::{DiskProbe, DiskUsage, Fs4Probe};

/// Bytes per unit of the `min_free_space_gb` setting.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Outcome of a free space check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpaceReport {
  pub free_bytes: u64,
  /// `None` when the probe failed.
  pub total_bytes: Option<u64>,
  pub min_free_bytes: u64,
  pub required_bytes: u64,
  /// `free_bytes >= min_free_bytes + required_bytes`, or the failure policy
  /// when `probe_failed`.
  pub sufficient: bool,
  pub probe_failed: bool,
}

impl SpaceReport {
  /// Bytes that would have to be reclaimed for the check to pass.
  pub fn shortfall(&self) -> u64 {
    self
      .min_free_bytes
      .saturating_add(self.required_bytes)
      .saturating_sub(self.free_bytes)
  }
}

/// Decides whether an operation needing extra disk space may proceed.
pub struct SpaceMonitor {
  registry: Arc<dyn Registry>,
  probe: Arc<dyn DiskProbe>,
  on_probe_failure: ProbeFailurePolicy,
}

impl SpaceMonitor {
  /// Create a monitor using the OS disk probe.
  pub fn new(registry: Arc<dyn Registry>, on_probe_failure: ProbeFailurePolicy) -> Self {
    Self::with_probe(registry, Arc::new(Fs4Probe), on_probe_failure)
  }

  pub fn with_probe(
    registry: Arc<dyn Registry>,
    probe: Arc<dyn DiskProbe>,
    on_probe_failure: ProbeFailurePolicy,
  ) -> Self {
    Self {
      registry,
      probe,
      on_probe_failure,
    }
  }

  /// Check whether `target_dir`'s filesystem can take `required_bytes` more
  /// while keeping the configured floor free.
  ///
  /// This never fails. A broken disk probe is resolved by the
  /// [`ProbeFailurePolicy`] (fail-open by default, which lets downloads
  /// proceed unchecked). An unreadable floor setting falls back to the
  /// default floor.
  pub async fn check_free_space(&self, target_dir: &Path, required_bytes: u64) -> SpaceReport {
    let min_free_bytes = self.min_free_bytes().await;

    match self.probe_usage(target_dir.to_path_buf()).await {
      Ok(usage) => {
        let sufficient = usage.free_bytes >= min_free_bytes.saturating_add(required_bytes);
        debug!(
          dir = %target_dir.display(),
          free_bytes = usage.free_bytes,
          min_free_bytes,
          required_bytes,
          sufficient,
          "checked free space"
        );
        SpaceReport {
          free_bytes: usage.free_bytes,
          total_bytes: Some(usage.total_bytes),
          min_free_bytes,
          required_bytes,
          sufficient,
          probe_failed: false,
        }
      }
      Err(e) => {
        let sufficient = self.on_probe_failure.sufficient_on_failure();
        warn!(
          dir = %target_dir.display(),
          error = %e,
          policy = ?self.on_probe_failure,
          sufficient,
          "disk usage probe failed"
        );
        SpaceReport {
          free_bytes: 0,
          total_bytes: None,
          min_free_bytes,
          required_bytes,
          sufficient,
          probe_failed: true,
        }
      }
    }
  }

  /// The free space floor in bytes, read from registry settings.
  pub async fn min_free_bytes(&self) -> u64 {
    let raw = match self
      .registry
      .get_setting(MIN_FREE_SPACE_GB, DEFAULT_MIN_FREE_SPACE_GB)
      .await
    {
      Ok(value) => value,
      Err(e) => {
        warn!(error = %e, "failed to read free space floor, using default");
        DEFAULT_MIN_FREE_SPACE_GB.to_string()
      }
    };

    match parse_gb(&raw) {
      Some(bytes) => bytes,
      None => {
        warn!(value = %raw, "invalid {} setting, using default", MIN_FREE_SPACE_GB);
        parse_gb(DEFAULT_MIN_FREE_SPACE_GB).unwrap_or(10 * BYTES_PER_GB)
      }
    }
  }

  async fn probe_usage(&self, dir: PathBuf) -> std::io::Result<DiskUsage> {
    let probe = Arc::clone(&self.probe);
    tokio::task::spawn_blocking(move || probe.usage(&dir))
      .await
      .map_err(std::io::Error::other)?
  }
}

/// Parse a (possibly fractional) GiB count into bytes.
fn parse_gb(value: &str) -> Option<u64> {
  let gb: f64 = value.trim().parse().ok()?;
  if !gb.is_finite() || gb < 0.0 {
    return None;
  }
  Some((gb * BYTES_PER_GB as f64).round() as u64)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_gb() {
    assert_eq!(parse_gb("10"), Some(10 * BYTES_PER_GB));
    assert_eq!(parse_gb(" 0.5 "), Some(BYTES_PER_GB / 2));
    assert_eq!(parse_gb("0"), Some(0));
    assert_eq!(parse_gb("-1"), None);
    assert_eq!(parse_gb("ten"), None);
    assert_eq!(parse_gb("NaN"), None);
  }

  #[test]
  fn test_shortfall() {
    let report = SpaceReport {
      free_bytes: 5,
      total_bytes: Some(100),
      min_free_bytes: 10,
      required_bytes: 3,
      sufficient: false,
      probe_failed: false,
    };
    assert_eq!(report.shortfall(), 8);

    let roomy = SpaceReport {
      free_bytes: 50,
      sufficient: true,
      ..report
    };
    assert_eq!(roomy.shortfall(), 0);
  }
}
