use std::path::PathBuf;

use modelcache_policy::{EvictionPlan, SpaceReport};
use reqwest::StatusCode;

/// Errors that can occur while fetching an artifact.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  /// Free space is below the floor. Carries an advisory eviction plan when
  /// one could be built; nothing has been evicted.
  #[error(
    "insufficient disk space for {}: {} bytes short",
    .dest.display(),
    .report.shortfall()
  )]
  InsufficientSpace {
    dest: PathBuf,
    report: SpaceReport,
    plan: Option<EvictionPlan>,
  },

  /// Transport failure, including a connection dropped mid-body.
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// The server answered with a non-success status.
  #[error("{url} returned HTTP {status}")]
  HttpStatus { url: String, status: StatusCode },

  /// The body length does not match the declared `Content-Length`.
  #[error("downloaded {actual} bytes, server declared {expected}")]
  Integrity { expected: u64, actual: u64 },

  /// Another writer is publishing the same destination.
  #[error("{} is already being downloaded", .path.display())]
  InProgress { path: PathBuf },

  #[error("download cancelled")]
  Cancelled,

  #[error("io error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A request header could not be encoded.
  #[error("invalid request: {message}")]
  InvalidRequest { message: String },

  /// The artifact did not appear within the bounded wait.
  #[error("{} not available after {attempts} attempts", .path.display())]
  NotAvailable { path: PathBuf, attempts: u32 },
}

impl FetchError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { path, source }
  }

  /// Whether repeating the same fetch may succeed without intervention.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Network(_) | Self::Integrity { .. } | Self::InProgress { .. } => true,
      Self::HttpStatus { status, .. } => status.is_server_error(),
      _ => false,
    }
  }
}
