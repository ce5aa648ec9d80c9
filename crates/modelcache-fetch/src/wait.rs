use std::path::{Path, PathBuf};

use modelcache_config::WaitConfig;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;

/// Wait for an artifact that another writer may still be producing.
///
/// Checks `path` up to `config.max_attempts` times, `config.delay()` apart.
/// Downloads publish by rename, so once the path exists it is complete. The
/// delay is cancellable.
pub async fn wait_for_artifact(
  path: &Path,
  config: &WaitConfig,
  cancel: &CancellationToken,
) -> Result<PathBuf, FetchError> {
  let attempts = config.max_attempts.max(1);

  for attempt in 1..=attempts {
    if fs::try_exists(path).await.unwrap_or(false) {
      return Ok(path.to_path_buf());
    }
    if attempt == attempts {
      break;
    }

    debug!(
      path = %path.display(),
      attempt,
      max_attempts = attempts,
      "artifact not present yet, waiting"
    );

    tokio::select! {
      _ = cancel.cancelled() => return Err(FetchError::Cancelled),
      _ = tokio::time::sleep(config.delay()) => {}
    }
  }

  Err(FetchError::NotAvailable {
    path: path.to_path_buf(),
    attempts,
  })
}
