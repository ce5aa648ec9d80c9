use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use modelcache_config::CacheConfig;
use modelcache_policy::{EvictionPlanner, SpaceMonitor};
use modelcache_registry::{ArtifactRegistration, Registry};
use reqwest::Client;
use reqwest::header::CONTENT_DISPOSITION;
use fs4::tokio::AsyncFileExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::filename::{filename_from_response, lock_path, temp_path};
use crate::progress::{ProgressFn, ProgressReporter};
use crate::request::FetchRequest;
use crate::usage::{UsageTracker, infer_category, registry_key};

/// A boxed stream of body bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Tunables for the coordinator, normally taken from [`CacheConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchSettings {
  pub chunk_size: usize,
  pub progress_step: f64,
  pub max_eviction_candidates: u32,
}

impl From<&CacheConfig> for FetchSettings {
  fn from(config: &CacheConfig) -> Self {
    Self {
      chunk_size: config.chunk_size,
      progress_step: config.progress_step,
      max_eviction_candidates: config.max_eviction_candidates,
    }
  }
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The destination already existed; no network I/O happened.
  CacheHit { path: PathBuf },
  /// The artifact was downloaded and published.
  Downloaded { path: PathBuf, size_bytes: u64 },
}

impl FetchOutcome {
  pub fn path(&self) -> &Path {
    match self {
      Self::CacheHit { path } | Self::Downloaded { path, .. } => path,
    }
  }
}

/// Streams remote artifacts to disk and publishes them atomically.
pub struct DownloadCoordinator {
  client: Client,
  registry: Arc<dyn Registry>,
  space: Arc<SpaceMonitor>,
  planner: Arc<EvictionPlanner>,
  usage: UsageTracker,
  settings: FetchSettings,
}

impl DownloadCoordinator {
  /// Create a coordinator with an HTTP client built from the config.
  pub fn new(
    config: &CacheConfig,
    registry: Arc<dyn Registry>,
    space: Arc<SpaceMonitor>,
    planner: Arc<EvictionPlanner>,
  ) -> Result<Self, FetchError> {
    let client = Client::builder().user_agent(&config.user_agent).build()?;
    Ok(Self::with_client(
      client,
      FetchSettings::from(config),
      registry,
      space,
      planner,
    ))
  }

  pub fn with_client(
    client: Client,
    settings: FetchSettings,
    registry: Arc<dyn Registry>,
    space: Arc<SpaceMonitor>,
    planner: Arc<EvictionPlanner>,
  ) -> Self {
    let usage = UsageTracker::new(Arc::clone(&registry));
    Self {
      client,
      registry,
      space,
      planner,
      usage,
      settings,
    }
  }

  /// Materialize `request.url` at `request.dest`.
  pub async fn fetch(
    &self,
    request: &FetchRequest,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
  ) -> Result<FetchOutcome, FetchError> {
    if self.is_cached(&request.dest).await {
      return Ok(self.cache_hit(&request.dest).await);
    }

    let response = self.send(request, cancel).await?;
    self
      .download(response, &request.dest, request, progress, cancel)
      .await
  }

  /// Like [`fetch`](Self::fetch), but `request.dest` is a directory and the
  /// filename comes from the response (see
  /// [`filename_from_response`](crate::filename_from_response)). The
  /// request is always sent, since the name is unknown until headers arrive.
  pub async fn fetch_into_dir(
    &self,
    request: &FetchRequest,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
  ) -> Result<FetchOutcome, FetchError> {
    let response = self.send(request, cancel).await?;

    let disposition = response
      .headers()
      .get(CONTENT_DISPOSITION)
      .and_then(|value| value.to_str().ok());
    let dest = request
      .dest
      .join(filename_from_response(disposition, &request.url));

    if self.is_cached(&dest).await {
      return Ok(self.cache_hit(&dest).await);
    }

    self
      .download(response, &dest, request, progress, cancel)
      .await
  }

  /// Stream `body` to `dest` through a temp file and publish it with a single
  /// rename, then register the artifact.
  ///
  /// On any failure, including cancellation, the temp file is removed and
  /// `dest` is left as it was. When `content_length` is given, a body of any
  /// other length is an integrity failure.
  ///
  /// Publishing holds an exclusive lock on `<dest>.lock`. A second writer
  /// for the same destination fails with [`FetchError::InProgress`] without
  /// touching the temp file.
  pub async fn publish(
    &self,
    dest: &Path,
    body: ByteStream,
    content_length: Option<u64>,
    category: &str,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
  ) -> Result<u64, FetchError> {
    if let Some(parent) = dest.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent)
        .await
        .map_err(FetchError::io(parent))?;
    }

    let lock = lock_destination(dest).await?;
    let tmp = temp_path(dest);
    let written = match self
      .stream_to_file(&tmp, body, content_length, progress, cancel)
      .await
    {
      Ok(written) => written,
      Err(e) => {
        remove_temp(&tmp).await;
        return Err(e);
      }
    };

    if let Err(source) = fs::rename(&tmp, dest).await {
      remove_temp(&tmp).await;
      return Err(FetchError::Io {
        path: dest.to_path_buf(),
        source,
      });
    }
    drop(lock);

    let size_bytes = match fs::metadata(dest).await {
      Ok(metadata) => metadata.len(),
      Err(_) => written,
    };
    info!(path = %dest.display(), size_bytes, "published artifact");

    self.record_download(dest, category, size_bytes).await;
    Ok(size_bytes)
  }

  async fn is_cached(&self, dest: &Path) -> bool {
    fs::try_exists(dest).await.unwrap_or(false)
  }

  async fn cache_hit(&self, dest: &Path) -> FetchOutcome {
    debug!(path = %dest.display(), "artifact already present");
    // The file is usable regardless of bookkeeping.
    if let Err(e) = self.usage.touch(dest).await {
      warn!(path = %dest.display(), error = %e, "failed to record artifact use");
    }
    FetchOutcome::CacheHit {
      path: dest.to_path_buf(),
    }
  }

  async fn send(
    &self,
    request: &FetchRequest,
    cancel: &CancellationToken,
  ) -> Result<reqwest::Response, FetchError> {
    let headers = request.header_map()?;
    debug!(url = %request.url, "requesting artifact");

    let response = tokio::select! {
      _ = cancel.cancelled() => return Err(FetchError::Cancelled),
      response = self.client.get(&request.url).headers(headers).send() => response?,
    };

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::HttpStatus {
        url: request.url.clone(),
        status,
      });
    }
    Ok(response)
  }

  async fn download(
    &self,
    response: reqwest::Response,
    dest: &Path,
    request: &FetchRequest,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
  ) -> Result<FetchOutcome, FetchError> {
    let content_length = response.content_length();
    self
      .ensure_space(dest, content_length.unwrap_or(0))
      .await?;

    let category = request
      .category
      .clone()
      .unwrap_or_else(|| infer_category(Path::new(&registry_key(dest))));
    let body: ByteStream = Box::pin(
      response
        .bytes_stream()
        .map(|chunk| chunk.map_err(FetchError::from)),
    );

    let size_bytes = self
      .publish(dest, body, content_length, &category, progress, cancel)
      .await?;

    Ok(FetchOutcome::Downloaded {
      path: dest.to_path_buf(),
      size_bytes,
    })
  }

  async fn ensure_space(&self, dest: &Path, required_bytes: u64) -> Result<(), FetchError> {
    let report = self
      .space
      .check_free_space(target_dir(dest), required_bytes)
      .await;
    if report.sufficient {
      // A failed probe only gets here under ProbeFailurePolicy::FailOpen.
      if report.probe_failed {
        warn!(
          path = %dest.display(),
          "disk probe failed, downloading without a free space check"
        );
      }
      return Ok(());
    }

    let plan = match self
      .planner
      .plan(report.shortfall(), self.settings.max_eviction_candidates)
      .await
    {
      Ok(plan) => Some(plan),
      Err(e) => {
        warn!(error = %e, "failed to build eviction plan");
        None
      }
    };

    Err(FetchError::InsufficientSpace {
      dest: dest.to_path_buf(),
      report,
      plan,
    })
  }

  async fn stream_to_file(
    &self,
    tmp: &Path,
    mut body: ByteStream,
    content_length: Option<u64>,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
  ) -> Result<u64, FetchError> {
    let file = File::create(tmp).await.map_err(FetchError::io(tmp))?;
    let mut writer = BufWriter::with_capacity(self.settings.chunk_size, file);
    let mut reporter = ProgressReporter::new(
      progress,
      content_length,
      self.settings.progress_step,
      self.settings.chunk_size as u64,
    );
    let mut downloaded: u64 = 0;

    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        next = body.next() => next,
      };
      let Some(chunk) = next else {
        break;
      };
      let chunk = chunk?;

      writer
        .write_all(&chunk)
        .await
        .map_err(FetchError::io(tmp))?;
      downloaded += chunk.len() as u64;
      reporter.advance(downloaded);
    }

    writer.flush().await.map_err(FetchError::io(tmp))?;
    writer
      .into_inner()
      .sync_all()
      .await
      .map_err(FetchError::io(tmp))?;

    if let Some(expected) = content_length
      && expected != downloaded
    {
      return Err(FetchError::Integrity {
        expected,
        actual: downloaded,
      });
    }

    reporter.finish(downloaded);
    Ok(downloaded)
  }

  /// Bookkeeping after a publish. Failures are logged, not returned: the
  /// artifact is on disk and usable either way.
  async fn record_download(&self, dest: &Path, category: &str, size_bytes: u64) {
    let registration = ArtifactRegistration::new(
      registry_key(dest),
      category,
      i64::try_from(size_bytes).unwrap_or(i64::MAX),
    );
    if let Err(e) = self.registry.upsert(&registration).await {
      warn!(path = %dest.display(), error = %e, "failed to register downloaded artifact");
    }
    if let Err(e) = self.usage.touch(dest).await {
      warn!(path = %dest.display(), error = %e, "failed to record artifact use");
    }
  }
}

/// Directory whose filesystem receives `dest`. A bare file name lives in
/// the current directory.
fn target_dir(dest: &Path) -> &Path {
  dest
    .parent()
    .filter(|parent| !parent.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."))
}

/// Take the publish lock for `dest`. The lock is released when the returned
/// file is dropped. The lock file itself stays in place: unlinking it would
/// let a writer that opened the old file race one that creates a new one.
async fn lock_destination(dest: &Path) -> Result<File, FetchError> {
  let path = lock_path(dest);
  let file = OpenOptions::new()
    .create(true)
    .truncate(false)
    .read(true)
    .write(true)
    .open(&path)
    .await
    .map_err(FetchError::io(&path))?;

  match file.try_lock_exclusive() {
    Ok(true) => Ok(file),
    Ok(false) => {
      debug!(path = %dest.display(), "destination is locked by another writer");
      Err(FetchError::InProgress {
        path: dest.to_path_buf(),
      })
    }
    Err(source) => Err(FetchError::Io { path, source }),
  }
}

async fn remove_temp(tmp: &Path) {
  match fs::remove_file(tmp).await {
    Ok(()) => debug!(path = %tmp.display(), "removed partial download"),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %tmp.display(), error = %e, "failed to remove partial download"),
  }
}
