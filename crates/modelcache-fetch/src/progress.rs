use std::sync::Arc;

/// Download progress passed to a [`ProgressFn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
  pub downloaded: u64,
  /// Declared body size, when the server sent one.
  pub total: Option<u64>,
}

impl Progress {
  /// Completed fraction in `0.0..=1.0`, when the total is known.
  pub fn fraction(&self) -> Option<f64> {
    match self.total {
      Some(0) => Some(1.0),
      Some(total) => Some((self.downloaded as f64 / total as f64).min(1.0)),
      None => None,
    }
  }
}

/// Progress callback.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Rate-limits progress callbacks to steps of at least `step` of the total
/// (or `fallback_step` bytes when the total is unknown).
pub(crate) struct ProgressReporter {
  callback: Option<ProgressFn>,
  total: Option<u64>,
  step_bytes: u64,
  last_reported: u64,
}

impl ProgressReporter {
  pub(crate) fn new(
    callback: Option<ProgressFn>,
    total: Option<u64>,
    step: f64,
    fallback_step: u64,
  ) -> Self {
    let step_bytes = match total {
      Some(total) if total > 0 => ((total as f64 * step).ceil() as u64).max(1),
      _ => fallback_step.max(1),
    };
    Self {
      callback,
      total,
      step_bytes,
      last_reported: 0,
    }
  }

  pub(crate) fn advance(&mut self, downloaded: u64) {
    if downloaded.saturating_sub(self.last_reported) >= self.step_bytes {
      self.report(downloaded);
    }
  }

  /// Report the final count unless it was the last one reported.
  pub(crate) fn finish(&mut self, downloaded: u64) {
    if downloaded != self.last_reported || downloaded == 0 {
      self.report(downloaded);
    }
  }

  fn report(&mut self, downloaded: u64) {
    self.last_reported = downloaded;
    if let Some(callback) = &self.callback {
      callback(Progress {
        downloaded,
        total: self.total,
      });
    }
  }
}
