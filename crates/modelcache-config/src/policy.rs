use serde::{Deserialize, Serialize};

/// What the space monitor reports when the OS disk usage query fails.
///
/// `FailOpen` keeps downloads flowing when the probe is broken, at the cost
/// of disabling the free space floor until the probe recovers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailurePolicy {
  /// Report `sufficient = true`.
  #[default]
  FailOpen,
  /// Report `sufficient = false`.
  FailClosed,
}

impl ProbeFailurePolicy {
  /// The `sufficient` value to report for a failed probe.
  pub fn sufficient_on_failure(self) -> bool {
    matches!(self, Self::FailOpen)
  }
}
