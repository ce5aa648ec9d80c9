use std::sync::Arc;

use modelcache_registry::{ArtifactRecord, Registry};
use serde::Serialize;
use tracing::debug;

use crate::error::PolicyError;

/// An ordered, advisory list of artifacts to evict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionPlan {
  /// Least recently used first.
  pub candidates: Vec<ArtifactRecord>,
  /// Sum of the candidates' sizes.
  pub reclaimable: u64,
  pub target_bytes: u64,
  /// `reclaimable >= target_bytes`.
  pub met_target: bool,
}

impl EvictionPlan {
  pub fn is_empty(&self) -> bool {
    self.candidates.is_empty()
  }
}

/// Selects least recently used, evictable artifacts covering a reclaim
/// target.
///
/// Planning only reads the registry. Plans go stale as soon as another
/// caller touches or deletes a record; executing one is up to the caller.
pub struct EvictionPlanner {
  registry: Arc<dyn Registry>,
}

impl EvictionPlanner {
  pub fn new(registry: Arc<dyn Registry>) -> Self {
    Self { registry }
  }

  /// Build a plan reclaiming at least `target_bytes` from at most
  /// `max_candidates` records.
  ///
  /// Accumulation stops at the first record that brings the total to the
  /// target. If the pool runs out first, every pooled record is returned
  /// with `met_target = false`. The same registry state always yields the
  /// same plan.
  pub async fn plan(
    &self,
    target_bytes: u64,
    max_candidates: u32,
  ) -> Result<EvictionPlan, PolicyError> {
    if target_bytes == 0 {
      return Ok(EvictionPlan {
        candidates: Vec::new(),
        reclaimable: 0,
        target_bytes,
        met_target: true,
      });
    }

    let pool = self.registry.list_lru(max_candidates).await?;
    let plan = select_candidates(pool, target_bytes);

    debug!(
      target_bytes,
      reclaimable = plan.reclaimable,
      candidates = plan.candidates.len(),
      met_target = plan.met_target,
      "planned eviction"
    );
    Ok(plan)
  }
}

fn select_candidates(pool: Vec<ArtifactRecord>, target_bytes: u64) -> EvictionPlan {
  let mut candidates = Vec::new();
  let mut reclaimable: u64 = 0;

  for record in pool {
    // The registry only hands out evictable records; re-check so a plan can
    // never name a protected artifact.
    if !record.is_evictable() {
      continue;
    }
    reclaimable = reclaimable.saturating_add(record.size_bytes.max(0) as u64);
    candidates.push(record);
    if reclaimable >= target_bytes {
      break;
    }
  }

  EvictionPlan {
    candidates,
    reclaimable,
    target_bytes,
    met_target: reclaimable >= target_bytes,
  }
}
