//! Run planning: decide which pairs a run will execute, without any I/O.

use serde::Serialize;

use crate::core::combination::Combination;
use crate::core::matrix::{Disposition, MatrixGenerator, MatrixMode, dedup_versions};
use crate::core::policy::BrokenPairPolicy;
use crate::core::store::CombinationStore;

/// Inputs that shape a plan.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub cli_versions: &'a [String],
    pub platform_versions: &'a [String],
    pub mode: &'a MatrixMode,
    /// Offer previously failed pairs again, ahead of new pairs.
    pub retry_failed: bool,
    /// Maximum pairs attempted. `None` is uncapped.
    pub cap: Option<usize>,
}

/// Candidates not scheduled, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub broken: usize,
    pub verified: usize,
    pub failed: usize,
    pub ignored: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.broken + self.verified + self.failed + self.ignored
    }

    fn count(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Broken => self.broken += 1,
            Disposition::Verified => self.verified += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::Ignored => self.ignored += 1,
            Disposition::Pending | Disposition::Retry => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Pairs to execute, in order: retried failures first, then new pairs.
    pub pending: Vec<Combination>,
    /// How many of `pending` are retried failures.
    pub retried: usize,
    pub skipped: SkipCounts,
    /// Runnable pairs left for a later run because of the cap.
    pub deferred: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Classify every candidate and select the pairs to run under the cap.
pub fn plan(
    request: &PlanRequest<'_>,
    policy: &BrokenPairPolicy,
    store: &CombinationStore,
) -> Plan {
    let cli_versions = dedup_versions(request.cli_versions);
    let platform_versions = dedup_versions(request.platform_versions);
    let generator = MatrixGenerator::new(
        &cli_versions,
        &platform_versions,
        request.mode,
        policy,
        store,
    )
    .retry_failed(request.retry_failed);

    // Retries are bounded by the failed set. Fresh pairs past the cap are counted, not kept.
    let cap = request.cap.unwrap_or(usize::MAX);
    let mut retries = Vec::new();
    let mut fresh = Vec::new();
    let mut runnable = 0usize;
    let mut skipped = SkipCounts::default();
    for candidate in generator.candidates() {
        match candidate.disposition {
            Disposition::Retry => {
                runnable += 1;
                retries.push(candidate.combination);
            }
            Disposition::Pending => {
                runnable += 1;
                if fresh.len() < cap {
                    fresh.push(candidate.combination);
                }
            }
            other => skipped.count(other),
        }
    }

    retries.truncate(cap);
    let retried = retries.len();
    fresh.truncate(cap - retried);

    let mut pending = retries;
    pending.append(&mut fresh);
    Plan {
        deferred: runnable - pending.len(),
        pending,
        retried,
        skipped,
    }
}
