//! Execute a [`Plan`]: run each pair once, record the outcome, checkpoint the store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::combination::Combination;
use crate::core::store::{CombinationStore, FailureRecord};
use crate::core::types::{FailureReason, Outcome, PairState};
use crate::error::CompatError;
use crate::io::executor::{PairExecutor, pair_work_dir};
use crate::io::storage::StoreBackend;
use crate::plan::{Plan, SkipCounts};

/// Cooperative stop signal, checked before each pair starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPair {
    pub combination: Combination,
    pub reason: FailureReason,
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Pairs verified during this run.
    pub verified: Vec<Combination>,
    /// Pairs that failed during this run.
    pub failed: Vec<FailedPair>,
    pub skipped: SkipCounts,
    /// Runnable pairs not attempted (cap or cancellation).
    pub deferred: usize,
    pub cancelled: bool,
}

impl RunReport {
    pub fn attempted(&self) -> usize {
        self.verified.len() + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Runs planned pairs one at a time against a store it owns for the run.
pub struct Orchestrator<'a, E: PairExecutor + ?Sized, B: StoreBackend + ?Sized> {
    executor: &'a E,
    backend: &'a B,
    store: CombinationStore,
    work_root: PathBuf,
    trust_established: bool,
    cancel: CancelToken,
}

impl<'a, E: PairExecutor + ?Sized, B: StoreBackend + ?Sized> Orchestrator<'a, E, B> {
    pub fn new(
        executor: &'a E,
        backend: &'a B,
        store: CombinationStore,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            backend,
            store,
            work_root: work_root.into(),
            trust_established: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &CombinationStore {
        &self.store
    }

    pub fn into_store(self) -> CombinationStore {
        self.store
    }

    /// Execute every pending pair of `plan`.
    ///
    /// A failing pair never stops the run. Toolchain, filesystem and storage
    /// errors do: the pair in flight is then left unrecorded so the next run
    /// picks it up again.
    #[instrument(skip_all, fields(pending = plan.pending.len()))]
    pub fn run_plan(&mut self, plan: &Plan) -> Result<RunReport> {
        let mut report = RunReport {
            skipped: plan.skipped,
            deferred: plan.deferred,
            ..RunReport::default()
        };
        info!(
            pending = plan.pending.len(),
            retried = plan.retried,
            skipped = plan.skipped.total(),
            deferred = plan.deferred,
            "run planned"
        );
        if plan.is_empty() {
            info!("nothing to run");
            return Ok(report);
        }

        self.ensure_trust()?;

        let mut attempted = Vec::new();
        for (index, combination) in plan.pending.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let remaining = plan.pending.len() - index;
                warn!(remaining, "run cancelled");
                report.cancelled = true;
                report.deferred += remaining;
                break;
            }
            attempted.push(combination.clone());
            let outcome = self.run_pair(combination)?;
            match outcome {
                Outcome::Success => report.verified.push(combination.clone()),
                Outcome::Failure(reason) => report.failed.push(FailedPair {
                    combination: combination.clone(),
                    reason,
                }),
            }
        }

        self.aggregate_failures(&attempted)?;
        info!(
            verified = report.verified.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }

    fn ensure_trust(&mut self) -> Result<()> {
        if !self.trust_established {
            self.executor
                .establish_trust(&self.work_root)
                .context("establish artifact source trust")?;
            self.trust_established = true;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(cli = combination.cli(), platform = combination.platform()))]
    fn run_pair(&mut self, combination: &Combination) -> Result<Outcome> {
        let work_dir = prepare_work_dir(&self.work_root, combination)?;
        log_transition(combination, PairState::Pending, PairState::Running);

        let outcome = self
            .executor
            .execute(combination, &work_dir)
            .with_context(|| format!("execute {combination}"))?;

        log_transition(combination, PairState::Running, outcome.state());
        match &outcome {
            Outcome::Success => {
                self.store.record_success(combination);
            }
            Outcome::Failure(reason) => {
                warn!(%reason, "pair failed");
                if self.store.record_failure(combination) == FailureRecord::AlreadyVerified {
                    warn!("pair is already verified, failure not recorded");
                }
            }
        }
        self.flush()?;
        Ok(outcome)
    }

    /// End-of-run check that every attempted pair that did not verify is in `failed`.
    ///
    /// `run_pair` records each outcome before the next pair starts, so this
    /// normally changes nothing and does not flush. It only writes when the
    /// store disagrees with what was attempted.
    fn aggregate_failures(&mut self, attempted: &[Combination]) -> Result<()> {
        let mut changed = false;
        for combination in attempted {
            if !self.store.is_verified(combination)
                && self.store.record_failure(combination) == FailureRecord::Added
            {
                debug!(%combination, "recorded missing failure");
                changed = true;
            }
        }
        if changed {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.backend
            .flush(&self.store)
            .context(CompatError::Storage("checkpoint store".to_string()))
    }
}

fn log_transition(combination: &Combination, from: PairState, to: PairState) {
    debug_assert!(from.can_transition_to(to), "{from} -> {to}");
    info!(%combination, %from, %to, "pair state");
}

/// Fresh, empty work directory for a pair. Leftovers from an interrupted run are removed.
fn prepare_work_dir(work_root: &Path, combination: &Combination) -> Result<PathBuf> {
    let work_dir = pair_work_dir(work_root, combination);
    if work_dir.exists() {
        debug!(dir = %work_dir.display(), "removing stale work dir");
        fs::remove_dir_all(&work_dir)
            .with_context(|| format!("remove stale work dir {}", work_dir.display()))?;
    }
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("create work dir {}", work_dir.display()))?;
    Ok(work_dir)
}
