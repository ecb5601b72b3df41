//! Test-only fakes for the executor, store backend and version catalog.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Result, anyhow};

use crate::core::combination::Combination;
use crate::core::store::CombinationStore;
use crate::core::types::{FailureReason, Outcome};
use crate::error::CompatError;
use crate::io::executor::PairExecutor;
use crate::io::registry::{Platform, PlatformsDocument, Release, Stream, VersionCatalog};
use crate::io::storage::StoreBackend;
use crate::orchestrate::CancelToken;

pub fn pair(cli: &str, platform: &str) -> Combination {
    Combination::new(cli, platform)
}

/// Executor returning scripted outcomes. Unscripted pairs succeed.
#[derive(Default)]
pub struct ScriptedExecutor {
    outcomes: BTreeMap<Combination, Outcome>,
    errors: BTreeSet<Combination>,
    trust_error: bool,
    cancel: Option<(usize, CancelToken)>,
    trust_calls: Cell<usize>,
    executed: RefCell<Vec<Combination>>,
}

impl ScriptedExecutor {
    /// Fail `combination` with a build failure.
    pub fn fail(mut self, combination: Combination, exit_code: Option<i32>) -> Self {
        self.outcomes.insert(
            combination,
            Outcome::Failure(FailureReason::BuildFailed { exit_code }),
        );
        self
    }

    pub fn fail_scaffold(mut self, combination: Combination) -> Self {
        self.outcomes.insert(
            combination,
            Outcome::Failure(FailureReason::ScaffoldFailed {
                detail: "demoapp is missing or empty".to_string(),
            }),
        );
        self
    }

    /// Return a fatal error for `combination`.
    pub fn error(mut self, combination: Combination) -> Self {
        self.errors.insert(combination);
        self
    }

    pub fn reject_trust(mut self) -> Self {
        self.trust_error = true;
        self
    }

    /// Cancel `token` once `count` pairs have executed.
    pub fn cancel_after(mut self, count: usize, token: CancelToken) -> Self {
        self.cancel = Some((count, token));
        self
    }

    pub fn trust_calls(&self) -> usize {
        self.trust_calls.get()
    }

    pub fn executed(&self) -> Vec<Combination> {
        self.executed.borrow().clone()
    }
}

impl PairExecutor for ScriptedExecutor {
    fn establish_trust(&self, _work_root: &Path) -> Result<()> {
        self.trust_calls.set(self.trust_calls.get() + 1);
        if self.trust_error {
            return Err(anyhow!("trust rejected").context(CompatError::Configuration(
                "could not trust source".to_string(),
            )));
        }
        Ok(())
    }

    fn execute(&self, combination: &Combination, work_dir: &Path) -> Result<Outcome> {
        if !work_dir.is_dir() {
            return Err(anyhow!("work dir {} missing", work_dir.display()));
        }
        self.executed.borrow_mut().push(combination.clone());
        if let Some((count, token)) = &self.cancel
            && self.executed.borrow().len() >= *count
        {
            token.cancel();
        }
        if self.errors.contains(combination) {
            return Err(anyhow!("toolchain unavailable"));
        }
        Ok(self
            .outcomes
            .get(combination)
            .cloned()
            .unwrap_or(Outcome::Success))
    }
}

/// Backend that counts flushes and keeps the last flushed store.
#[derive(Default)]
pub struct RecordingBackend {
    fail: bool,
    flushes: Cell<usize>,
    last: RefCell<Option<CombinationStore>>,
}

impl RecordingBackend {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn flushes(&self) -> usize {
        self.flushes.get()
    }

    pub fn last_flushed(&self) -> Option<CombinationStore> {
        self.last.borrow().clone()
    }
}

impl StoreBackend for RecordingBackend {
    fn flush(&self, store: &CombinationStore) -> Result<()> {
        if self.fail {
            return Err(anyhow!("disk full"));
        }
        self.flushes.set(self.flushes.get() + 1);
        *self.last.borrow_mut() = Some(store.clone());
        Ok(())
    }
}

/// Catalog serving a fixed document. Each inner slice is one stream, newest first.
pub struct StaticCatalog {
    document: PlatformsDocument,
}

impl StaticCatalog {
    pub fn new(streams: &[&[&str]]) -> Self {
        let streams = streams
            .iter()
            .map(|releases| Stream {
                releases: releases
                    .iter()
                    .map(|version| Release {
                        version: version.to_string(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            document: PlatformsDocument {
                platforms: vec![Platform { streams }],
            },
        }
    }
}

impl VersionCatalog for StaticCatalog {
    fn fetch(&self) -> Result<PlatformsDocument> {
        Ok(self.document.clone())
    }
}
