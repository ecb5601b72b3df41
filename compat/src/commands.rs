//! Command implementations behind the `compat` CLI.
//!
//! Each command takes its collaborators (catalog, executor) as parameters so
//! tests can drive full runs with fakes.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::{info, instrument, warn};

use crate::core::combination::IgnoreRule;
use crate::core::matrix::MatrixMode;
use crate::core::policy::BrokenPairPolicy;
use crate::core::store::{CombinationStore, StoreCounts};
use crate::io::config::CompatConfig;
use crate::io::executor::PairExecutor;
use crate::io::registry::{Extraction, VersionCatalog, fetch_versions};
use crate::io::storage::{
    EphemeralBackend, FileBackend, StoreBackend, StoreOrigin, StorePaths, load_store,
    migrate_store, write_store,
};
use crate::orchestrate::{CancelToken, Orchestrator, RunReport};
use crate::plan::{Plan, PlanRequest, plan};

/// Which matrix a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Every finalized release against every other, capped per run.
    Release,
    /// The snapshot build against the latest release of each stream, uncapped.
    Snapshot,
}

impl RunMode {
    /// Explicit choice wins; otherwise `ECOSYSTEM_CI=true` selects snapshot mode.
    pub fn resolve(explicit: Option<RunMode>, ecosystem_ci: Option<&str>) -> RunMode {
        match explicit {
            Some(mode) => mode,
            None if ecosystem_ci == Some("true") => RunMode::Snapshot,
            None => RunMode::Release,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Release => "release",
            RunMode::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Overrides the computed per-run cap.
    pub max_pairs: Option<usize>,
    pub retry_failed: bool,
    /// Keep snapshot results in the store.
    pub persist: bool,
    pub work_dir: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            max_pairs: None,
            retry_failed: false,
            persist: false,
            work_dir: None,
        }
    }

    /// Snapshot results are throwaway unless explicitly persisted.
    pub fn uses_store(&self) -> bool {
        self.mode == RunMode::Release || self.persist
    }
}

pub fn store_paths(config: &CompatConfig, root: &Path) -> StorePaths {
    StorePaths::new(&root.join(&config.storage.dir), &config.storage.name)
}

/// Run size limit. Release runs attempt `max_new_pairs` new pairs plus, when
/// retrying, every previously failed pair. Snapshot runs are uncapped.
pub fn run_cap(config: &CompatConfig, options: &RunOptions, store: &CombinationStore) -> Option<usize> {
    if let Some(explicit) = options.max_pairs {
        return Some(explicit);
    }
    match options.mode {
        RunMode::Snapshot => None,
        RunMode::Release if options.retry_failed => {
            Some(config.max_new_pairs + store.counts().failed)
        }
        RunMode::Release => Some(config.max_new_pairs),
    }
}

/// Fetch versions and plan a run against `store`.
#[instrument(skip_all, fields(mode = %options.mode))]
pub fn plan_run<C: VersionCatalog>(
    catalog: &C,
    config: &CompatConfig,
    options: &RunOptions,
    store: &CombinationStore,
) -> Result<Plan> {
    let policy = BrokenPairPolicy::new(&config.policy).context("build broken-pair policy")?;
    let (versions, mode) = match options.mode {
        RunMode::Release => (
            fetch_versions(catalog, Extraction::AllFinal)?,
            MatrixMode::Full,
        ),
        RunMode::Snapshot => (
            fetch_versions(catalog, Extraction::LatestPerStream)?,
            MatrixMode::SnapshotDelta {
                snapshot: config.toolchain.snapshot_version.clone(),
            },
        ),
    };
    info!(versions = versions.len(), "versions resolved");
    let request = PlanRequest {
        cli_versions: &versions,
        platform_versions: &versions,
        mode: &mode,
        retry_failed: options.retry_failed,
        cap: run_cap(config, options, store),
    };
    Ok(plan(&request, &policy, store))
}

/// Store a run plans against. Ephemeral runs keep only the persisted ignore rules.
fn load_for(config: &CompatConfig, root: &Path, options: &RunOptions) -> Result<CombinationStore> {
    let loaded = load_store(&store_paths(config, root))?;
    if !options.uses_store() {
        info!("snapshot run, results stay in an ephemeral store");
        return Ok(loaded.store.ignore_rules_only());
    }
    if loaded.needs_rewrite() {
        info!(origin = ?loaded.origin, "store will be rewritten in the current layout");
    }
    Ok(loaded.store)
}

/// `compat plan`: the pairs a run would attempt, without executing anything.
pub fn plan_command<C: VersionCatalog>(
    catalog: &C,
    config: &CompatConfig,
    root: &Path,
    options: &RunOptions,
) -> Result<Plan> {
    let store = load_for(config, root, options)?;
    plan_run(catalog, config, options, &store)
}

/// `compat run`: plan, then execute every pending pair.
#[instrument(skip_all, fields(mode = %options.mode))]
pub fn run_command<C: VersionCatalog, E: PairExecutor>(
    catalog: &C,
    executor: &E,
    config: &CompatConfig,
    root: &Path,
    options: &RunOptions,
    cancel: CancelToken,
) -> Result<RunReport> {
    let store = load_for(config, root, options)?;
    let plan = plan_run(catalog, config, options, &store)?;

    let work_root = options
        .work_dir
        .clone()
        .or_else(|| config.work_root.clone())
        .unwrap_or_else(|| std::env::temp_dir().join("compat-work"));
    let file_backend;
    let backend: &dyn StoreBackend = if options.uses_store() {
        file_backend = FileBackend::new(store_paths(config, root).current);
        &file_backend
    } else {
        &EphemeralBackend
    };

    let mut orchestrator =
        Orchestrator::new(executor, backend, store, root.join(work_root)).with_cancel_token(cancel);
    orchestrator.run_plan(&plan)
}

/// `compat status`.
pub fn status_command(config: &CompatConfig, root: &Path) -> Result<CombinationStore> {
    Ok(load_store(&store_paths(config, root))?.store)
}

/// `compat ignore`: add an ignore rule. Returns `false` if it was already present.
pub fn ignore_command(config: &CompatConfig, root: &Path, rule: IgnoreRule) -> Result<bool> {
    let paths = store_paths(config, root);
    let mut store = load_store(&paths)?.store;
    if rule.cli().is_none() && rule.platform().is_none() {
        warn!("rule matches every pair; nothing will be tested until it is removed");
    }
    let added = store.ignore(rule);
    if added {
        write_store(&paths.current, &store)?;
    }
    Ok(added)
}

/// `compat clear-failed`: forget failed pairs matching `rule`. Returns how many were removed.
pub fn clear_failed_command(config: &CompatConfig, root: &Path, rule: &IgnoreRule) -> Result<usize> {
    let paths = store_paths(config, root);
    let mut store = load_store(&paths)?.store;
    let removed = store.clear_failed(rule);
    if removed > 0 {
        write_store(&paths.current, &store)?;
    }
    Ok(removed)
}

/// `compat migrate`.
pub fn migrate_command(config: &CompatConfig, root: &Path) -> Result<(StoreOrigin, StoreCounts)> {
    let paths = store_paths(config, root);
    let origin = migrate_store(&paths)?;
    let counts = load_store(&paths)?.store.counts();
    Ok((origin, counts))
}
