//! `compat` CLI: resumable cli × platform compatibility runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use compat::commands::{
    RunMode, RunOptions, clear_failed_command, ignore_command, migrate_command, plan_command,
    run_command, status_command,
};
use compat::core::combination::IgnoreRule;
use compat::error::exit_code_for;
use compat::exit_codes;
use compat::io::config::{CompatConfig, DEFAULT_CONFIG_PATH, load_config};
use compat::io::executor::JbangExecutor;
use compat::io::registry::HttpCatalog;
use compat::io::summary::{append_summary, render_summary};
use compat::logging;
use compat::orchestrate::CancelToken;

#[derive(Parser)]
#[command(
    name = "compat",
    version,
    about = "Verify that cli and platform releases scaffold and build together"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute every untested pair (up to the run cap) and record the outcomes.
    ///
    /// The store is checkpointed after each pair. Ctrl-C kills the process; the
    /// pair in flight is left unrecorded and runs again next time.
    Run {
        #[command(flatten)]
        run: RunArgs,

        /// Append the run summary to this file.
        #[arg(long, env = "GITHUB_STEP_SUMMARY")]
        summary_file: Option<PathBuf>,
    },
    /// Print the pairs a run would execute, without executing them.
    Plan {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print store counts and the failed pairs.
    Status,
    /// Never test pairs matching this rule. An omitted field matches any version.
    Ignore {
        #[arg(long)]
        cli: Option<String>,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Forget failed pairs matching the filter so the next run retries them.
    ClearFailed {
        #[arg(long)]
        cli: Option<String>,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Rewrite the store in the current schema.
    Migrate,
}

#[derive(Args)]
struct RunArgs {
    /// Matrix to cover. Defaults to `snapshot` when ECOSYSTEM_CI=true, else `release`.
    #[arg(long, value_enum)]
    mode: Option<RunMode>,

    #[arg(long, env = "ECOSYSTEM_CI", hide = true)]
    ecosystem_ci: Option<String>,

    /// Maximum pairs attempted in this run.
    #[arg(long)]
    max_pairs: Option<usize>,

    /// Attempt previously failed pairs again, before new ones.
    #[arg(long)]
    retry_failed: bool,

    /// Keep snapshot results in the store.
    #[arg(long)]
    persist: bool,

    /// Root for per-pair work directories.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Local Maven repository forwarded to scaffold and build.
    #[arg(long, env = "MAVEN_REPO_LOCAL")]
    maven_repo_local: Option<String>,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            mode: RunMode::resolve(self.mode, self.ecosystem_ci.as_deref()),
            max_pairs: self.max_pairs,
            retry_failed: self.retry_failed,
            persist: self.persist,
            work_dir: self.work_dir.clone(),
        }
    }

    fn apply(&self, config: &mut CompatConfig) {
        if let Some(path) = self.maven_repo_local.as_ref().filter(|p| !p.trim().is_empty()) {
            config.toolchain.local_repository = Some(path.clone());
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    let root = Path::new(".");
    match cli.command {
        Command::Run { run, summary_file } => {
            run.apply(&mut config);
            cmd_run(&config, root, &run.options(), summary_file.as_deref())
        }
        Command::Plan { run } => {
            run.apply(&mut config);
            cmd_plan(&config, root, &run.options())
        }
        Command::Status => cmd_status(&config, root),
        Command::Ignore { cli, platform } => {
            let rule = IgnoreRule::new(cli.as_deref(), platform.as_deref());
            if ignore_command(&config, root, rule.clone())? {
                println!("ignored {rule}");
            } else {
                println!("already ignored {rule}");
            }
            Ok(exit_codes::OK)
        }
        Command::ClearFailed { cli, platform } => {
            let rule = IgnoreRule::new(cli.as_deref(), platform.as_deref());
            let removed = clear_failed_command(&config, root, &rule)?;
            println!("cleared {removed} failed pair(s) matching {rule}");
            Ok(exit_codes::OK)
        }
        Command::Migrate => {
            let (origin, counts) = migrate_command(&config, root)?;
            println!(
                "store rewritten from {origin:?}: {} verified, {} failed, {} ignored",
                counts.verified, counts.failed, counts.ignored
            );
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(
    config: &CompatConfig,
    root: &Path,
    options: &RunOptions,
    summary_file: Option<&Path>,
) -> Result<i32> {
    let catalog = HttpCatalog::new(&config.registry_url)?;
    let executor = JbangExecutor::from_config(&config.toolchain)?;
    let report = run_command(&catalog, &executor, config, root, options, CancelToken::new())?;

    let summary = render_summary(options.mode.as_str(), &report, Utc::now())?;
    print!("{summary}");
    if let Some(path) = summary_file {
        append_summary(path, &summary)
            .with_context(|| format!("write step summary {}", path.display()))?;
    }

    Ok(if report.has_failures() {
        exit_codes::PAIRS_FAILED
    } else {
        exit_codes::OK
    })
}

fn cmd_plan(config: &CompatConfig, root: &Path, options: &RunOptions) -> Result<i32> {
    let catalog = HttpCatalog::new(&config.registry_url)?;
    let plan = plan_command(&catalog, config, root, options)?;
    for combination in &plan.pending {
        println!("{combination}");
    }
    println!(
        "{} pending ({} retried), {} deferred, skipped: {} broken, {} verified, {} failed, {} ignored",
        plan.pending.len(),
        plan.retried,
        plan.deferred,
        plan.skipped.broken,
        plan.skipped.verified,
        plan.skipped.failed,
        plan.skipped.ignored
    );
    Ok(exit_codes::OK)
}

fn cmd_status(config: &CompatConfig, root: &Path) -> Result<i32> {
    let store = status_command(config, root)?;
    let counts = store.counts();
    println!(
        "verified: {}\nfailed: {}\nignored: {}",
        counts.verified, counts.failed, counts.ignored
    );
    for combination in store.failed() {
        println!("failed {combination}");
    }
    for rule in store.ignored() {
        println!("ignored {rule}");
    }
    Ok(exit_codes::OK)
}
