//! Pair executor: scaffold and build one project for a `(cli, platform)` pair.
//!
//! The [`PairExecutor`] trait decouples orchestration from the toolchain
//! (currently `jbang` + `mvn`). Tests use scripted executors that return
//! predetermined outcomes without spawning processes.
//!
//! Per-pair problems (scaffold produced nothing, build exited nonzero) are
//! returned as [`Outcome::Failure`]. Problems with the toolchain itself (trust
//! or alias confirmation mismatch, a binary that cannot be spawned) are
//! returned as `Err` and abort the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::combination::Combination;
use crate::core::types::{FailureReason, Outcome};
use crate::error::CompatError;
use crate::io::config::ToolchainConfig;
use crate::io::process::{CommandOutput, StreamOptions, run_streaming};

static ALIAS_ADDED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\[jbang\] Alias .* added .*").unwrap());
static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)error").unwrap());

pub const BUILD_LOG: &str = "build.log";
const REPO_LOCAL_PROPERTY: &str = "maven.repo.local";

/// Abstraction over the scaffold + build toolchain.
pub trait PairExecutor {
    /// Trust the artifact source. Called once per orchestrator run, before the first pair.
    fn establish_trust(&self, work_root: &Path) -> Result<()>;

    /// Scaffold and build `combination` inside `work_dir` (already created and empty).
    fn execute(&self, combination: &Combination, work_dir: &Path) -> Result<Outcome>;
}

/// Executor that drives the `jbang` launcher and the build tool as subprocesses.
#[derive(Debug, Clone)]
pub struct JbangExecutor {
    launcher: Vec<String>,
    build_command: Vec<String>,
    artifact_source: String,
    snapshot_version: String,
    platform_group: String,
    snapshot_platform_group: String,
    project_name: String,
    local_repository: Option<String>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl JbangExecutor {
    pub fn from_config(config: &ToolchainConfig) -> Result<Self> {
        let mut launcher = config.launcher.clone();
        let program = launcher
            .first_mut()
            .ok_or_else(|| anyhow!("toolchain.launcher is empty"))?;
        // Work directories change per pair, so a relative launcher path must be pinned now.
        if program.contains(['/', '\\']) && Path::new(program.as_str()).is_relative() {
            let absolute = std::path::absolute(program.as_str())
                .with_context(|| format!("resolve launcher {program}"))?;
            *program = absolute.display().to_string();
        }
        if config.build_command.is_empty() {
            return Err(anyhow!("toolchain.build_command is empty"));
        }
        Ok(Self {
            launcher,
            build_command: config.build_command.clone(),
            artifact_source: config.artifact_source.clone(),
            snapshot_version: config.snapshot_version.clone(),
            platform_group: config.platform_group.clone(),
            snapshot_platform_group: config.snapshot_platform_group.clone(),
            project_name: config.project_name.clone(),
            local_repository: config
                .local_repository
                .clone()
                .filter(|path| !path.trim().is_empty()),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        })
    }

    /// Alias the cli runner is registered under, e.g. `qs-2_7_3_Final`.
    pub fn alias_name(cli: &str) -> String {
        format!("qs-{}", cli.replace('.', "_"))
    }

    /// Repository root the cli runner jar is fetched from. The snapshot cli only
    /// exists in the local repository.
    pub fn cli_source(&self, cli: &str) -> String {
        if cli != self.snapshot_version {
            return self.artifact_source.clone();
        }
        let repository = self.local_repository.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            format!("{home}/.m2/repository")
        });
        format!("{}/io/quarkus/", repository.trim_end_matches('/'))
    }

    pub fn runner_jar(&self, cli: &str) -> String {
        format!(
            "{}quarkus-cli/{cli}/quarkus-cli-{cli}-runner.jar",
            self.cli_source(cli)
        )
    }

    pub fn platform_group(&self, platform: &str) -> &str {
        if platform == self.snapshot_version {
            &self.snapshot_platform_group
        } else {
            &self.platform_group
        }
    }

    fn repo_local_flag(&self) -> Option<String> {
        self.local_repository
            .as_ref()
            .map(|path| format!("-D{REPO_LOCAL_PROPERTY}={path}"))
    }

    pub fn alias_args(&self, cli: &str) -> Vec<String> {
        vec![
            "alias".to_string(),
            "add".to_string(),
            "-f".to_string(),
            ".".to_string(),
            format!("--name={}", Self::alias_name(cli)),
            self.runner_jar(cli),
        ]
    }

    pub fn scaffold_args(&self, combination: &Combination) -> Vec<String> {
        let mut args = vec![
            Self::alias_name(combination.cli()),
            "create".to_string(),
            "app".to_string(),
            format!(
                "-P={}::{}",
                self.platform_group(combination.platform()),
                combination.platform()
            ),
            self.project_name.clone(),
        ];
        args.extend(self.repo_local_flag());
        args
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.build_command.clone();
        args.extend(self.repo_local_flag());
        args
    }

    fn launcher_command(&self, dir: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.launcher[0]);
        cmd.args(&self.launcher[1..]).args(args).current_dir(dir);
        cmd
    }

    fn run_launcher(&self, dir: &Path, args: &[String], label: &str) -> Result<CommandOutput> {
        let options = StreamOptions {
            timeout: self.timeout,
            ..StreamOptions::new(label, self.output_limit_bytes)
        };
        info!(dir = %dir.display(), args = ?args, "running launcher");
        run_streaming(self.launcher_command(dir, args), &options)
            .with_context(|| format!("run {} {}", self.launcher[0], label))
    }

    fn register_alias(&self, combination: &Combination, work_dir: &Path) -> Result<()> {
        let output = self.run_launcher(work_dir, &self.alias_args(combination.cli()), "alias")?;
        let text = output.combined_text();
        if !output.status.success() || !ALIAS_ADDED_RE.is_match(&text) {
            warn!(exit_code = ?output.status.code(), "alias registration not confirmed");
            return Err(anyhow!("unexpected alias output: {}", text.trim())).context(
                CompatError::Configuration(format!(
                    "alias {} was not registered",
                    Self::alias_name(combination.cli())
                )),
            );
        }
        debug!(alias = %Self::alias_name(combination.cli()), "alias registered");
        Ok(())
    }

    fn scaffold(&self, combination: &Combination, work_dir: &Path) -> Result<Option<FailureReason>> {
        let output = self.run_launcher(work_dir, &self.scaffold_args(combination), "scaffold")?;
        if output.timed_out {
            return Ok(Some(FailureReason::ScaffoldFailed {
                detail: "timed out".to_string(),
            }));
        }
        if !output.status.success() {
            return Ok(Some(FailureReason::ScaffoldFailed {
                detail: format!("exit code {:?}", output.status.code()),
            }));
        }
        let project_dir = work_dir.join(&self.project_name);
        if !is_non_empty_dir(&project_dir) {
            return Ok(Some(FailureReason::ScaffoldFailed {
                detail: format!("{} is missing or empty", project_dir.display()),
            }));
        }
        Ok(None)
    }

    fn build(&self, work_dir: &Path) -> Result<Outcome> {
        let project_dir = work_dir.join(&self.project_name);
        let log_path = work_dir.join(BUILD_LOG);
        let args = self.build_args();
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]).current_dir(&project_dir);

        let options = StreamOptions {
            timeout: self.timeout,
            log_path: Some(&log_path),
            flag_pattern: Some(&*ERROR_LINE_RE),
            ..StreamOptions::new("build", self.output_limit_bytes)
        };
        info!(dir = %project_dir.display(), args = ?args, "running build");
        let output = run_streaming(cmd, &options).with_context(|| format!("run {}", args[0]))?;

        if output.flagged_lines > 0 {
            warn!(
                lines = output.flagged_lines,
                log = %log_path.display(),
                "build output mentions errors"
            );
        }
        if output.timed_out {
            return Ok(Outcome::Failure(FailureReason::BuildFailed { exit_code: None }));
        }
        if !output.status.success() {
            return Ok(Outcome::Failure(FailureReason::BuildFailed {
                exit_code: output.status.code(),
            }));
        }
        Ok(Outcome::Success)
    }
}

impl PairExecutor for JbangExecutor {
    #[instrument(skip_all, fields(source = %self.artifact_source))]
    fn establish_trust(&self, work_root: &Path) -> Result<()> {
        fs::create_dir_all(work_root)
            .with_context(|| format!("create work root {}", work_root.display()))?;
        let args = vec![
            "trust".to_string(),
            "add".to_string(),
            self.artifact_source.clone(),
        ];
        let output = self.run_launcher(work_root, &args, "trust")?;
        let text = output.combined_text();
        if !output.status.success() || !trust_confirmed(&text, &self.artifact_source)? {
            warn!(exit_code = ?output.status.code(), "trust not confirmed");
            return Err(anyhow!("unexpected trust output: {}", text.trim())).context(
                CompatError::Configuration(format!(
                    "could not trust {}",
                    self.artifact_source
                )),
            );
        }
        info!("artifact source trusted");
        Ok(())
    }

    #[instrument(skip_all, fields(cli = combination.cli(), platform = combination.platform()))]
    fn execute(&self, combination: &Combination, work_dir: &Path) -> Result<Outcome> {
        self.register_alias(combination, work_dir)?;
        if let Some(reason) = self.scaffold(combination, work_dir)? {
            warn!(%reason, "scaffold failed");
            return Ok(Outcome::Failure(reason));
        }
        let outcome = self.build(work_dir)?;
        debug!(success = outcome.is_success(), "pair executed");
        Ok(outcome)
    }
}

fn trust_confirmed(output: &str, source: &str) -> Result<bool> {
    let pattern = format!(
        r"(?s).*Adding .{}. to .*/trusted-sources.json.*",
        regex::escape(source)
    );
    let re = Regex::new(&pattern).context("compile trust pattern")?;
    Ok(re.is_match(output))
}

fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Work directory for one pair under `work_root`.
pub fn pair_work_dir(work_root: &Path, combination: &Combination) -> PathBuf {
    work_root.join(combination.work_dir_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(config: ToolchainConfig) -> JbangExecutor {
        JbangExecutor::from_config(&config).expect("executor")
    }

    #[test]
    fn alias_replaces_dots() {
        assert_eq!(JbangExecutor::alias_name("2.7.3.Final"), "qs-2_7_3_Final");
    }

    #[test]
    fn released_cli_comes_from_central() {
        let exec = executor(ToolchainConfig::default());
        assert_eq!(
            exec.alias_args("2.7.3.Final"),
            vec![
                "alias",
                "add",
                "-f",
                ".",
                "--name=qs-2_7_3_Final",
                "https://repo1.maven.org/maven2/io/quarkus/quarkus-cli/2.7.3.Final/quarkus-cli-2.7.3.Final-runner.jar",
            ]
        );
    }

    #[test]
    fn snapshot_cli_comes_from_local_repository() {
        let exec = executor(ToolchainConfig {
            local_repository: Some("/tmp/m2/".to_string()),
            ..ToolchainConfig::default()
        });
        assert_eq!(
            exec.runner_jar("999-SNAPSHOT"),
            "/tmp/m2/io/quarkus/quarkus-cli/999-SNAPSHOT/quarkus-cli-999-SNAPSHOT-runner.jar"
        );
    }

    #[test]
    fn scaffold_uses_snapshot_group_and_propagates_repo() {
        let exec = executor(ToolchainConfig {
            local_repository: Some("/tmp/m2".to_string()),
            ..ToolchainConfig::default()
        });
        let args = exec.scaffold_args(&Combination::new("2.7.3.Final", "999-SNAPSHOT"));
        assert_eq!(
            args,
            vec![
                "qs-2_7_3_Final",
                "create",
                "app",
                "-P=io.quarkus::999-SNAPSHOT",
                "demoapp",
                "-Dmaven.repo.local=/tmp/m2",
            ]
        );
        assert_eq!(
            exec.build_args(),
            vec!["mvn", "clean", "package", "-Dmaven.repo.local=/tmp/m2"]
        );
    }

    #[test]
    fn released_platform_uses_platform_group() {
        let exec = executor(ToolchainConfig::default());
        let args = exec.scaffold_args(&Combination::new("3.0.0.Final", "3.0.1.Final"));
        assert_eq!(args[3], "-P=io.quarkus.platform::3.0.1.Final");
        assert_eq!(args.len(), 5);
    }

    #[test]
    fn trust_output_must_name_the_source() {
        let source = "https://repo1.maven.org/maven2/io/quarkus/";
        let ok = format!(
            "[jbang] Adding [{source}] to /home/ci/.jbang/trusted-sources.json\n"
        );
        assert!(trust_confirmed(&ok, source).expect("pattern"));
        assert!(!trust_confirmed("[jbang] nothing to do", source).expect("pattern"));
    }

    #[test]
    fn pair_work_dir_is_path_safe() {
        let dir = pair_work_dir(
            Path::new("/work"),
            &Combination::new("2.7.3.Final", "io.quarkus:3.0"),
        );
        assert_eq!(
            dir,
            PathBuf::from("/work/cli_2.7.3.Final-platform_io.quarkus_3.0")
        );
    }

    #[cfg(unix)]
    mod toolchain {
        use super::*;

        const FAKE_JBANG: &str = r#"
case "$1" in
  trust) echo "[jbang] Adding [$3] to /home/ci/.jbang/trusted-sources.json" ;;
  alias) echo "[jbang] Alias $5 added to $(pwd)/jbang-catalog.json" ;;
  *) mkdir -p demoapp && echo '<project/>' > demoapp/pom.xml ;;
esac
"#;

        fn fake_executor(root: &Path, build: &str) -> JbangExecutor {
            let script = root.join("jbang.sh");
            fs::write(&script, FAKE_JBANG).expect("write launcher");
            executor(ToolchainConfig {
                launcher: vec!["sh".to_string(), script.display().to_string()],
                build_command: vec!["sh".to_string(), "-c".to_string(), build.to_string()],
                ..ToolchainConfig::default()
            })
        }

        #[test]
        fn successful_pair_writes_build_log() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exec = fake_executor(temp.path(), "echo '[INFO] BUILD SUCCESS'");
            let work_dir = temp.path().join("work");
            fs::create_dir_all(&work_dir).expect("mkdir");

            exec.establish_trust(temp.path()).expect("trust");
            let outcome = exec
                .execute(&Combination::new("1.0.Final", "1.0.Final"), &work_dir)
                .expect("execute");
            assert_eq!(outcome, Outcome::Success);
            let log = fs::read_to_string(work_dir.join(BUILD_LOG)).expect("log");
            assert!(log.contains("BUILD SUCCESS"));
        }

        #[test]
        fn nonzero_build_is_a_pair_failure() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exec = fake_executor(temp.path(), "echo '[ERROR] compilation'; exit 1");
            let work_dir = temp.path().join("work");
            fs::create_dir_all(&work_dir).expect("mkdir");

            let outcome = exec
                .execute(&Combination::new("2.0.Final", "1.0.Final"), &work_dir)
                .expect("execute");
            assert_eq!(
                outcome,
                Outcome::Failure(FailureReason::BuildFailed { exit_code: Some(1) })
            );
        }

        #[test]
        fn error_lines_with_zero_exit_still_succeed() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exec = fake_executor(temp.path(), "echo '[ERROR] incidental'; exit 0");
            let work_dir = temp.path().join("work");
            fs::create_dir_all(&work_dir).expect("mkdir");

            let outcome = exec
                .execute(&Combination::new("1.0.Final", "2.0.Final"), &work_dir)
                .expect("execute");
            assert_eq!(outcome, Outcome::Success);
            let log = fs::read_to_string(work_dir.join(BUILD_LOG)).expect("log");
            assert!(log.contains("[ERROR] incidental"));
        }

        #[test]
        fn empty_scaffold_is_a_pair_failure() {
            let temp = tempfile::tempdir().expect("tempdir");
            let mut exec = fake_executor(temp.path(), "true");
            exec.project_name = "elsewhere".to_string();
            let work_dir = temp.path().join("work");
            fs::create_dir_all(&work_dir).expect("mkdir");

            let outcome = exec
                .execute(&Combination::new("1.0.Final", "1.0.Final"), &work_dir)
                .expect("execute");
            assert!(matches!(
                outcome,
                Outcome::Failure(FailureReason::ScaffoldFailed { .. })
            ));
        }

        #[test]
        fn unconfirmed_trust_is_a_configuration_failure() {
            let temp = tempfile::tempdir().expect("tempdir");
            let exec = executor(ToolchainConfig {
                launcher: vec!["echo".to_string()],
                ..ToolchainConfig::default()
            });
            let err = exec.establish_trust(temp.path()).expect_err("mismatch");
            assert!(matches!(
                err.downcast_ref::<CompatError>(),
                Some(CompatError::Configuration(_))
            ));
        }
    }
}
