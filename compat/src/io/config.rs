//! Orchestrator configuration stored in `compat.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::{BrokenPairPolicy, PolicyRules};

pub const DEFAULT_CONFIG_PATH: &str = "compat.toml";
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.quarkus.io/client/platforms/all";
pub const DEFAULT_ARTIFACT_SOURCE: &str = "https://repo1.maven.org/maven2/io/quarkus/";
pub const DEFAULT_SNAPSHOT_VERSION: &str = "999-SNAPSHOT";

/// Orchestrator configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values the
/// upstream compatibility job uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompatConfig {
    /// Endpoint listing platform streams and releases.
    pub registry_url: String,

    /// Pairs attempted per release-mode run, on top of retried failures.
    pub max_new_pairs: usize,

    /// Root for per-pair work directories. A temporary directory is used when unset.
    pub work_root: Option<PathBuf>,

    pub storage: StorageConfig,
    pub toolchain: ToolchainConfig,
    pub policy: PolicyRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `<name>.json`.
    pub dir: PathBuf,
    pub name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("storage"),
            name: "cli-compat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Launcher used for trust, alias registration and scaffolding (e.g. `["./jbang"]`).
    pub launcher: Vec<String>,

    /// Build command run inside the scaffolded project.
    pub build_command: Vec<String>,

    /// Remote source that cli runner jars are fetched from; must be trusted first.
    pub artifact_source: String,

    /// Version sentinel meaning "latest local build".
    pub snapshot_version: String,

    /// Platform group for released platforms.
    pub platform_group: String,

    /// Platform group used when the platform is the snapshot sentinel.
    pub snapshot_platform_group: String,

    /// Name of the scaffolded project directory.
    pub project_name: String,

    /// Local Maven repository, forwarded as `-Dmaven.repo.local=...` when set.
    pub local_repository: Option<String>,

    /// Per-subprocess timeout in seconds. `0` waits indefinitely.
    pub timeout_secs: u64,

    /// Captured stdout/stderr kept in memory per subprocess.
    pub output_limit_bytes: usize,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            launcher: vec!["jbang".to_string()],
            build_command: vec![
                "mvn".to_string(),
                "clean".to_string(),
                "package".to_string(),
            ],
            artifact_source: DEFAULT_ARTIFACT_SOURCE.to_string(),
            snapshot_version: DEFAULT_SNAPSHOT_VERSION.to_string(),
            platform_group: "io.quarkus.platform".to_string(),
            snapshot_platform_group: "io.quarkus".to_string(),
            project_name: "demoapp".to_string(),
            local_repository: None,
            timeout_secs: 0,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl ToolchainConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            max_new_pairs: 10,
            work_root: None,
            storage: StorageConfig::default(),
            toolchain: ToolchainConfig::default(),
            policy: PolicyRules::default(),
        }
    }
}

impl CompatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.registry_url.trim().is_empty() {
            return Err(anyhow!("registry_url must be non-empty"));
        }
        if self.storage.name.trim().is_empty() || self.storage.name.contains(['/', '\\']) {
            return Err(anyhow!("storage.name must be a plain file stem"));
        }
        if self.toolchain.launcher.is_empty() || self.toolchain.launcher[0].trim().is_empty() {
            return Err(anyhow!("toolchain.launcher must be a non-empty array"));
        }
        if self.toolchain.build_command.is_empty()
            || self.toolchain.build_command[0].trim().is_empty()
        {
            return Err(anyhow!("toolchain.build_command must be a non-empty array"));
        }
        if !self.toolchain.artifact_source.ends_with('/') {
            return Err(anyhow!("toolchain.artifact_source must end with '/'"));
        }
        if self.toolchain.snapshot_version.trim().is_empty() {
            return Err(anyhow!("toolchain.snapshot_version must be non-empty"));
        }
        if self.toolchain.project_name.trim().is_empty() {
            return Err(anyhow!("toolchain.project_name must be non-empty"));
        }
        if self.toolchain.output_limit_bytes == 0 {
            return Err(anyhow!("toolchain.output_limit_bytes must be > 0"));
        }
        BrokenPairPolicy::new(&self.policy).context("policy")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CompatConfig::default()`.
pub fn load_config(path: &Path) -> Result<CompatConfig> {
    if !path.exists() {
        let cfg = CompatConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CompatConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::RangeRule;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CompatConfig::default());
        assert_eq!(cfg.toolchain.timeout(), None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("compat.toml");
        fs::write(
            &path,
            r#"
max_new_pairs = 3

[toolchain]
launcher = ["./jbang"]
timeout_secs = 900

[[policy.range_rules]]
min_platform = "3.0"
max_exclusive_cli = "2.11"

[[policy.range_rules]]
min_platform = "3.5"
max_exclusive_cli = "3.2"
"#,
        )
        .expect("write config");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_new_pairs, 3);
        assert_eq!(cfg.toolchain.launcher, vec!["./jbang"]);
        assert_eq!(cfg.toolchain.build_command, vec!["mvn", "clean", "package"]);
        assert_eq!(cfg.toolchain.timeout(), Some(Duration::from_secs(900)));
        assert_eq!(cfg.policy.broken_cli, PolicyRules::default().broken_cli);
        assert_eq!(
            cfg.policy.range_rules[1],
            RangeRule {
                min_platform: "3.5".to_string(),
                max_exclusive_cli: "3.2".to_string(),
            }
        );
        assert_eq!(cfg.storage, StorageConfig::default());
    }

    #[test]
    fn rejects_empty_build_command() {
        let cfg = CompatConfig {
            toolchain: ToolchainConfig {
                build_command: Vec::new(),
                ..ToolchainConfig::default()
            },
            ..CompatConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("build_command"));
    }

    #[test]
    fn rejects_unparseable_range_threshold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("compat.toml");
        fs::write(
            &path,
            "[[policy.range_rules]]\nmin_platform = \"next\"\nmax_exclusive_cli = \"2.11\"\n",
        )
        .expect("write config");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("min_platform"));
    }
}
