//! Known-incompatible pair detection.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::combination::Combination;
use crate::core::version::ArtifactVersion;

/// A cross-incompatibility: platforms at or above `min_platform` cannot be
/// created by cli releases below `max_exclusive_cli`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRule {
    pub min_platform: String,
    pub max_exclusive_cli: String,
}

/// Policy data, as stored in `compat.toml` under `[policy]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRules {
    /// Cli releases broken against every platform.
    pub broken_cli: Vec<String>,
    /// Platform releases broken against every cli.
    pub broken_platforms: Vec<String>,
    pub range_rules: Vec<RangeRule>,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            broken_cli: vec!["2.6.0.Final".to_string(), "2.6.1.Final".to_string()],
            broken_platforms: Vec::new(),
            range_rules: vec![RangeRule {
                min_platform: "3.0".to_string(),
                max_exclusive_cli: "2.11".to_string(),
            }],
        }
    }
}

/// Why a pair was classified as broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokenReason {
    Cli,
    Platform,
    Range { rule: usize },
}

impl fmt::Display for BrokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokenReason::Cli => write!(f, "cli version is blacklisted"),
            BrokenReason::Platform => write!(f, "platform version is blacklisted"),
            BrokenReason::Range { rule } => write!(f, "matches range rule #{rule}"),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRangeRule {
    min_platform: ArtifactVersion,
    max_exclusive_cli: ArtifactVersion,
}

/// Pure predicate over pairs. Rules are an OR: any match makes the pair broken.
#[derive(Debug, Clone)]
pub struct BrokenPairPolicy {
    broken_cli: BTreeSet<String>,
    broken_platforms: BTreeSet<String>,
    range_rules: Vec<CompiledRangeRule>,
}

impl BrokenPairPolicy {
    /// Compile policy rules. Range thresholds must be parseable versions.
    pub fn new(rules: &PolicyRules) -> Result<Self> {
        let range_rules = rules
            .range_rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                let min_platform = ArtifactVersion::parse(&rule.min_platform).ok_or_else(|| {
                    anyhow!(
                        "range rule #{idx}: invalid min_platform {:?}",
                        rule.min_platform
                    )
                })?;
                let max_exclusive_cli = ArtifactVersion::parse(&rule.max_exclusive_cli)
                    .ok_or_else(|| {
                        anyhow!(
                            "range rule #{idx}: invalid max_exclusive_cli {:?}",
                            rule.max_exclusive_cli
                        )
                    })?;
                Ok(CompiledRangeRule {
                    min_platform,
                    max_exclusive_cli,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            broken_cli: rules.broken_cli.iter().cloned().collect(),
            broken_platforms: rules.broken_platforms.iter().cloned().collect(),
            range_rules,
        })
    }

    /// Policy that never reports a pair as broken.
    pub fn permissive() -> Self {
        Self {
            broken_cli: BTreeSet::new(),
            broken_platforms: BTreeSet::new(),
            range_rules: Vec::new(),
        }
    }

    pub fn is_broken(&self, combination: &Combination) -> bool {
        self.broken_reason(combination).is_some()
    }

    /// First matching rule, if any.
    ///
    /// Versions that fail to parse never match a range rule.
    pub fn broken_reason(&self, combination: &Combination) -> Option<BrokenReason> {
        if self.broken_cli.contains(combination.cli()) {
            return Some(BrokenReason::Cli);
        }
        if self.broken_platforms.contains(combination.platform()) {
            return Some(BrokenReason::Platform);
        }
        if self.range_rules.is_empty() {
            return None;
        }
        let cli = ArtifactVersion::parse(combination.cli())?;
        let platform = ArtifactVersion::parse(combination.platform())?;
        self.range_rules
            .iter()
            .position(|rule| platform >= rule.min_platform && cli < rule.max_exclusive_cli)
            .map(|rule| BrokenReason::Range { rule })
    }
}
