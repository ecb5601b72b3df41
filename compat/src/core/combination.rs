//! Pair identity and ignore rules.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Ignore-rule field value meaning "any version".
pub const WILDCARD: &str = "*";

/// A `(cli, platform)` version pair under test.
///
/// Identity is exact string equality over both fields. Fields are private so a
/// pair cannot change once it is used as a set key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Combination {
    cli: String,
    platform: String,
}

impl Combination {
    pub fn new(cli: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            cli: cli.into(),
            platform: platform.into(),
        }
    }

    pub fn cli(&self) -> &str {
        &self.cli
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Directory name for this pair's isolated work directory.
    pub fn work_dir_name(&self) -> String {
        format!(
            "cli_{}-platform_{}",
            path_safe(&self.cli),
            path_safe(&self.platform)
        )
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cli={} platform={}", self.cli, self.platform)
    }
}

fn path_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Ignore-list entry. A `None` field matches any version of that field.
///
/// On load, an absent field, an empty string, or `"*"` all mean wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IgnoreRule {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wildcard_field"
    )]
    cli: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wildcard_field"
    )]
    platform: Option<String>,
}

impl IgnoreRule {
    pub fn new(cli: Option<&str>, platform: Option<&str>) -> Self {
        Self {
            cli: cli.and_then(concrete),
            platform: platform.and_then(concrete),
        }
    }

    pub fn cli(&self) -> Option<&str> {
        self.cli.as_deref()
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn is_wildcard(&self) -> bool {
        self.cli.is_none() || self.platform.is_none()
    }

    pub fn matches(&self, combination: &Combination) -> bool {
        field_matches(self.cli.as_deref(), combination.cli())
            && field_matches(self.platform.as_deref(), combination.platform())
    }
}

impl fmt::Display for IgnoreRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cli={} platform={}",
            self.cli.as_deref().unwrap_or(WILDCARD),
            self.platform.as_deref().unwrap_or(WILDCARD)
        )
    }
}

fn field_matches(rule: Option<&str>, value: &str) -> bool {
    rule.is_none_or(|expected| expected == value)
}

fn concrete(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == WILDCARD {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn wildcard_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(concrete))
}
