//! Version catalog fetched from the platform registry.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::CompatError;

static BARE_RELEASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());

/// Registry response: `{platforms: [{streams: [{releases: [{version}]}]}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformsDocument {
    #[serde(default)]
    pub platforms: Vec<Platform>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub streams: Vec<Stream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
}

/// Which versions to take from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// First (newest) release of every stream.
    LatestPerStream,
    /// Every finalized release: contains `Final` or is a bare `MAJOR.MINOR.PATCH`.
    AllFinal,
}

impl PlatformsDocument {
    fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.platforms
            .iter()
            .flat_map(|platform| platform.streams.iter())
    }

    /// First release of each stream. Blank version strings are skipped.
    pub fn latest_versions(&self) -> Vec<String> {
        self.streams()
            .filter_map(|stream| {
                stream
                    .releases
                    .iter()
                    .find(|release| !release.version.trim().is_empty())
            })
            .map(|release| release.version.clone())
            .collect()
    }

    pub fn final_versions(&self) -> Vec<String> {
        self.streams()
            .flat_map(|stream| stream.releases.iter())
            .map(|release| release.version.as_str())
            .filter(|version| is_final_release(version))
            .map(str::to_string)
            .collect()
    }

    pub fn extract(&self, extraction: Extraction) -> Vec<String> {
        match extraction {
            Extraction::LatestPerStream => self.latest_versions(),
            Extraction::AllFinal => self.final_versions(),
        }
    }
}

/// Milestones, candidates and other pre-releases are excluded.
pub fn is_final_release(version: &str) -> bool {
    version.contains("Final") || BARE_RELEASE_RE.is_match(version)
}

/// Source of the registry document.
pub trait VersionCatalog {
    fn fetch(&self) -> Result<PlatformsDocument>;
}

/// Catalog backed by a single blocking HTTP GET. No retries: a failed fetch aborts the run.
pub struct HttpCatalog {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("compat/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl VersionCatalog for HttpCatalog {
    #[instrument(skip_all, fields(url = %self.url))]
    fn fetch(&self) -> Result<PlatformsDocument> {
        debug!("fetching version catalog");
        let document = self
            .client
            .get(&self.url)
            .send()
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("GET {}", self.url))?
            .json::<PlatformsDocument>()
            .with_context(|| format!("decode catalog from {}", self.url))?;
        info!(platforms = document.platforms.len(), "version catalog fetched");
        Ok(document)
    }
}

/// Fetch the catalog and extract versions, classifying any failure as a registry failure.
pub fn fetch_versions<C: VersionCatalog>(catalog: &C, extraction: Extraction) -> Result<Vec<String>> {
    let document = catalog
        .fetch()
        .context(CompatError::Registry("fetch version catalog".to_string()))?;
    let versions = document.extract(extraction);
    debug!(count = versions.len(), ?extraction, "versions extracted");
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    const SAMPLE: &str = r#"{
        "platforms": [{
            "platform-key": "io.quarkus.platform",
            "streams": [
                {"id": "3.2", "releases": [{"version": "3.2.0.CR1"}, {"version": "3.1.3.Final"}]},
                {"id": "2.16", "releases": [{"version": "2.16.7.Final"}, {"version": "2.16.6.Final"}]},
                {"id": "3.3", "releases": [{"version": "3.3.0"}, {"version": "3.3.0.Beta1"}]}
            ]
        }]
    }"#;

    fn sample() -> PlatformsDocument {
        serde_json::from_str(SAMPLE).expect("parse sample")
    }

    #[test]
    fn latest_takes_first_release_of_each_stream() {
        assert_eq!(
            sample().latest_versions(),
            vec!["3.2.0.CR1", "2.16.7.Final", "3.3.0"]
        );
    }

    #[test]
    fn blank_versions_never_become_latest() {
        let document: PlatformsDocument = serde_json::from_str(
            r#"{"platforms": [{"streams": [
                {"releases": [{"version": ""}]},
                {"releases": [{"version": " "}, {"version": "3.2.0.Final"}]}
            ]}]}"#,
        )
        .expect("parse");
        assert_eq!(document.latest_versions(), vec!["3.2.0.Final"]);
    }

    #[test]
    fn final_versions_exclude_pre_releases() {
        assert_eq!(
            sample().final_versions(),
            vec!["3.1.3.Final", "2.16.7.Final", "2.16.6.Final", "3.3.0"]
        );
    }

    #[test]
    fn bare_release_pattern_is_anchored() {
        assert!(is_final_release("3.3.0"));
        assert!(!is_final_release("3.3.0.1"));
        assert!(!is_final_release("3.3"));
        assert!(!is_final_release("3.3.0-rc1"));
    }

    #[test]
    fn missing_arrays_deserialize_as_empty() {
        let document: PlatformsDocument =
            serde_json::from_str(r#"{"platforms": [{"streams": [{}]}]}"#).expect("parse");
        assert!(document.latest_versions().is_empty());
        assert!(document.final_versions().is_empty());
    }

    struct FailingCatalog;

    impl VersionCatalog for FailingCatalog {
        fn fetch(&self) -> Result<PlatformsDocument> {
            Err(anyhow!("connection refused"))
        }
    }

    #[test]
    fn fetch_failure_is_a_registry_failure() {
        let err = fetch_versions(&FailingCatalog, Extraction::AllFinal).expect_err("fails");
        assert!(matches!(
            err.downcast_ref::<CompatError>(),
            Some(CompatError::Registry(_))
        ));
    }
}
