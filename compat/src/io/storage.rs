//! Durable combination store with schema validation and migration.
//!
//! The current layout is a single JSON document (`schema_version: 2`). Older
//! layouts are recognized on load and converted in memory; they are rewritten
//! in the current layout on the next flush.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::combination::{Combination, IgnoreRule};
use crate::core::store::CombinationStore;
use crate::error::CompatError;

pub const SCHEMA_VERSION: u32 = 2;

const STORE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/combination_store/v2.schema.json"
));

const LEGACY_DIR: &str = "cli-compat-test";
const LEGACY_VERIFIED: &str = "verified.json";
const LEGACY_FAILED: &str = "test-failed.json";

/// Locations of the current store file and the legacy split files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub current: PathBuf,
    pub legacy_verified: PathBuf,
    pub legacy_failed: PathBuf,
}

impl StorePaths {
    pub fn new(dir: &Path, name: &str) -> Self {
        let legacy = dir.join(LEGACY_DIR);
        Self {
            current: dir.join(format!("{name}.json")),
            legacy_verified: legacy.join(LEGACY_VERIFIED),
            legacy_failed: legacy.join(LEGACY_FAILED),
        }
    }
}

/// Layout a store was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    /// `{"values": [...]}`, every entry verified.
    SingleSet,
    /// `{"cli_versions", "platform_versions", "ignored_pairs"}`.
    SeenVersions,
    /// `cli-compat-test/verified.json` plus `test-failed.json`.
    SplitFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrigin {
    /// Nothing on disk.
    Empty,
    Current,
    Migrated { from: StoreFormat },
}

#[derive(Debug, Clone)]
pub struct LoadedStore {
    pub store: CombinationStore,
    pub origin: StoreOrigin,
}

impl LoadedStore {
    pub fn needs_rewrite(&self) -> bool {
        matches!(self.origin, StoreOrigin::Migrated { .. })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    schema_version: u32,
    verified: Vec<Combination>,
    failed: Vec<Combination>,
    ignored: Vec<IgnoreRule>,
}

#[derive(Debug, Deserialize)]
struct SingleSetDocument {
    #[serde(default)]
    values: Vec<Combination>,
}

#[derive(Debug, Deserialize)]
struct SeenVersionsDocument {
    #[serde(default)]
    cli_versions: Vec<String>,
    #[serde(default)]
    platform_versions: Vec<String>,
    #[serde(default)]
    ignored_pairs: Vec<IgnoreRule>,
}

/// Load the store, migrating older layouts. Absent files yield an empty store.
#[instrument(skip_all, fields(path = %paths.current.display()))]
pub fn load_store(paths: &StorePaths) -> Result<LoadedStore> {
    load_store_inner(paths).context(CompatError::Storage(format!(
        "load {}",
        paths.current.display()
    )))
}

fn load_store_inner(paths: &StorePaths) -> Result<LoadedStore> {
    if paths.current.is_file() {
        let value = read_json(&paths.current)?;
        let loaded = parse_store(&value)
            .with_context(|| format!("decode store {}", paths.current.display()))?;
        info!(
            verified = loaded.store.counts().verified,
            failed = loaded.store.counts().failed,
            ignored = loaded.store.counts().ignored,
            origin = ?loaded.origin,
            "store loaded"
        );
        return Ok(loaded);
    }

    if paths.legacy_verified.is_file() || paths.legacy_failed.is_file() {
        let verified = read_single_set(&paths.legacy_verified)?;
        let failed = read_single_set(&paths.legacy_failed)?;
        info!(
            verified = verified.len(),
            failed = failed.len(),
            "importing legacy split store files"
        );
        return Ok(LoadedStore {
            store: CombinationStore::from_sets(verified, failed, Vec::new()),
            origin: StoreOrigin::Migrated {
                from: StoreFormat::SplitFiles,
            },
        });
    }

    debug!("no store on disk, starting empty");
    Ok(LoadedStore {
        store: CombinationStore::new(),
        origin: StoreOrigin::Empty,
    })
}

fn read_json(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn read_single_set(path: &Path) -> Result<Vec<Combination>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let document: SingleSetDocument = serde_json::from_value(read_json(path)?)
        .with_context(|| format!("decode {}", path.display()))?;
    Ok(document.values)
}

/// Decode a store document in any known layout.
pub fn parse_store(value: &Value) -> Result<LoadedStore> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("store document must be a JSON object"))?;

    if let Some(version) = object.get("schema_version") {
        let version = version
            .as_u64()
            .ok_or_else(|| anyhow!("schema_version must be an integer"))?;
        if version != u64::from(SCHEMA_VERSION) {
            return Err(anyhow!("unsupported schema_version {version}"));
        }
        validate_schema(value)?;
        let document: StoreDocument =
            serde_json::from_value(value.clone()).context("deserialize store")?;
        return Ok(LoadedStore {
            store: CombinationStore::from_sets(
                document.verified,
                document.failed,
                document.ignored,
            ),
            origin: StoreOrigin::Current,
        });
    }

    if object.contains_key("values") {
        let document: SingleSetDocument =
            serde_json::from_value(value.clone()).context("deserialize single-set store")?;
        return Ok(LoadedStore {
            store: CombinationStore::from_sets(document.values, Vec::new(), Vec::new()),
            origin: StoreOrigin::Migrated {
                from: StoreFormat::SingleSet,
            },
        });
    }

    if object.contains_key("cli_versions") || object.contains_key("platform_versions") {
        let document: SeenVersionsDocument =
            serde_json::from_value(value.clone()).context("deserialize seen-versions store")?;
        let verified = document.cli_versions.iter().flat_map(|cli| {
            document
                .platform_versions
                .iter()
                .map(move |platform| Combination::new(cli.as_str(), platform.as_str()))
        });
        let store = CombinationStore::from_sets(verified, Vec::new(), document.ignored_pairs);
        return Ok(LoadedStore {
            store,
            origin: StoreOrigin::Migrated {
                from: StoreFormat::SeenVersions,
            },
        });
    }

    Err(anyhow!("unrecognized store layout"))
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(STORE_SCHEMA).context("parse store schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "store schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Serialize in the current layout. Sets come out sorted.
pub fn render_store(store: &CombinationStore) -> Result<String> {
    let document = StoreDocument {
        schema_version: SCHEMA_VERSION,
        verified: store.verified().cloned().collect(),
        failed: store.failed().cloned().collect(),
        ignored: store.ignored().cloned().collect(),
    };
    let mut buf = serde_json::to_string_pretty(&document)?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically write the store (temp file + rename).
pub fn write_store(path: &Path, store: &CombinationStore) -> Result<()> {
    let counts = store.counts();
    debug!(
        path = %path.display(),
        verified = counts.verified,
        failed = counts.failed,
        ignored = counts.ignored,
        "writing store"
    );
    let buf = render_store(store)?;
    write_atomic(path, &buf).context(CompatError::Storage(format!("write {}", path.display())))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("store path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace store {}", path.display()))?;
    Ok(())
}

/// Where the orchestrator checkpoints the store after each pair.
pub trait StoreBackend {
    fn flush(&self, store: &CombinationStore) -> Result<()>;
}

/// Writes the store file on every flush.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreBackend for FileBackend {
    fn flush(&self, store: &CombinationStore) -> Result<()> {
        write_store(&self.path, store)
    }
}

/// Discards every flush. Used for snapshot runs, whose results are not kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralBackend;

impl StoreBackend for EphemeralBackend {
    fn flush(&self, store: &CombinationStore) -> Result<()> {
        debug!(verified = store.counts().verified, "ephemeral store, flush skipped");
        Ok(())
    }
}

/// Rewrite the store in the current layout. Returns the origin it was read from.
pub fn migrate_store(paths: &StorePaths) -> Result<StoreOrigin> {
    let loaded = load_store(paths)?;
    if loaded.origin == StoreOrigin::Empty {
        warn!("no store found, writing an empty one");
    }
    write_store(&paths.current, &loaded.store)?;
    Ok(loaded.origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(cli: &str, platform: &str) -> Combination {
        Combination::new(cli, platform)
    }

    fn paths(root: &Path) -> StorePaths {
        StorePaths::new(&root.join("storage"), "cli-compat")
    }

    #[test]
    fn absent_store_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let loaded = load_store(&paths(temp.path())).expect("load");
        assert_eq!(loaded.origin, StoreOrigin::Empty);
        assert!(loaded.store.is_empty());
    }

    #[test]
    fn write_then_load_keeps_all_sets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths(temp.path());
        let mut store = CombinationStore::new();
        store.record_success(&pair("2.7.3.Final", "2.7.3.Final"));
        store.record_failure(&pair("2.7.3.Final", "2.2.3.Final"));
        store.ignore(IgnoreRule::new(Some("2.5.0.Final"), None));

        write_store(&paths.current, &store).expect("write");
        let loaded = load_store(&paths).expect("load");
        assert_eq!(loaded.origin, StoreOrigin::Current);
        assert_eq!(loaded.store, store);
        assert!(!paths.current.with_extension("json.tmp").exists());
    }

    #[test]
    fn output_is_sorted_and_omits_wildcards() {
        let mut store = CombinationStore::new();
        store.record_success(&pair("2.0.Final", "1.0.Final"));
        store.record_success(&pair("1.0.Final", "1.0.Final"));
        store.ignore(IgnoreRule::new(Some("3.0.Final"), Some("*")));
        let rendered = render_store(&store).expect("render");
        let value: Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(value["schema_version"], 2);
        assert_eq!(value["verified"][0]["cli"], "1.0.Final");
        assert_eq!(value["verified"][1]["cli"], "2.0.Final");
        assert_eq!(value["ignored"][0], serde_json::json!({"cli": "3.0.Final"}));
        assert!(rendered.ends_with("}\n"));
    }

    #[test]
    fn single_set_layout_imports_as_verified() {
        let value = serde_json::json!({
            "values": [{"cli": "1.0.Final", "platform": "2.0.Final"}]
        });
        let loaded = parse_store(&value).expect("parse");
        assert_eq!(
            loaded.origin,
            StoreOrigin::Migrated {
                from: StoreFormat::SingleSet
            }
        );
        assert!(loaded.store.is_verified(&pair("1.0.Final", "2.0.Final")));
        assert!(loaded.needs_rewrite());
    }

    #[test]
    fn seen_versions_layout_imports_cross_product() {
        let value = serde_json::json!({
            "cli_versions": ["1.0.Final", "2.0.Final"],
            "platform_versions": ["1.0.Final"],
            "ignored_pairs": [{"cli": "2.5.0.Final", "platform": ""}]
        });
        let loaded = parse_store(&value).expect("parse");
        let counts = loaded.store.counts();
        assert_eq!(counts.verified, 2);
        assert_eq!(counts.ignored, 1);
        assert!(loaded.store.is_verified(&pair("2.0.Final", "1.0.Final")));
        assert!(loaded.store.is_ignored(&pair("2.5.0.Final", "anything")));
    }

    #[test]
    fn legacy_split_files_are_imported_when_current_is_absent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths(temp.path());
        let legacy_dir = paths.legacy_verified.parent().expect("parent");
        fs::create_dir_all(legacy_dir).expect("mkdir");
        fs::write(
            &paths.legacy_verified,
            r#"{"values": [{"cli": "1.0.Final", "platform": "1.0.Final"}]}"#,
        )
        .expect("write verified");
        fs::write(
            &paths.legacy_failed,
            r#"{"values": [{"cli": "2.0.Final", "platform": "1.0.Final"}]}"#,
        )
        .expect("write failed");

        let loaded = load_store(&paths).expect("load");
        assert_eq!(
            loaded.origin,
            StoreOrigin::Migrated {
                from: StoreFormat::SplitFiles
            }
        );
        assert!(loaded.store.is_verified(&pair("1.0.Final", "1.0.Final")));
        assert!(loaded.store.is_failed(&pair("2.0.Final", "1.0.Final")));

        assert_eq!(
            migrate_store(&paths).expect("migrate"),
            StoreOrigin::Migrated {
                from: StoreFormat::SplitFiles
            }
        );
        assert_eq!(
            load_store(&paths).expect("reload").origin,
            StoreOrigin::Current
        );
    }

    #[test]
    fn corrupt_store_is_a_storage_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths(temp.path());
        fs::create_dir_all(paths.current.parent().expect("parent")).expect("mkdir");
        fs::write(&paths.current, "{not json").expect("write");
        let err = load_store(&paths).expect_err("corrupt");
        assert!(matches!(
            err.downcast_ref::<CompatError>(),
            Some(CompatError::Storage(_))
        ));
    }

    #[test]
    fn schema_rejects_unknown_fields() {
        let value = serde_json::json!({
            "schema_version": 2,
            "verified": [{"cli": "1.0.Final", "platform": "1.0.Final", "extra": true}],
            "failed": [],
            "ignored": []
        });
        let err = parse_store(&value).expect_err("invalid");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn future_schema_version_is_rejected() {
        let value = serde_json::json!({"schema_version": 3});
        let err = parse_store(&value).expect_err("unsupported");
        assert!(err.to_string().contains("unsupported schema_version 3"));
    }
}
