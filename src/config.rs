//! Configuration parsing and validation.
//!
//! The TOML file is read first, then environment variables overlay the
//! permission-sync and deletion settings so deployments can tune cadence
//! without editing the file. A malformed override is an error.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use connector_harness_core::capability::ProviderAvailability;
use connector_harness_core::deletion::DEFAULT_BATCH_SIZE;
use connector_harness_core::models::DocumentSource;
use connector_harness_core::perm_sync::{
    PermissionSyncPolicy, SyncKind, DEFAULT_DOC_SYNC_SECS, DEFAULT_PERMISSION_WORKERS,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub deletion: DeletionConfig,
    #[serde(default)]
    pub permission_sync: PermissionSyncConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Base URL of the HTTP document index. Required by `cch delete`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            tenant_id: default_tenant_id(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_tenant_id() -> String {
    "public".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    #[serde(default = "default_files_root")]
    pub root: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: default_files_root(),
        }
    }
}

fn default_files_root() -> PathBuf {
    PathBuf::from("./data/files")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeletionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct PermissionSyncConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_doc_sync_secs")]
    pub default_doc_sync_secs: u64,
    #[serde(default)]
    pub confluence_anonymous_access_is_public: bool,
    /// Per-source interval overrides keyed by source name (`confluence`, `google_drive`, ...).
    #[serde(default)]
    pub overrides: BTreeMap<String, SyncOverride>,
}

impl Default for PermissionSyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_doc_sync_secs: default_doc_sync_secs(),
            confluence_anonymous_access_is_public: false,
            overrides: BTreeMap::new(),
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_PERMISSION_WORKERS
}
fn default_doc_sync_secs() -> u64 {
    DEFAULT_DOC_SYNC_SECS
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SyncOverride {
    #[serde(default)]
    pub doc_sync_secs: Option<u64>,
    #[serde(default)]
    pub group_sync_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub internet_search_providers: Vec<String>,
}

/// Environment variables that override one source's sync interval.
const SOURCE_FREQUENCY_VARS: &[(&str, DocumentSource, SyncKind)] = &[
    ("CONFLUENCE_PERMISSION_DOC_SYNC_FREQUENCY", DocumentSource::Confluence, SyncKind::Doc),
    ("CONFLUENCE_PERMISSION_GROUP_SYNC_FREQUENCY", DocumentSource::Confluence, SyncKind::Group),
    ("JIRA_PERMISSION_DOC_SYNC_FREQUENCY", DocumentSource::Jira, SyncKind::Doc),
    ("GOOGLE_DRIVE_PERMISSION_GROUP_SYNC_FREQUENCY", DocumentSource::GoogleDrive, SyncKind::Group),
    ("GITHUB_PERMISSION_DOC_SYNC_FREQUENCY", DocumentSource::Github, SyncKind::Doc),
    ("GITHUB_PERMISSION_GROUP_SYNC_FREQUENCY", DocumentSource::Github, SyncKind::Group),
    ("SLACK_PERMISSION_DOC_SYNC_FREQUENCY", DocumentSource::Slack, SyncKind::Doc),
    ("TEAMS_PERMISSION_DOC_SYNC_FREQUENCY", DocumentSource::Teams, SyncKind::Doc),
];

impl Config {
    /// A config with every section at its default, pointing at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            index: IndexConfig::default(),
            files: FilesConfig::default(),
            deletion: DeletionConfig::default(),
            permission_sync: PermissionSyncConfig::default(),
            capabilities: CapabilitiesConfig::default(),
        }
    }

    /// Build the cadence policy: built-in table, then file overrides.
    pub fn permission_policy(&self) -> Result<PermissionSyncPolicy> {
        let ps = &self.permission_sync;
        let mut policy = PermissionSyncPolicy::default();
        policy.workers = ps.workers;
        policy.default_doc_sync_secs = ps.default_doc_sync_secs;
        policy.confluence_anonymous_access_is_public = ps.confluence_anonymous_access_is_public;

        for (name, over) in &ps.overrides {
            let source: DocumentSource = name
                .parse()
                .with_context(|| format!("permission_sync.overrides: unknown source '{}'", name))?;
            if let Some(secs) = over.doc_sync_secs {
                policy.set_doc_sync_secs(source, secs);
            }
            if let Some(secs) = over.group_sync_secs {
                policy.set_group_sync_secs(source, secs);
            }
        }

        policy.validate()?;
        Ok(policy)
    }

    pub fn providers(&self) -> ProviderAvailability {
        ProviderAvailability {
            internet_search_providers: self.capabilities.internet_search_providers.clone(),
        }
    }

    /// Overlay recognised environment variables. `lookup` returns the raw
    /// value of a variable, if set. Empty values count as unset.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup("DEFAULT_PERMISSION_DOC_SYNC_FREQUENCY") {
            self.permission_sync.default_doc_sync_secs =
                parse_u64("DEFAULT_PERMISSION_DOC_SYNC_FREQUENCY", &v)?;
        }
        if let Some(v) = lookup("CONFLUENCE_ANONYMOUS_ACCESS_IS_PUBLIC") {
            self.permission_sync.confluence_anonymous_access_is_public =
                parse_bool("CONFLUENCE_ANONYMOUS_ACCESS_IS_PUBLIC", &v)?;
        }
        if let Some(v) = lookup("NUM_PERMISSION_WORKERS") {
            self.permission_sync.workers = parse_u64("NUM_PERMISSION_WORKERS", &v)? as usize;
        }
        if let Some(v) = lookup("DELETION_BATCH_SIZE") {
            self.deletion.batch_size = parse_u64("DELETION_BATCH_SIZE", &v)? as usize;
        }

        for (var, source, kind) in SOURCE_FREQUENCY_VARS {
            let Some(v) = lookup(var) else { continue };
            let secs = parse_u64(var, &v)?;
            let entry = self
                .permission_sync
                .overrides
                .entry(source.as_str().to_string())
                .or_default();
            match kind {
                SyncKind::Doc => entry.doc_sync_secs = Some(secs),
                SyncKind::Group => entry.group_sync_secs = Some(secs),
            }
        }
        Ok(())
    }
}

fn parse_u64(var: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{} must be a non-negative integer, got '{}'", var, value))
}

fn parse_bool(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("{} must be 'true' or 'false', got '{}'", var, value),
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.deletion.batch_size == 0 {
        bail!("deletion.batch_size must be >= 1");
    }
    if config.index.timeout_secs == 0 {
        bail!("index.timeout_secs must be >= 1");
    }
    if config.index.tenant_id.trim().is_empty() {
        bail!("index.tenant_id must not be empty");
    }
    config.permission_policy()?;
    Ok(())
}

/// Parse a config from TOML text and overlay `lookup`'s environment.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.apply_env_overrides(lookup)?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, |var| std::env::var(var).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const BASE: &str = r#"
[db]
path = "./data/cch.sqlite"
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = parse_config(BASE, env(&[])).unwrap();
        assert_eq!(cfg.deletion.batch_size, 1000);
        assert_eq!(cfg.index.tenant_id, "public");
        let policy = cfg.permission_policy().unwrap();
        assert_eq!(policy.workers, 2);
        assert_eq!(policy.doc_sync_interval_secs(DocumentSource::Confluence), 1800);
    }

    #[test]
    fn test_file_overrides() {
        let toml = format!(
            "{}\n[permission_sync]\nworkers = 4\n[permission_sync.overrides.slack]\ndoc_sync_secs = 90\n",
            BASE
        );
        let cfg = parse_config(&toml, env(&[])).unwrap();
        let policy = cfg.permission_policy().unwrap();
        assert_eq!(policy.workers, 4);
        assert_eq!(policy.doc_sync_interval_secs(DocumentSource::Slack), 90);
    }

    #[test]
    fn test_env_overrides_win() {
        let cfg = parse_config(
            BASE,
            env(&[
                ("CONFLUENCE_PERMISSION_DOC_SYNC_FREQUENCY", "60"),
                ("GOOGLE_DRIVE_PERMISSION_GROUP_SYNC_FREQUENCY", "120"),
                ("CONFLUENCE_ANONYMOUS_ACCESS_IS_PUBLIC", "TRUE"),
                ("DEFAULT_PERMISSION_DOC_SYNC_FREQUENCY", "900"),
                ("DELETION_BATCH_SIZE", "250"),
            ]),
        )
        .unwrap();
        let policy = cfg.permission_policy().unwrap();
        assert_eq!(policy.doc_sync_interval_secs(DocumentSource::Confluence), 60);
        assert_eq!(policy.group_sync_interval_secs(DocumentSource::Confluence), 1800);
        assert_eq!(policy.group_sync_interval_secs(DocumentSource::GoogleDrive), 120);
        assert_eq!(policy.doc_sync_interval_secs(DocumentSource::GoogleDrive), 900);
        assert!(policy.is_anonymous_access_public(DocumentSource::Confluence));
        assert_eq!(cfg.deletion.batch_size, 250);
    }

    #[test]
    fn test_malformed_env_is_an_error() {
        let err = parse_config(BASE, env(&[("NUM_PERMISSION_WORKERS", "two")])).unwrap_err();
        assert!(format!("{:#}", err).contains("NUM_PERMISSION_WORKERS"));

        let err = parse_config(
            BASE,
            env(&[("CONFLUENCE_ANONYMOUS_ACCESS_IS_PUBLIC", "yes")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'true' or 'false'"));
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let cfg = parse_config(
            BASE,
            env(&[
                ("NUM_PERMISSION_WORKERS", ""),
                ("DELETION_BATCH_SIZE", "  "),
                ("CONFLUENCE_ANONYMOUS_ACCESS_IS_PUBLIC", ""),
                ("SLACK_PERMISSION_DOC_SYNC_FREQUENCY", ""),
            ]),
        )
        .unwrap();
        let defaults = parse_config(BASE, env(&[])).unwrap();
        assert_eq!(cfg.deletion.batch_size, 1000);
        assert_eq!(cfg.permission_sync.workers, defaults.permission_sync.workers);
        assert!(!cfg.permission_sync.confluence_anonymous_access_is_public);
        assert!(cfg.permission_sync.overrides.is_empty());
    }

    #[test]
    fn test_validation_rejects_zero() {
        assert!(parse_config(BASE, env(&[("NUM_PERMISSION_WORKERS", "0")])).is_err());
        assert!(parse_config(BASE, env(&[("DELETION_BATCH_SIZE", "0")])).is_err());
        assert!(parse_config(BASE, env(&[("SLACK_PERMISSION_DOC_SYNC_FREQUENCY", "0")])).is_err());
    }

    #[test]
    fn test_unknown_override_source_rejected() {
        let toml = format!("{}\n[permission_sync.overrides.dropbox]\ndoc_sync_secs = 5\n", BASE);
        assert!(parse_config(&toml, env(&[])).is_err());
    }
}
