//! Core data models for the connector lifecycle subsystem.
//!
//! These types mirror the rows of the relational metadata store. Ids are
//! plain integers for connectors, credentials, and pairs; documents keep
//! the stable string id assigned by their source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LifecycleError;

pub type ConnectorId = i64;
pub type CredentialId = i64;
pub type CcPairId = i64;

/// Connector config key listing blob ids owned by file-type connectors.
pub const FILE_LOCATIONS_KEY: &str = "file_locations";

/// External system a connector pulls documents from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Confluence,
    Jira,
    GoogleDrive,
    Github,
    Slack,
    Teams,
    File,
}

impl DocumentSource {
    pub const ALL: [DocumentSource; 7] = [
        DocumentSource::Confluence,
        DocumentSource::Jira,
        DocumentSource::GoogleDrive,
        DocumentSource::Github,
        DocumentSource::Slack,
        DocumentSource::Teams,
        DocumentSource::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Confluence => "confluence",
            DocumentSource::Jira => "jira",
            DocumentSource::GoogleDrive => "google_drive",
            DocumentSource::Github => "github",
            DocumentSource::Slack => "slack",
            DocumentSource::Teams => "teams",
            DocumentSource::File => "file",
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DocumentSource {
    type Err = LifecycleError;

    /// Accepts both `google_drive` and `GOOGLE_DRIVE` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        DocumentSource::ALL
            .into_iter()
            .find(|src| src.as_str() == lowered)
            .ok_or_else(|| LifecycleError::not_found("document source", s))
    }
}

/// Lifecycle status of a connector-credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CcPairStatus {
    Active,
    Paused,
    Deleting,
    Invalid,
}

impl CcPairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CcPairStatus::Active => "ACTIVE",
            CcPairStatus::Paused => "PAUSED",
            CcPairStatus::Deleting => "DELETING",
            CcPairStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for CcPairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CcPairStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(CcPairStatus::Active),
            "PAUSED" => Ok(CcPairStatus::Paused),
            "DELETING" => Ok(CcPairStatus::Deleting),
            "INVALID" => Ok(CcPairStatus::Invalid),
            _ => Err(LifecycleError::store(format!(
                "unknown connector credential pair status '{}'",
                s
            ))),
        }
    }
}

/// An external data source definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub name: String,
    pub source: DocumentSource,
    /// Source-specific settings (paths, space keys, ...).
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Connector {
    /// Blob ids referenced by a file-type connector; empty for every other source.
    pub fn file_locations(&self) -> Vec<String> {
        if self.source != DocumentSource::File {
            return Vec::new();
        }
        self.config
            .get(FILE_LOCATIONS_KEY)
            .and_then(Value::as_array)
            .map(|locations| {
                locations
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub name: String,
}

/// One connector bound to one credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorCredentialPair {
    pub id: CcPairId,
    pub connector_id: ConnectorId,
    pub credential_id: CredentialId,
    pub name: String,
    pub status: CcPairStatus,
}

/// Indexed content owned by a connector-credential pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub connector_id: ConnectorId,
    pub credential_id: CredentialId,
    pub semantic_id: String,
    /// Number of chunks the index engine holds for this document.
    pub chunk_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub source: DocumentSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexAttemptStatus {
    NotStarted,
    InProgress,
    Success,
    Failed,
    Canceled,
}

impl IndexAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexAttemptStatus::NotStarted => "NOT_STARTED",
            IndexAttemptStatus::InProgress => "IN_PROGRESS",
            IndexAttemptStatus::Success => "SUCCESS",
            IndexAttemptStatus::Failed => "FAILED",
            IndexAttemptStatus::Canceled => "CANCELED",
        }
    }

    /// Attempts that may still write documents.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            IndexAttemptStatus::NotStarted | IndexAttemptStatus::InProgress
        )
    }
}

impl FromStr for IndexAttemptStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(IndexAttemptStatus::NotStarted),
            "IN_PROGRESS" => Ok(IndexAttemptStatus::InProgress),
            "SUCCESS" => Ok(IndexAttemptStatus::Success),
            "FAILED" => Ok(IndexAttemptStatus::Failed),
            "CANCELED" => Ok(IndexAttemptStatus::Canceled),
            other => Err(LifecycleError::store(format!(
                "unknown index attempt status '{}'",
                other
            ))),
        }
    }
}

/// One ingestion run for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAttempt {
    pub id: i64,
    pub cc_pair_id: CcPairId,
    pub status: IndexAttemptStatus,
    /// Attempt runs against the in-progress (secondary) index generation.
    pub secondary: bool,
}

/// Persisted mirror of a registered built-in capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub in_code_id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connector(source: DocumentSource, config: Value) -> Connector {
        Connector {
            id: 1,
            name: "c".into(),
            source,
            config: config.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_source_parse_accepts_both_cases() {
        assert_eq!(
            "GOOGLE_DRIVE".parse::<DocumentSource>().unwrap(),
            DocumentSource::GoogleDrive
        );
        assert_eq!(
            "confluence".parse::<DocumentSource>().unwrap(),
            DocumentSource::Confluence
        );
        assert!("dropbox".parse::<DocumentSource>().is_err());
    }

    #[test]
    fn test_file_locations_only_for_file_sources() {
        let cfg = json!({ "file_locations": ["a.pdf", "b.txt"] });
        assert_eq!(
            connector(DocumentSource::File, cfg.clone()).file_locations(),
            vec!["a.pdf".to_string(), "b.txt".to_string()]
        );
        assert!(connector(DocumentSource::Slack, cfg).file_locations().is_empty());
        assert!(connector(DocumentSource::File, json!({})).file_locations().is_empty());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            CcPairStatus::Active,
            CcPairStatus::Paused,
            CcPairStatus::Deleting,
            CcPairStatus::Invalid,
        ] {
            assert_eq!(status.as_str().parse::<CcPairStatus>().unwrap(), status);
        }
    }
}
