//! Permission-sync cadence policy.
//!
//! Pure lookups consumed by a scheduling loop: how often each source
//! re-syncs document ACLs and external groups, whether anonymous access
//! counts as public, and which jobs are due right now. No I/O happens
//! here; the native dispatcher runs the jobs.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{LifecycleError, Result};
use crate::models::{CcPairId, CcPairStatus, ConnectorCredentialPair, DocumentSource};

pub const DEFAULT_DOC_SYNC_SECS: u64 = 300;
pub const DEFAULT_PERMISSION_WORKERS: usize = 2;

/// How one kind of sync is scheduled for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInterval {
    /// The source has no such sync.
    Unsupported,
    /// Runs at the policy's default doc-sync frequency.
    Default,
    Every(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCadence {
    pub doc: SyncInterval,
    pub group: SyncInterval,
}

impl SyncCadence {
    const fn new(doc: SyncInterval, group: SyncInterval) -> Self {
        Self { doc, group }
    }
}

fn builtin_cadence(source: DocumentSource) -> SyncCadence {
    use SyncInterval::*;
    match source {
        DocumentSource::Confluence => SyncCadence::new(Every(1800), Every(1800)),
        DocumentSource::Jira => SyncCadence::new(Every(1800), Unsupported),
        DocumentSource::GoogleDrive => SyncCadence::new(Default, Every(300)),
        DocumentSource::Github => SyncCadence::new(Every(300), Every(300)),
        DocumentSource::Slack => SyncCadence::new(Every(300), Unsupported),
        DocumentSource::Teams => SyncCadence::new(Every(300), Unsupported),
        DocumentSource::File => SyncCadence::new(Unsupported, Unsupported),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Doc,
    Group,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Doc => "doc",
            SyncKind::Group => "group",
        }
    }
}

/// Lock key that keeps two sync jobs for the same pair from overlapping.
pub fn sync_lock_key(cc_pair_id: CcPairId) -> String {
    format!("ccp:{}", cc_pair_id)
}

/// A pair the scheduler may enqueue work for, with its last sync times.
#[derive(Debug, Clone)]
pub struct SyncCandidate {
    pub ccp: ConnectorCredentialPair,
    pub source: DocumentSource,
    pub last_doc_sync: Option<DateTime<Utc>>,
    pub last_group_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncJob {
    pub cc_pair_id: CcPairId,
    pub source: DocumentSource,
    pub kind: SyncKind,
    pub lock_key: String,
}

/// Per-source sync frequencies plus worker sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionSyncPolicy {
    pub default_doc_sync_secs: u64,
    pub workers: usize,
    pub confluence_anonymous_access_is_public: bool,
    cadences: HashMap<DocumentSource, SyncCadence>,
}

impl Default for PermissionSyncPolicy {
    fn default() -> Self {
        Self {
            default_doc_sync_secs: DEFAULT_DOC_SYNC_SECS,
            workers: DEFAULT_PERMISSION_WORKERS,
            confluence_anonymous_access_is_public: false,
            cadences: DocumentSource::ALL
                .into_iter()
                .map(|s| (s, builtin_cadence(s)))
                .collect(),
        }
    }
}

impl PermissionSyncPolicy {
    pub fn cadence(&self, source: DocumentSource) -> SyncCadence {
        self.cadences
            .get(&source)
            .copied()
            .unwrap_or_else(|| builtin_cadence(source))
    }

    fn resolve(&self, interval: SyncInterval) -> u64 {
        match interval {
            SyncInterval::Every(secs) => secs,
            SyncInterval::Default | SyncInterval::Unsupported => self.default_doc_sync_secs,
        }
    }

    /// Seconds between document-permission syncs. Sources without doc
    /// sync report the default; check [`supports_doc_sync`](Self::supports_doc_sync)
    /// before enqueuing.
    pub fn doc_sync_interval_secs(&self, source: DocumentSource) -> u64 {
        self.resolve(self.cadence(source).doc)
    }

    pub fn group_sync_interval_secs(&self, source: DocumentSource) -> u64 {
        self.resolve(self.cadence(source).group)
    }

    pub fn supports_doc_sync(&self, source: DocumentSource) -> bool {
        self.cadence(source).doc != SyncInterval::Unsupported
    }

    pub fn supports_group_sync(&self, source: DocumentSource) -> bool {
        self.cadence(source).group != SyncInterval::Unsupported
    }

    /// Only Confluence can treat anonymous viewers as public. Everywhere
    /// else they map to a synthetic group.
    pub fn is_anonymous_access_public(&self, source: DocumentSource) -> bool {
        source == DocumentSource::Confluence && self.confluence_anonymous_access_is_public
    }

    pub fn set_doc_sync_secs(&mut self, source: DocumentSource, secs: u64) {
        let mut cadence = self.cadence(source);
        cadence.doc = SyncInterval::Every(secs);
        self.cadences.insert(source, cadence);
    }

    pub fn set_group_sync_secs(&mut self, source: DocumentSource, secs: u64) {
        let mut cadence = self.cadence(source);
        cadence.group = SyncInterval::Every(secs);
        self.cadences.insert(source, cadence);
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LifecycleError::InvalidConfig(
                "permission_sync.workers must be >= 1".to_string(),
            ));
        }
        if self.default_doc_sync_secs == 0 {
            return Err(LifecycleError::InvalidConfig(
                "permission_sync.default_doc_sync_secs must be >= 1".to_string(),
            ));
        }
        for source in DocumentSource::ALL {
            let cadence = self.cadence(source);
            for (kind, interval) in [(SyncKind::Doc, cadence.doc), (SyncKind::Group, cadence.group)] {
                if interval == SyncInterval::Every(0) {
                    return Err(LifecycleError::InvalidConfig(format!(
                        "{} {} sync interval must be >= 1 second",
                        source,
                        kind.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Jobs that should start at `now`. Only `ACTIVE` pairs are scheduled.
    pub fn due_syncs(&self, candidates: &[SyncCandidate], now: DateTime<Utc>) -> Vec<SyncJob> {
        let is_due = |last: Option<DateTime<Utc>>, secs: u64| match last {
            None => true,
            Some(at) => now - at >= Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64),
        };

        let mut jobs = Vec::new();
        for candidate in candidates {
            if candidate.ccp.status != CcPairStatus::Active {
                continue;
            }
            let source = candidate.source;
            let mut push = |kind| {
                jobs.push(SyncJob {
                    cc_pair_id: candidate.ccp.id,
                    source,
                    kind,
                    lock_key: sync_lock_key(candidate.ccp.id),
                })
            };
            if self.supports_doc_sync(source)
                && is_due(candidate.last_doc_sync, self.doc_sync_interval_secs(source))
            {
                push(SyncKind::Doc);
            }
            if self.supports_group_sync(source)
                && is_due(candidate.last_group_sync, self.group_sync_interval_secs(source))
            {
                push(SyncKind::Group);
            }
        }
        jobs
    }
}
