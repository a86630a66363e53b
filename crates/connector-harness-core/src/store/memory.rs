//! In-memory [`DocumentStore`] implementation for testing and embedding.
//!
//! State lives in ordered maps behind a `std::sync::Mutex`. A transaction
//! works on a private copy of the state and records every write as an
//! [`Op`]. On commit the ops are replayed against the live state under
//! the lock, so concurrent transactions touching different pairs both
//! land, and a replay failure leaves the live state untouched. Guarded
//! writes (status compare-and-set, unused-connector removal) re-check
//! their condition during that replay.
//!
//! [`InMemoryStore::fail_commits_after`] makes commits fail on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{LifecycleError, Result};
use crate::models::{
    CapabilityRecord, CcPairId, CcPairStatus, Connector, ConnectorCredentialPair, ConnectorId,
    Credential, CredentialId, Document, DocumentSource, IndexAttempt, IndexAttemptStatus, Tag,
};

use super::{DocumentStore, StoreTransaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    connectors: BTreeMap<ConnectorId, Connector>,
    credentials: BTreeMap<CredentialId, Credential>,
    cc_pairs: BTreeMap<CcPairId, ConnectorCredentialPair>,
    documents: BTreeMap<String, Document>,
    tags: BTreeMap<i64, Tag>,
    document_tags: BTreeSet<(String, i64)>,
    index_attempts: BTreeMap<i64, IndexAttempt>,
    document_set_links: BTreeSet<(i64, CcPairId)>,
    user_group_links: BTreeSet<(i64, CcPairId)>,
    capabilities: BTreeMap<String, CapabilityRecord>,
    next_tag_id: i64,
}

#[derive(Debug, Clone)]
enum Op {
    SetStatus {
        id: CcPairId,
        expected: CcPairStatus,
        status: CcPairStatus,
    },
    CancelAttempts(CcPairId, bool),
    DeleteDocuments(Vec<String>),
    DeleteOrphanTags,
    DeleteIndexAttempts(CcPairId),
    DeleteDocumentSetLinks(CcPairId),
    DeleteUserGroupLinks(CcPairId),
    DeleteCcPair(ConnectorId, CredentialId),
    DeleteConnectorIfUnused(ConnectorId),
    UpsertCapability(CapabilityRecord),
    DeleteCapability(String),
    InsertConnector(Connector),
    InsertCredential(Credential),
    InsertCcPair(ConnectorCredentialPair),
    UpsertDocument(Document),
    TagDocument {
        document_id: String,
        key: String,
        value: String,
        source: DocumentSource,
    },
    InsertIndexAttempt(IndexAttempt),
    LinkDocumentSet(i64, CcPairId),
    LinkUserGroup(i64, CcPairId),
}

fn fk_violation(what: String) -> LifecycleError {
    LifecycleError::store(format!("foreign key violation: {}", what))
}

/// Apply one write to `state`, returning the affected row count (or the
/// tag id for [`Op::TagDocument`]).
fn apply(state: &mut MemoryState, op: &Op) -> Result<i64> {
    match op {
        Op::SetStatus {
            id,
            expected,
            status,
        } => {
            let ccp = state
                .cc_pairs
                .get_mut(id)
                .ok_or_else(|| LifecycleError::not_found("connector credential pair", id))?;
            if ccp.status != *expected {
                return Err(LifecycleError::Precondition(format!(
                    "connector credential pair {} is {}, expected {}",
                    id, ccp.status, expected
                )));
            }
            ccp.status = *status;
            Ok(1)
        }
        Op::CancelAttempts(cc_pair_id, include_secondary) => {
            let mut canceled = 0;
            for attempt in state.index_attempts.values_mut() {
                if attempt.cc_pair_id == *cc_pair_id
                    && attempt.status.is_in_flight()
                    && (*include_secondary || !attempt.secondary)
                {
                    attempt.status = IndexAttemptStatus::Canceled;
                    canceled += 1;
                }
            }
            Ok(canceled)
        }
        Op::DeleteDocuments(ids) => {
            let mut removed = 0;
            for id in ids {
                if state.documents.remove(id).is_some() {
                    removed += 1;
                }
            }
            state
                .document_tags
                .retain(|(doc_id, _)| !ids.contains(doc_id));
            Ok(removed)
        }
        Op::DeleteOrphanTags => {
            let referenced: BTreeSet<i64> =
                state.document_tags.iter().map(|(_, tag_id)| *tag_id).collect();
            let before = state.tags.len();
            state.tags.retain(|id, _| referenced.contains(id));
            Ok((before - state.tags.len()) as i64)
        }
        Op::DeleteIndexAttempts(cc_pair_id) => {
            let before = state.index_attempts.len();
            state
                .index_attempts
                .retain(|_, a| a.cc_pair_id != *cc_pair_id);
            Ok((before - state.index_attempts.len()) as i64)
        }
        Op::DeleteDocumentSetLinks(cc_pair_id) => {
            let before = state.document_set_links.len();
            state
                .document_set_links
                .retain(|(_, ccp)| ccp != cc_pair_id);
            Ok((before - state.document_set_links.len()) as i64)
        }
        Op::DeleteUserGroupLinks(cc_pair_id) => {
            let before = state.user_group_links.len();
            state.user_group_links.retain(|(_, ccp)| ccp != cc_pair_id);
            Ok((before - state.user_group_links.len()) as i64)
        }
        Op::DeleteCcPair(connector_id, credential_id) => {
            let Some(id) = state
                .cc_pairs
                .values()
                .find(|c| c.connector_id == *connector_id && c.credential_id == *credential_id)
                .map(|c| c.id)
            else {
                return Ok(0);
            };
            if state
                .documents
                .values()
                .any(|d| d.connector_id == *connector_id && d.credential_id == *credential_id)
            {
                return Err(fk_violation(format!("documents still reference pair {}", id)));
            }
            if state.index_attempts.values().any(|a| a.cc_pair_id == id) {
                return Err(fk_violation(format!(
                    "index attempts still reference pair {}",
                    id
                )));
            }
            if state.document_set_links.iter().any(|(_, c)| *c == id)
                || state.user_group_links.iter().any(|(_, c)| *c == id)
            {
                return Err(fk_violation(format!(
                    "document set or user group links still reference pair {}",
                    id
                )));
            }
            state.cc_pairs.remove(&id);
            Ok(1)
        }
        Op::DeleteConnectorIfUnused(connector_id) => {
            if state
                .cc_pairs
                .values()
                .any(|c| c.connector_id == *connector_id)
            {
                return Ok(0);
            }
            Ok(state.connectors.remove(connector_id).map_or(0, |_| 1))
        }
        Op::UpsertCapability(record) => {
            state
                .capabilities
                .insert(record.in_code_id.clone(), record.clone());
            Ok(1)
        }
        Op::DeleteCapability(in_code_id) => {
            Ok(state.capabilities.remove(in_code_id).map_or(0, |_| 1))
        }
        Op::InsertConnector(connector) => {
            state.connectors.insert(connector.id, connector.clone());
            Ok(1)
        }
        Op::InsertCredential(credential) => {
            state.credentials.insert(credential.id, credential.clone());
            Ok(1)
        }
        Op::InsertCcPair(ccp) => {
            if !state.connectors.contains_key(&ccp.connector_id) {
                return Err(fk_violation(format!("no connector {}", ccp.connector_id)));
            }
            if !state.credentials.contains_key(&ccp.credential_id) {
                return Err(fk_violation(format!("no credential {}", ccp.credential_id)));
            }
            let duplicate = state.cc_pairs.values().any(|c| {
                c.id != ccp.id
                    && c.connector_id == ccp.connector_id
                    && c.credential_id == ccp.credential_id
            });
            if duplicate {
                return Err(LifecycleError::store(format!(
                    "unique violation: pair ({}, {}) already exists",
                    ccp.connector_id, ccp.credential_id
                )));
            }
            state.cc_pairs.insert(ccp.id, ccp.clone());
            Ok(1)
        }
        Op::UpsertDocument(doc) => {
            let owned = state.cc_pairs.values().any(|c| {
                c.connector_id == doc.connector_id && c.credential_id == doc.credential_id
            });
            if !owned {
                return Err(fk_violation(format!(
                    "no pair for connector {} / credential {}",
                    doc.connector_id, doc.credential_id
                )));
            }
            state.documents.insert(doc.id.clone(), doc.clone());
            Ok(1)
        }
        Op::TagDocument {
            document_id,
            key,
            value,
            source,
        } => {
            if !state.documents.contains_key(document_id) {
                return Err(fk_violation(format!("no document '{}'", document_id)));
            }
            let existing = state
                .tags
                .values()
                .find(|t| t.key == *key && t.value == *value && t.source == *source)
                .map(|t| t.id);
            let tag_id = match existing {
                Some(id) => id,
                None => {
                    state.next_tag_id += 1;
                    let id = state.next_tag_id;
                    state.tags.insert(
                        id,
                        Tag {
                            id,
                            key: key.clone(),
                            value: value.clone(),
                            source: *source,
                        },
                    );
                    id
                }
            };
            state.document_tags.insert((document_id.clone(), tag_id));
            Ok(tag_id)
        }
        Op::InsertIndexAttempt(attempt) => {
            if !state.cc_pairs.contains_key(&attempt.cc_pair_id) {
                return Err(fk_violation(format!("no pair {}", attempt.cc_pair_id)));
            }
            state.index_attempts.insert(attempt.id, attempt.clone());
            Ok(1)
        }
        Op::LinkDocumentSet(set_id, cc_pair_id) => {
            if !state.cc_pairs.contains_key(cc_pair_id) {
                return Err(fk_violation(format!("no pair {}", cc_pair_id)));
            }
            state.document_set_links.insert((*set_id, *cc_pair_id));
            Ok(1)
        }
        Op::LinkUserGroup(group_id, cc_pair_id) => {
            if !state.cc_pairs.contains_key(cc_pair_id) {
                return Err(fk_violation(format!("no pair {}", cc_pair_id)));
            }
            state.user_group_links.insert((*group_id, *cc_pair_id));
            Ok(1)
        }
    }
}

/// Commits still allowed before every commit fails. `None` never fails.
type CommitBudget = Arc<Mutex<Option<usize>>>;

/// In-memory store for tests and embedding.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    commit_budget: CommitBudget,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Let `n` more commits through, then fail every commit with a store
    /// error until [`heal`](Self::heal).
    pub fn fail_commits_after(&self, n: usize) {
        *self
            .commit_budget
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(n);
    }

    pub fn heal(&self) {
        *self
            .commit_budget
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Document-set and user-group links that reference the pair.
    pub fn link_count(&self, cc_pair_id: CcPairId) -> usize {
        let state = self.lock();
        state
            .document_set_links
            .iter()
            .filter(|(_, c)| *c == cc_pair_id)
            .count()
            + state
                .user_group_links
                .iter()
                .filter(|(_, c)| *c == cc_pair_id)
                .count()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_ccpair(&self, id: CcPairId) -> Result<Option<ConnectorCredentialPair>> {
        Ok(self.lock().cc_pairs.get(&id).cloned())
    }

    async fn get_ccpair_by_ids(
        &self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
    ) -> Result<Option<ConnectorCredentialPair>> {
        Ok(self
            .lock()
            .cc_pairs
            .values()
            .find(|c| c.connector_id == connector_id && c.credential_id == credential_id)
            .cloned())
    }

    async fn list_ccpairs(&self) -> Result<Vec<ConnectorCredentialPair>> {
        Ok(self.lock().cc_pairs.values().cloned().collect())
    }

    async fn get_connector(&self, id: ConnectorId) -> Result<Option<Connector>> {
        Ok(self.lock().connectors.get(&id).cloned())
    }

    async fn list_documents(
        &self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
        limit: usize,
    ) -> Result<Vec<Document>> {
        Ok(self
            .lock()
            .documents
            .values()
            .filter(|d| d.connector_id == connector_id && d.credential_id == credential_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.lock().tags.values().cloned().collect())
    }

    async fn list_index_attempts(&self, cc_pair_id: CcPairId) -> Result<Vec<IndexAttempt>> {
        Ok(self
            .lock()
            .index_attempts
            .values()
            .filter(|a| a.cc_pair_id == cc_pair_id)
            .cloned()
            .collect())
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>> {
        Ok(self.lock().capabilities.values().cloned().collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let working = self.lock().clone();
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.state),
            commit_budget: Arc::clone(&self.commit_budget),
            working,
            ops: Vec::new(),
        }))
    }
}

/// Transaction over an [`InMemoryStore`].
pub struct InMemoryTransaction {
    shared: Arc<Mutex<MemoryState>>,
    commit_budget: CommitBudget,
    working: MemoryState,
    ops: Vec<Op>,
}

impl InMemoryTransaction {
    fn stage(&mut self, op: Op) -> Result<i64> {
        let result = apply(&mut self.working, &op)?;
        self.ops.push(op);
        Ok(result)
    }

    fn stage_count(&mut self, op: Op) -> Result<u64> {
        self.stage(op).map(|n| n as u64)
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn set_ccpair_status(
        &mut self,
        id: CcPairId,
        expected: CcPairStatus,
        status: CcPairStatus,
    ) -> Result<()> {
        self.stage(Op::SetStatus {
            id,
            expected,
            status,
        })
        .map(|_| ())
    }

    async fn cancel_index_attempts(
        &mut self,
        cc_pair_id: CcPairId,
        include_secondary: bool,
    ) -> Result<u64> {
        self.stage_count(Op::CancelAttempts(cc_pair_id, include_secondary))
    }

    async fn delete_documents(&mut self, ids: &[String]) -> Result<u64> {
        self.stage_count(Op::DeleteDocuments(ids.to_vec()))
    }

    async fn delete_orphan_tags(&mut self) -> Result<u64> {
        self.stage_count(Op::DeleteOrphanTags)
    }

    async fn delete_index_attempts(&mut self, cc_pair_id: CcPairId) -> Result<u64> {
        self.stage_count(Op::DeleteIndexAttempts(cc_pair_id))
    }

    async fn delete_document_set_links(&mut self, cc_pair_id: CcPairId) -> Result<u64> {
        self.stage_count(Op::DeleteDocumentSetLinks(cc_pair_id))
    }

    async fn delete_user_group_links(&mut self, cc_pair_id: CcPairId) -> Result<u64> {
        self.stage_count(Op::DeleteUserGroupLinks(cc_pair_id))
    }

    async fn delete_ccpair(
        &mut self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
    ) -> Result<u64> {
        self.stage_count(Op::DeleteCcPair(connector_id, credential_id))
    }

    async fn delete_connector_if_unused(&mut self, connector_id: ConnectorId) -> Result<bool> {
        self.stage(Op::DeleteConnectorIfUnused(connector_id))
            .map(|n| n > 0)
    }

    async fn upsert_capability(&mut self, record: &CapabilityRecord) -> Result<()> {
        self.stage(Op::UpsertCapability(record.clone())).map(|_| ())
    }

    async fn delete_capability(&mut self, in_code_id: &str) -> Result<()> {
        self.stage(Op::DeleteCapability(in_code_id.to_string()))
            .map(|_| ())
    }

    async fn insert_connector(&mut self, connector: &Connector) -> Result<()> {
        self.stage(Op::InsertConnector(connector.clone())).map(|_| ())
    }

    async fn insert_credential(&mut self, credential: &Credential) -> Result<()> {
        self.stage(Op::InsertCredential(credential.clone()))
            .map(|_| ())
    }

    async fn insert_ccpair(&mut self, ccp: &ConnectorCredentialPair) -> Result<()> {
        self.stage(Op::InsertCcPair(ccp.clone())).map(|_| ())
    }

    async fn upsert_document(&mut self, doc: &Document) -> Result<()> {
        self.stage(Op::UpsertDocument(doc.clone())).map(|_| ())
    }

    async fn tag_document(
        &mut self,
        document_id: &str,
        key: &str,
        value: &str,
        source: DocumentSource,
    ) -> Result<i64> {
        self.stage(Op::TagDocument {
            document_id: document_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            source,
        })
    }

    async fn insert_index_attempt(&mut self, attempt: &IndexAttempt) -> Result<()> {
        self.stage(Op::InsertIndexAttempt(attempt.clone()))
            .map(|_| ())
    }

    async fn link_document_set(
        &mut self,
        document_set_id: i64,
        cc_pair_id: CcPairId,
    ) -> Result<()> {
        self.stage(Op::LinkDocumentSet(document_set_id, cc_pair_id))
            .map(|_| ())
    }

    async fn link_user_group(&mut self, user_group_id: i64, cc_pair_id: CcPairId) -> Result<()> {
        self.stage(Op::LinkUserGroup(user_group_id, cc_pair_id))
            .map(|_| ())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        {
            let mut budget = self
                .commit_budget
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match budget.as_mut() {
                Some(0) => return Err(LifecycleError::store("injected commit failure")),
                Some(left) => *left -= 1,
                None => {}
            }
        }
        let mut live = self
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = live.clone();
        for op in &self.ops {
            apply(&mut next, op)?;
        }
        *live = next;
        Ok(())
    }
}
