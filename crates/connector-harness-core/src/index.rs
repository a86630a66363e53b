//! Document index port.
//!
//! The search engine keeps each document as `chunk_count` chunks. A delete
//! must name the document, the tenant, and the chunk count so every chunk
//! is purged. Deleting an id that is already absent is not an error.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{LifecycleError, Result};

/// Abstract search/index engine.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Remove every chunk of `doc_id` for `tenant_id`. Must be idempotent.
    async fn delete_single(&self, doc_id: &str, tenant_id: &str, chunk_count: u32) -> Result<()>;
}

/// One recorded [`DocumentIndex::delete_single`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCall {
    pub doc_id: String,
    pub tenant_id: String,
    pub chunk_count: u32,
}

#[derive(Default)]
struct IndexState {
    chunks: BTreeMap<(String, String), u32>,
    calls: Vec<DeleteCall>,
    fail_ids: HashSet<String>,
    fail_after: Option<usize>,
}

/// In-memory index that records every delete and can be told to fail.
#[derive(Default)]
pub struct InMemoryDocumentIndex {
    state: Mutex<IndexState>,
}

impl InMemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, doc_id: &str, tenant_id: &str, chunk_count: u32) {
        self.lock()
            .chunks
            .insert((tenant_id.to_string(), doc_id.to_string()), chunk_count);
    }

    pub fn contains(&self, doc_id: &str, tenant_id: &str) -> bool {
        self.lock()
            .chunks
            .contains_key(&(tenant_id.to_string(), doc_id.to_string()))
    }

    /// Total chunks still held across all tenants.
    pub fn chunk_total(&self) -> u64 {
        self.lock().chunks.values().map(|c| *c as u64).sum()
    }

    pub fn calls(&self) -> Vec<DeleteCall> {
        self.lock().calls.clone()
    }

    /// Reject deletes of `doc_id` until [`heal`](Self::heal) is called.
    pub fn fail_on(&self, doc_id: &str) {
        self.lock().fail_ids.insert(doc_id.to_string());
    }

    /// Accept `n` more deletes, then reject every following one.
    pub fn fail_after(&self, n: usize) {
        let mut state = self.lock();
        let already = state.calls.len();
        state.fail_after = Some(already + n);
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.fail_ids.clear();
        state.fail_after = None;
    }
}

#[async_trait]
impl DocumentIndex for InMemoryDocumentIndex {
    async fn delete_single(&self, doc_id: &str, tenant_id: &str, chunk_count: u32) -> Result<()> {
        let mut state = self.lock();
        let over_budget = state
            .fail_after
            .map_or(false, |limit| state.calls.len() >= limit);
        if over_budget || state.fail_ids.contains(doc_id) {
            return Err(LifecycleError::index(doc_id, "index engine rejected delete"));
        }
        state.calls.push(DeleteCall {
            doc_id: doc_id.to_string(),
            tenant_id: tenant_id.to_string(),
            chunk_count,
        });
        state
            .chunks
            .remove(&(tenant_id.to_string(), doc_id.to_string()));
        Ok(())
    }
}
