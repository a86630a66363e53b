//! Storage abstraction for the relational metadata store.
//!
//! [`DocumentStore`] covers reads and opens transactions; every write goes
//! through a [`StoreTransaction`], whose effects become visible only on
//! [`commit`](StoreTransaction::commit). Dropping a transaction without
//! committing discards it. The deletion orchestrator relies on this to
//! scope each batch to one local transaction.
//!
//! Implementations must be `Send + Sync` to work with async runtimes and
//! must enforce referential integrity: a pair row cannot be removed while
//! documents, index attempts, or document-set / user-group links still
//! reference it, and a connector cannot be removed while pairs reference it.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get_ccpair`](DocumentStore::get_ccpair) | Pair by id |
//! | [`get_ccpair_by_ids`](DocumentStore::get_ccpair_by_ids) | Pair by (connector, credential) |
//! | [`list_documents`](DocumentStore::list_documents) | Next batch of documents owned by a pair |
//! | [`delete_documents`](StoreTransaction::delete_documents) | Remove documents and their tag links |
//! | [`delete_orphan_tags`](StoreTransaction::delete_orphan_tags) | Garbage-collect unreferenced tags |
//! | [`set_ccpair_status`](StoreTransaction::set_ccpair_status) | Compare-and-set a pair's lifecycle status |
//! | [`cancel_index_attempts`](StoreTransaction::cancel_index_attempts) | Stop in-flight ingestion |

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    CapabilityRecord, CcPairId, CcPairStatus, Connector, ConnectorCredentialPair, ConnectorId,
    Credential, CredentialId, Document, DocumentSource, IndexAttempt, Tag,
};

/// Read side of the metadata store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_ccpair(&self, id: CcPairId) -> Result<Option<ConnectorCredentialPair>>;

    async fn get_ccpair_by_ids(
        &self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
    ) -> Result<Option<ConnectorCredentialPair>>;

    async fn list_ccpairs(&self) -> Result<Vec<ConnectorCredentialPair>>;

    async fn get_connector(&self, id: ConnectorId) -> Result<Option<Connector>>;

    /// Up to `limit` documents owned by the pair, in stable id order.
    async fn list_documents(
        &self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
        limit: usize,
    ) -> Result<Vec<Document>>;

    async fn list_tags(&self) -> Result<Vec<Tag>>;

    async fn list_index_attempts(&self, cc_pair_id: CcPairId) -> Result<Vec<IndexAttempt>>;

    async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>>;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A unit of work against the metadata store.
///
/// Counts returned by delete methods are the number of rows removed.
#[async_trait]
pub trait StoreTransaction: Send {
    // ── lifecycle ────────────────────────────────────────────────────

    /// Move the pair from `expected` to `status`.
    ///
    /// Fails with [`LifecycleError::Precondition`] when the stored status is
    /// no longer `expected`, so a concurrent transition is never overwritten.
    ///
    /// [`LifecycleError::Precondition`]: crate::error::LifecycleError::Precondition
    async fn set_ccpair_status(
        &mut self,
        id: CcPairId,
        expected: CcPairStatus,
        status: CcPairStatus,
    ) -> Result<()>;

    /// Flip not-started and in-progress attempts to canceled.
    ///
    /// Attempts against the secondary index generation are only touched
    /// when `include_secondary` is set. Returns the number canceled.
    async fn cancel_index_attempts(
        &mut self,
        cc_pair_id: CcPairId,
        include_secondary: bool,
    ) -> Result<u64>;

    // ── deletion ─────────────────────────────────────────────────────

    async fn delete_documents(&mut self, ids: &[String]) -> Result<u64>;

    async fn delete_orphan_tags(&mut self) -> Result<u64>;

    async fn delete_index_attempts(&mut self, cc_pair_id: CcPairId) -> Result<u64>;

    async fn delete_document_set_links(&mut self, cc_pair_id: CcPairId) -> Result<u64>;

    async fn delete_user_group_links(&mut self, cc_pair_id: CcPairId) -> Result<u64>;

    /// Push pending writes so constraint checks see them.
    ///
    /// Backends that execute statements eagerly inside the transaction
    /// have nothing to do here.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn delete_ccpair(
        &mut self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
    ) -> Result<u64>;

    /// Delete the connector if no pair references it any more, judged
    /// against the state this transaction commits into. Returns whether
    /// the row was removed as seen from inside the transaction.
    async fn delete_connector_if_unused(&mut self, connector_id: ConnectorId) -> Result<bool>;

    // ── capabilities ─────────────────────────────────────────────────

    async fn upsert_capability(&mut self, record: &CapabilityRecord) -> Result<()>;

    async fn delete_capability(&mut self, in_code_id: &str) -> Result<()>;

    // ── provisioning (driven by ingestion and admin APIs) ────────────

    async fn insert_connector(&mut self, connector: &Connector) -> Result<()>;

    async fn insert_credential(&mut self, credential: &Credential) -> Result<()>;

    async fn insert_ccpair(&mut self, ccp: &ConnectorCredentialPair) -> Result<()>;

    async fn upsert_document(&mut self, doc: &Document) -> Result<()>;

    /// Attach a tag to a document, creating the tag if needed. Returns the tag id.
    async fn tag_document(
        &mut self,
        document_id: &str,
        key: &str,
        value: &str,
        source: DocumentSource,
    ) -> Result<i64>;

    async fn insert_index_attempt(&mut self, attempt: &IndexAttempt) -> Result<()>;

    async fn link_document_set(&mut self, document_set_id: i64, cc_pair_id: CcPairId)
        -> Result<()>;

    async fn link_user_group(&mut self, user_group_id: i64, cc_pair_id: CcPairId) -> Result<()>;

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<()>;
}
