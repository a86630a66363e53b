//! Crash-resumable bulk deletion of a connector-credential pair.
//!
//! # Algorithm
//!
//! 1. Load the pair and refuse to run while it is `ACTIVE`.
//! 2. In one transaction, mark the pair `DELETING` and cancel every
//!    in-flight index attempt (secondary generation included). The status
//!    write only applies if the pair still has the status read in step 1,
//!    so a concurrent resume makes the run fail instead of deleting an
//!    active pair. This commits before any document is touched so a
//!    running ingestion cannot re-create documents behind the loop.
//! 3. Fetch up to `batch_size` documents owned by the pair. Stop when none
//!    are left.
//! 4. Delete every document of the batch from the index. Any failure
//!    aborts the run before the store is touched for this batch.
//! 5. In one store transaction, delete the batch's documents and every tag
//!    left without documents, then commit.
//! 6. Go back to 3. Deleted rows no longer match, so the query advances.
//! 7. In a final transaction remove index attempts, document-set and
//!    user-group links, the pair row, and the connector if it has no
//!    credentials left.
//! 8. After that commit, delete blobs owned by file connectors. Failures
//!    here are logged and reported but never undo the metadata deletion.
//!
//! A crash anywhere leaves committed batches gone from both the index and
//! the store, and the current batch untouched in the store. Running the
//! operation again picks up where the last run stopped.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{LifecycleError, Result};
use crate::file_store::FileStore;
use crate::index::DocumentIndex;
use crate::lifecycle;
use crate::models::{CcPairId, CcPairStatus, ConnectorCredentialPair};
use crate::store::DocumentStore;

/// Documents fetched, index-deleted, and committed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Outcome of a completed deletion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub documents_deleted: u64,
    pub files_deleted: u64,
    /// Blob ids that could not be removed; the metadata is gone regardless.
    pub failed_files: Vec<String>,
}

/// Coordinates the metadata store, the document index, and the blob store
/// to remove a pair and everything it owns.
pub struct DeletionOrchestrator {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn DocumentIndex>,
    files: Arc<dyn FileStore>,
    tenant_id: String,
    batch_size: usize,
}

impl DeletionOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn DocumentIndex>,
        files: Arc<dyn FileStore>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index,
            files,
            tenant_id: tenant_id.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the batch size. Values below one are clamped to one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Delete the pair, its documents, its associations, and (when it was
    /// the last credential) its connector.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`] if the pair or its connector is missing.
    /// - [`LifecycleError::Precondition`] if the pair is `ACTIVE`, or its status
    ///   changed after it was read. Nothing is written.
    /// - [`LifecycleError::IndexDeletion`] / [`LifecycleError::StoreTransaction`]
    ///   if a batch fails. Earlier batches stay deleted; call again to resume.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id, batch_size = self.batch_size))]
    pub async fn delete_connector_credential_pair(
        &self,
        cc_pair_id: CcPairId,
    ) -> Result<DeletionReport> {
        let ccp = self
            .store
            .get_ccpair(cc_pair_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("connector credential pair", cc_pair_id))?;
        lifecycle::assert_deletable(&ccp)?;

        let connector = self
            .store
            .get_connector(ccp.connector_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("connector", ccp.connector_id))?;
        // Read before the connector row can disappear in the final transaction.
        let file_ids = connector.file_locations();

        self.begin_deletion(&ccp).await?;

        let documents_deleted = match self.delete_documents_in_batches(&ccp).await {
            Ok(n) => n,
            Err(e) => {
                error!(
                    cc_pair_id,
                    error = %e,
                    "deletion run aborted; already committed batches stay deleted"
                );
                return Err(e);
            }
        };

        let connector_removed = self.remove_pair_rows(&ccp).await?;
        info!(
            cc_pair_id,
            connector_id = ccp.connector_id,
            credential_id = ccp.credential_id,
            documents_deleted,
            connector_removed,
            "connector credential pair deleted"
        );

        let (files_deleted, failed_files) = self.delete_files(&file_ids).await;

        Ok(DeletionReport {
            documents_deleted,
            files_deleted,
            failed_files,
        })
    }

    async fn begin_deletion(&self, ccp: &ConnectorCredentialPair) -> Result<()> {
        let status = lifecycle::transition(ccp.status, CcPairStatus::Deleting)?;
        let mut tx = self.store.begin().await?;
        tx.set_ccpair_status(ccp.id, ccp.status, status).await?;
        let canceled = tx.cancel_index_attempts(ccp.id, true).await?;
        tx.commit().await?;
        info!(cc_pair_id = ccp.id, canceled, "marked DELETING and canceled index attempts");
        Ok(())
    }

    async fn delete_documents_in_batches(&self, ccp: &ConnectorCredentialPair) -> Result<u64> {
        let mut total = 0u64;
        let mut batch_no = 0u64;

        loop {
            let batch = self
                .store
                .list_documents(ccp.connector_id, ccp.credential_id, self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            batch_no += 1;

            for doc in &batch {
                self.index
                    .delete_single(&doc.id, &self.tenant_id, doc.chunk_count)
                    .await?;
            }

            let ids: Vec<String> = batch.iter().map(|d| d.id.clone()).collect();
            let mut tx = self.store.begin().await?;
            let removed = tx.delete_documents(&ids).await?;
            let orphan_tags = tx.delete_orphan_tags().await?;
            tx.commit().await?;

            if removed == 0 {
                return Err(LifecycleError::store(format!(
                    "batch {} listed {} documents but removed none",
                    batch_no,
                    ids.len()
                )));
            }
            total += removed;
            info!(
                cc_pair_id = ccp.id,
                batch = batch_no,
                documents = removed,
                orphan_tags,
                total,
                "committed deletion batch"
            );
        }

        Ok(total)
    }

    /// Returns whether the connector row was removed as well.
    async fn remove_pair_rows(&self, ccp: &ConnectorCredentialPair) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let attempts = tx.delete_index_attempts(ccp.id).await?;
        let sets = tx.delete_document_set_links(ccp.id).await?;
        let groups = tx.delete_user_group_links(ccp.id).await?;
        tx.flush().await?;
        tx.delete_ccpair(ccp.connector_id, ccp.credential_id)
            .await?;

        let connector_removed = tx.delete_connector_if_unused(ccp.connector_id).await?;
        tx.commit().await?;
        if connector_removed {
            debug!(
                connector_id = ccp.connector_id,
                "no credentials left for connector, deleted connector"
            );
        }

        debug!(
            cc_pair_id = ccp.id,
            attempts, sets, groups, "removed pair associations"
        );
        Ok(connector_removed)
    }

    async fn delete_files(&self, file_ids: &[String]) -> (u64, Vec<String>) {
        let mut deleted = 0u64;
        let mut failed = Vec::new();
        for file_id in file_ids {
            match self.files.delete_file(file_id).await {
                Ok(()) => {
                    deleted += 1;
                    info!(file_id = %file_id, "deleted stored file");
                }
                Err(e) => {
                    warn!(file_id = %file_id, error = %e, "failed to delete stored file");
                    failed.push(file_id.clone());
                }
            }
        }
        (deleted, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::InMemoryFileStore;
    use crate::index::InMemoryDocumentIndex;
    use crate::models::{
        CapabilityRecord, Connector, ConnectorId, Credential, CredentialId, Document,
        DocumentSource, IndexAttempt, IndexAttemptStatus, Tag,
    };
    use crate::store::memory::InMemoryStore;
    use crate::store::StoreTransaction;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    const TENANT: &str = "tenant-a";

    struct Fixture {
        store: Arc<InMemoryStore>,
        index: Arc<InMemoryDocumentIndex>,
        files: Arc<InMemoryFileStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryStore::new()),
                index: Arc::new(InMemoryDocumentIndex::new()),
                files: Arc::new(InMemoryFileStore::new()),
            }
        }

        fn orchestrator(&self, batch_size: usize) -> DeletionOrchestrator {
            DeletionOrchestrator::new(
                self.store.clone(),
                self.index.clone(),
                self.files.clone(),
                TENANT,
            )
            .with_batch_size(batch_size)
        }

        async fn connector(&self, id: i64, source: DocumentSource, config: serde_json::Value) {
            let mut tx = self.store.begin().await.unwrap();
            tx.insert_connector(&Connector {
                id,
                name: format!("connector-{id}"),
                source,
                config: config.as_object().cloned().unwrap_or_default(),
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        async fn pair(&self, id: i64, connector_id: i64, credential_id: i64, status: CcPairStatus) {
            let mut tx = self.store.begin().await.unwrap();
            tx.insert_credential(&Credential {
                id: credential_id,
                name: format!("cred-{credential_id}"),
            })
            .await
            .unwrap();
            tx.insert_ccpair(&ConnectorCredentialPair {
                id,
                connector_id,
                credential_id,
                name: format!("pair-{id}"),
                status,
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        async fn documents(&self, connector_id: i64, credential_id: i64, n: usize) {
            let mut tx = self.store.begin().await.unwrap();
            for i in 0..n {
                let id = format!("doc-{connector_id}-{credential_id}-{i:05}");
                tx.upsert_document(&Document {
                    id: id.clone(),
                    connector_id,
                    credential_id,
                    semantic_id: id.clone(),
                    chunk_count: 3,
                })
                .await
                .unwrap();
                self.index.insert(&id, TENANT, 3);
            }
            tx.commit().await.unwrap();
        }

        async fn remaining(&self, connector_id: i64, credential_id: i64) -> usize {
            self.store
                .list_documents(connector_id, credential_id, usize::MAX)
                .await
                .unwrap()
                .len()
        }
    }

    #[tokio::test]
    async fn test_active_pair_is_rejected_untouched() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Slack, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Active).await;
        fx.documents(1, 10, 5).await;

        let err = fx
            .orchestrator(2)
            .delete_connector_credential_pair(7)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Precondition(_)));
        assert_eq!(fx.remaining(1, 10).await, 5);
        assert!(fx.index.calls().is_empty());
        let ccp = fx.store.get_ccpair(7).await.unwrap().unwrap();
        assert_eq!(ccp.status, CcPairStatus::Active);
    }

    /// Hands out the pair as it was read, after a resume to `ACTIVE` has
    /// already committed underneath.
    struct ResumedAfterRead {
        inner: Arc<InMemoryStore>,
    }

    #[async_trait]
    impl DocumentStore for ResumedAfterRead {
        async fn get_ccpair(&self, id: CcPairId) -> Result<Option<ConnectorCredentialPair>> {
            let read = self.inner.get_ccpair(id).await?;
            if let Some(ccp) = &read {
                let mut tx = self.inner.begin().await?;
                tx.set_ccpair_status(id, ccp.status, CcPairStatus::Active)
                    .await?;
                tx.commit().await?;
            }
            Ok(read)
        }

        async fn get_ccpair_by_ids(
            &self,
            connector_id: ConnectorId,
            credential_id: CredentialId,
        ) -> Result<Option<ConnectorCredentialPair>> {
            self.inner.get_ccpair_by_ids(connector_id, credential_id).await
        }

        async fn list_ccpairs(&self) -> Result<Vec<ConnectorCredentialPair>> {
            self.inner.list_ccpairs().await
        }

        async fn get_connector(&self, id: ConnectorId) -> Result<Option<Connector>> {
            self.inner.get_connector(id).await
        }

        async fn list_documents(
            &self,
            connector_id: ConnectorId,
            credential_id: CredentialId,
            limit: usize,
        ) -> Result<Vec<Document>> {
            self.inner.list_documents(connector_id, credential_id, limit).await
        }

        async fn list_tags(&self) -> Result<Vec<Tag>> {
            self.inner.list_tags().await
        }

        async fn list_index_attempts(&self, cc_pair_id: CcPairId) -> Result<Vec<IndexAttempt>> {
            self.inner.list_index_attempts(cc_pair_id).await
        }

        async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>> {
            self.inner.list_capabilities().await
        }

        async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
            self.inner.begin().await
        }
    }

    #[tokio::test]
    async fn test_resume_between_read_and_mark_aborts_run() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Confluence, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.documents(1, 10, 3).await;

        let orchestrator = DeletionOrchestrator::new(
            Arc::new(ResumedAfterRead {
                inner: fx.store.clone(),
            }),
            fx.index.clone(),
            fx.files.clone(),
            TENANT,
        );
        let err = orchestrator
            .delete_connector_credential_pair(7)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Precondition(_)));
        assert!(!err.is_retryable());
        let ccp = fx.store.get_ccpair(7).await.unwrap().unwrap();
        assert_eq!(ccp.status, CcPairStatus::Active);
        assert_eq!(fx.remaining(1, 10).await, 3);
        assert!(fx.index.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_pair_is_not_found() {
        let fx = Fixture::new();
        let err = fx
            .orchestrator(10)
            .delete_connector_credential_pair(404)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_confluence_pair_with_2500_documents() {
        let fx = Fixture::new();
        fx.connector(3, DocumentSource::Confluence, json!({})).await;
        fx.pair(42, 3, 30, CcPairStatus::Paused).await;
        fx.documents(3, 30, 2500).await;

        let report = fx
            .orchestrator(1000)
            .delete_connector_credential_pair(42)
            .await
            .unwrap();

        assert_eq!(
            report,
            DeletionReport {
                documents_deleted: 2500,
                files_deleted: 0,
                failed_files: vec![],
            }
        );
        assert_eq!(fx.remaining(3, 30).await, 0);
        let calls = fx.index.calls();
        assert_eq!(calls.len(), 2500);
        let unique: HashSet<&str> = calls.iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(unique.len(), 2500);
        assert!(calls.iter().all(|c| c.tenant_id == TENANT && c.chunk_count == 3));
        assert_eq!(fx.index.chunk_total(), 0);
        assert!(fx.store.get_ccpair(42).await.unwrap().is_none());
        assert!(fx.store.get_connector(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_failure_leaves_batch_in_store() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Jira, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.documents(1, 10, 4).await;
        fx.index.fail_on("doc-1-10-00002");

        let err = fx
            .orchestrator(10)
            .delete_connector_credential_pair(7)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::IndexDeletion { .. }));
        assert!(err.is_retryable());
        assert_eq!(fx.remaining(1, 10).await, 4);
        let ccp = fx.store.get_ccpair(7).await.unwrap().unwrap();
        assert_eq!(ccp.status, CcPairStatus::Deleting);
    }

    #[tokio::test]
    async fn test_interrupted_run_resumes_to_same_end_state() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Github, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.documents(1, 10, 25).await;

        // Two full batches of 10 succeed, the third fails half way through.
        fx.index.fail_after(25 - 2);
        let orchestrator = fx.orchestrator(10);
        orchestrator
            .delete_connector_credential_pair(7)
            .await
            .unwrap_err();
        assert_eq!(fx.remaining(1, 10).await, 5);

        fx.index.heal();
        let report = orchestrator.delete_connector_credential_pair(7).await.unwrap();
        assert_eq!(report.documents_deleted, 5);
        assert_eq!(fx.remaining(1, 10).await, 0);

        let deleted: HashSet<String> = fx.index.calls().into_iter().map(|c| c.doc_id).collect();
        assert_eq!(deleted.len(), 25);
        assert_eq!(fx.index.chunk_total(), 0);
        assert!(fx.store.get_ccpair(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_batch_and_resumes() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Github, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.documents(1, 10, 25).await;

        // The DELETING mark and the first batch commit, the second batch does not.
        fx.store.fail_commits_after(2);
        let orchestrator = fx.orchestrator(10);
        let err = orchestrator
            .delete_connector_credential_pair(7)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::StoreTransaction { .. }));
        assert!(err.is_retryable());
        assert_eq!(fx.remaining(1, 10).await, 15);
        let ccp = fx.store.get_ccpair(7).await.unwrap().unwrap();
        assert_eq!(ccp.status, CcPairStatus::Deleting);

        fx.store.heal();
        let report = orchestrator.delete_connector_credential_pair(7).await.unwrap();
        assert_eq!(report.documents_deleted, 15);
        assert_eq!(fx.remaining(1, 10).await, 0);
        assert_eq!(fx.index.chunk_total(), 0);
        assert!(fx.store.get_ccpair(7).await.unwrap().is_none());
        assert!(fx.store.get_connector(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphan_tags_are_collected() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Confluence, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.pair(8, 1, 11, CcPairStatus::Active).await;
        fx.documents(1, 10, 2).await;
        fx.documents(1, 11, 1).await;

        let mut tx = fx.store.begin().await.unwrap();
        tx.tag_document("doc-1-10-00000", "space", "ENG", DocumentSource::Confluence)
            .await
            .unwrap();
        tx.tag_document("doc-1-10-00001", "label", "draft", DocumentSource::Confluence)
            .await
            .unwrap();
        tx.tag_document("doc-1-11-00000", "space", "ENG", DocumentSource::Confluence)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        fx.orchestrator(1).delete_connector_credential_pair(7).await.unwrap();

        let tags = fx.store.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1, "shared tag survives, draft label is collected");
        assert_eq!(tags[0].value, "ENG");
    }

    #[tokio::test]
    async fn test_connector_kept_while_other_credentials_remain() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::GoogleDrive, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.pair(8, 1, 11, CcPairStatus::Paused).await;
        fx.documents(1, 10, 3).await;
        fx.documents(1, 11, 2).await;

        fx.orchestrator(2).delete_connector_credential_pair(7).await.unwrap();
        assert!(fx.store.get_connector(1).await.unwrap().is_some());
        assert_eq!(fx.remaining(1, 11).await, 2, "other pair's documents untouched");

        fx.orchestrator(2).delete_connector_credential_pair(8).await.unwrap();
        assert!(fx.store.get_connector(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_associations_and_attempts_removed() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Teams, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        let mut tx = fx.store.begin().await.unwrap();
        tx.link_document_set(1, 7).await.unwrap();
        tx.link_user_group(2, 7).await.unwrap();
        tx.insert_index_attempt(&IndexAttempt {
            id: 1,
            cc_pair_id: 7,
            status: IndexAttemptStatus::Success,
            secondary: false,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let report = fx.orchestrator(5).delete_connector_credential_pair(7).await.unwrap();
        assert_eq!(report.documents_deleted, 0);
        assert_eq!(fx.store.link_count(7), 0);
        assert!(fx.store.list_index_attempts(7).await.unwrap().is_empty());
        assert!(fx.store.get_ccpair(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_flight_attempts_canceled_before_documents() {
        let fx = Fixture::new();
        fx.connector(1, DocumentSource::Slack, json!({})).await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.documents(1, 10, 1).await;
        let mut tx = fx.store.begin().await.unwrap();
        for (id, status, secondary) in [
            (1, IndexAttemptStatus::InProgress, false),
            (2, IndexAttemptStatus::NotStarted, true),
            (3, IndexAttemptStatus::Failed, false),
        ] {
            tx.insert_index_attempt(&IndexAttempt {
                id,
                cc_pair_id: 7,
                status,
                secondary,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();
        fx.index.fail_on("doc-1-10-00000");

        fx.orchestrator(5)
            .delete_connector_credential_pair(7)
            .await
            .unwrap_err();

        let attempts = fx.store.list_index_attempts(7).await.unwrap();
        let statuses: Vec<IndexAttemptStatus> = attempts.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![
                IndexAttemptStatus::Canceled,
                IndexAttemptStatus::Canceled,
                IndexAttemptStatus::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_blob_failure_is_reported_not_fatal() {
        let fx = Fixture::new();
        fx.connector(
            1,
            DocumentSource::File,
            json!({ "file_locations": ["f-1", "f-missing", "f-2"] }),
        )
        .await;
        fx.pair(7, 1, 10, CcPairStatus::Paused).await;
        fx.documents(1, 10, 2).await;
        fx.files.put("f-1", b"one");
        fx.files.put("f-2", b"two");

        let report = fx.orchestrator(5).delete_connector_credential_pair(7).await.unwrap();

        assert_eq!(report.documents_deleted, 2);
        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.failed_files, vec!["f-missing".to_string()]);
        assert!(fx.files.is_empty());
        assert!(fx.store.get_ccpair(7).await.unwrap().is_none());
    }
}
