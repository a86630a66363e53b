//! `cch ccpair`: list pairs and move them between ACTIVE and PAUSED.

use anyhow::Result;
use tracing::info;

use connector_harness_core::lifecycle;
use connector_harness_core::models::{CcPairId, CcPairStatus};
use connector_harness_core::store::DocumentStore;
use connector_harness_core::LifecycleError;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Apply a validated status change. Returns the previous status.
///
/// The write only lands if the pair still has the status that was
/// validated, so a deletion that started in between is never undone.
pub async fn set_status(
    store: &dyn DocumentStore,
    cc_pair_id: CcPairId,
    to: CcPairStatus,
) -> Result<CcPairStatus> {
    let ccp = store
        .get_ccpair(cc_pair_id)
        .await?
        .ok_or_else(|| LifecycleError::not_found("connector credential pair", cc_pair_id))?;
    let next = lifecycle::transition(ccp.status, to)?;

    let mut tx = store.begin().await?;
    tx.set_ccpair_status(cc_pair_id, ccp.status, next).await?;
    tx.commit().await?;

    info!(cc_pair_id, from = %ccp.status, to = %next, "connector credential pair status changed");
    Ok(ccp.status)
}

pub async fn run_set_status(config: &Config, cc_pair_id: CcPairId, to: CcPairStatus) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let from = set_status(&store, cc_pair_id, to).await?;
    println!("connector credential pair {}: {} -> {}", cc_pair_id, from, to);
    pool.close().await;
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let pairs = store.ccpair_summaries().await?;

    if pairs.is_empty() {
        println!("No connector credential pairs.");
    } else {
        println!(
            "{:<6} {:<24} {:<14} {:<10} {:>9}",
            "ID", "NAME", "SOURCE", "STATUS", "DOCUMENTS"
        );
        println!("{}", "-".repeat(67));
        for p in &pairs {
            println!(
                "{:<6} {:<24} {:<14} {:<10} {:>9}",
                p.ccp.id, p.ccp.name, p.source, p.ccp.status, p.document_count
            );
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connector_harness_core::models::{
        CapabilityRecord, Connector, ConnectorCredentialPair, ConnectorId, Credential,
        CredentialId, Document, DocumentSource, IndexAttempt, Tag,
    };
    use connector_harness_core::store::memory::InMemoryStore;
    use connector_harness_core::store::StoreTransaction;

    /// Returns the pair as read, after a deletion has marked it DELETING.
    struct DeletionStartsAfterRead {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl DocumentStore for DeletionStartsAfterRead {
        async fn get_ccpair(
            &self,
            id: CcPairId,
        ) -> connector_harness_core::Result<Option<ConnectorCredentialPair>> {
            let read = self.inner.get_ccpair(id).await?;
            if let Some(ccp) = &read {
                let mut tx = self.inner.begin().await?;
                tx.set_ccpair_status(id, ccp.status, CcPairStatus::Deleting)
                    .await?;
                tx.commit().await?;
            }
            Ok(read)
        }

        async fn get_ccpair_by_ids(
            &self,
            connector_id: ConnectorId,
            credential_id: CredentialId,
        ) -> connector_harness_core::Result<Option<ConnectorCredentialPair>> {
            self.inner.get_ccpair_by_ids(connector_id, credential_id).await
        }

        async fn list_ccpairs(&self) -> connector_harness_core::Result<Vec<ConnectorCredentialPair>> {
            self.inner.list_ccpairs().await
        }

        async fn get_connector(
            &self,
            id: ConnectorId,
        ) -> connector_harness_core::Result<Option<Connector>> {
            self.inner.get_connector(id).await
        }

        async fn list_documents(
            &self,
            connector_id: ConnectorId,
            credential_id: CredentialId,
            limit: usize,
        ) -> connector_harness_core::Result<Vec<Document>> {
            self.inner.list_documents(connector_id, credential_id, limit).await
        }

        async fn list_tags(&self) -> connector_harness_core::Result<Vec<Tag>> {
            self.inner.list_tags().await
        }

        async fn list_index_attempts(
            &self,
            cc_pair_id: CcPairId,
        ) -> connector_harness_core::Result<Vec<IndexAttempt>> {
            self.inner.list_index_attempts(cc_pair_id).await
        }

        async fn list_capabilities(&self) -> connector_harness_core::Result<Vec<CapabilityRecord>> {
            self.inner.list_capabilities().await
        }

        async fn begin(&self) -> connector_harness_core::Result<Box<dyn StoreTransaction>> {
            self.inner.begin().await
        }
    }

    async fn store_with(status: CcPairStatus) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_connector(&Connector {
            id: 1,
            name: "tracker".into(),
            source: DocumentSource::Jira,
            config: Default::default(),
        })
        .await
        .unwrap();
        tx.insert_credential(&Credential {
            id: 2,
            name: "svc".into(),
        })
        .await
        .unwrap();
        tx.insert_ccpair(&ConnectorCredentialPair {
            id: 3,
            connector_id: 1,
            credential_id: 2,
            name: "tracker/svc".into(),
            status,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let store = store_with(CcPairStatus::Active).await;
        assert_eq!(
            set_status(&store, 3, CcPairStatus::Paused).await.unwrap(),
            CcPairStatus::Active
        );
        assert_eq!(
            store.get_ccpair(3).await.unwrap().unwrap().status,
            CcPairStatus::Paused
        );
        set_status(&store, 3, CcPairStatus::Active).await.unwrap();
        assert_eq!(
            store.get_ccpair(3).await.unwrap().unwrap().status,
            CcPairStatus::Active
        );
    }

    #[tokio::test]
    async fn test_deleting_pair_cannot_resume() {
        let store = store_with(CcPairStatus::Deleting).await;
        let err = set_status(&store, 3, CcPairStatus::Active).await.unwrap_err();
        assert!(err.to_string().contains("irreversible"));
    }

    #[tokio::test]
    async fn test_resume_never_undoes_started_deletion() {
        let inner = store_with(CcPairStatus::Paused).await;
        let racing = DeletionStartsAfterRead {
            inner: inner.clone(),
        };

        let err = set_status(&racing, 3, CcPairStatus::Active).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::Precondition(_))
        ));
        assert_eq!(
            inner.get_ccpair(3).await.unwrap().unwrap().status,
            CcPairStatus::Deleting
        );
    }

    #[tokio::test]
    async fn test_missing_pair() {
        let store = store_with(CcPairStatus::Paused).await;
        assert!(set_status(&store, 99, CcPairStatus::Active).await.is_err());
    }
}
