//! SQLite implementation of the metadata store ports.
//!
//! Reads go straight to the pool. [`SqliteStore::begin`] opens a real
//! SQLite transaction; statements execute eagerly inside it, so foreign-key
//! violations surface on the offending statement and a dropped transaction
//! rolls back. Every sqlx error is mapped to
//! [`LifecycleError::StoreTransaction`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{Row, Transaction};

use connector_harness_core::error::{LifecycleError, Result};
use connector_harness_core::models::{
    CapabilityRecord, CcPairId, CcPairStatus, Connector, ConnectorCredentialPair, ConnectorId,
    Credential, CredentialId, Document, DocumentSource, IndexAttempt, Tag,
};
use connector_harness_core::perm_sync::{SyncCandidate, SyncKind};
use connector_harness_core::store::{DocumentStore, StoreTransaction};

fn store_err(e: sqlx::Error) -> LifecycleError {
    LifecycleError::store_source(e)
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(store_err)
}

const CCPAIR_COLUMNS: &str = "id, connector_id, credential_id, name, status";

fn ccpair_from_row(row: &SqliteRow) -> Result<ConnectorCredentialPair> {
    let status: String = col(row, "status")?;
    Ok(ConnectorCredentialPair {
        id: col(row, "id")?,
        connector_id: col(row, "connector_id")?,
        credential_id: col(row, "credential_id")?,
        name: col(row, "name")?,
        status: status.parse()?,
    })
}

fn connector_from_row(row: &SqliteRow) -> Result<Connector> {
    let source: String = col(row, "source")?;
    let config_json: String = col(row, "config_json")?;
    let config: Map<String, Value> = serde_json::from_str(&config_json)
        .map_err(|e| LifecycleError::store(format!("corrupt connector config: {}", e)))?;
    Ok(Connector {
        id: col(row, "id")?,
        name: col(row, "name")?,
        source: source.parse()?,
        config,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let chunk_count: i64 = col(row, "chunk_count")?;
    Ok(Document {
        id: col(row, "id")?,
        connector_id: col(row, "connector_id")?,
        credential_id: col(row, "credential_id")?,
        semantic_id: col(row, "semantic_id")?,
        chunk_count: u32::try_from(chunk_count).map_err(|_| {
            LifecycleError::store(format!("chunk_count {} out of range", chunk_count))
        })?,
    })
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// One row of `cch ccpair list`.
#[derive(Debug, Clone)]
pub struct CcPairSummary {
    pub ccp: ConnectorCredentialPair,
    pub source: DocumentSource,
    pub document_count: i64,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ccpair_summaries(&self) -> Result<Vec<CcPairSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.connector_id, p.credential_id, p.name, p.status, c.source,
                   (SELECT COUNT(*) FROM documents d
                     WHERE d.connector_id = p.connector_id
                       AND d.credential_id = p.credential_id) AS document_count
            FROM cc_pairs p
            JOIN connectors c ON c.id = p.connector_id
            ORDER BY p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let source: String = col(row, "source")?;
                Ok(CcPairSummary {
                    ccp: ccpair_from_row(row)?,
                    source: source.parse()?,
                    document_count: col(row, "document_count")?,
                })
            })
            .collect()
    }

    /// Every pair with its source and last permission-sync times.
    pub async fn sync_candidates(&self) -> Result<Vec<SyncCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.connector_id, p.credential_id, p.name, p.status, c.source,
                   p.last_doc_sync_at, p.last_group_sync_at
            FROM cc_pairs p
            JOIN connectors c ON c.id = p.connector_id
            ORDER BY p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let source: String = col(row, "source")?;
                Ok(SyncCandidate {
                    ccp: ccpair_from_row(row)?,
                    source: source.parse()?,
                    last_doc_sync: timestamp(col(row, "last_doc_sync_at")?),
                    last_group_sync: timestamp(col(row, "last_group_sync_at")?),
                })
            })
            .collect()
    }

    /// Stamp a completed permission sync.
    pub async fn record_sync(
        &self,
        cc_pair_id: CcPairId,
        kind: SyncKind,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let sql = match kind {
            SyncKind::Doc => "UPDATE cc_pairs SET last_doc_sync_at = ? WHERE id = ?",
            SyncKind::Group => "UPDATE cc_pairs SET last_group_sync_at = ? WHERE id = ?",
        };
        sqlx::query(sql)
            .bind(at.timestamp())
            .bind(cc_pair_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_ccpair(&self, id: CcPairId) -> Result<Option<ConnectorCredentialPair>> {
        let row = sqlx::query(&format!("SELECT {} FROM cc_pairs WHERE id = ?", CCPAIR_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(ccpair_from_row).transpose()
    }

    async fn get_ccpair_by_ids(
        &self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
    ) -> Result<Option<ConnectorCredentialPair>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cc_pairs WHERE connector_id = ? AND credential_id = ?",
            CCPAIR_COLUMNS
        ))
        .bind(connector_id)
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(ccpair_from_row).transpose()
    }

    async fn list_ccpairs(&self) -> Result<Vec<ConnectorCredentialPair>> {
        let rows = sqlx::query(&format!("SELECT {} FROM cc_pairs ORDER BY id", CCPAIR_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(ccpair_from_row).collect()
    }

    async fn get_connector(&self, id: ConnectorId) -> Result<Option<Connector>> {
        let row = sqlx::query("SELECT id, name, source, config_json FROM connectors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(connector_from_row).transpose()
    }

    async fn list_documents(
        &self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, connector_id, credential_id, semantic_id, chunk_count
            FROM documents
            WHERE connector_id = ? AND credential_id = ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(connector_id)
        .bind(credential_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(document_from_row).collect()
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT id, tag_key, tag_value, source FROM tags ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter()
            .map(|row| {
                let source: String = col(row, "source")?;
                Ok(Tag {
                    id: col(row, "id")?,
                    key: col(row, "tag_key")?,
                    value: col(row, "tag_value")?,
                    source: source.parse()?,
                })
            })
            .collect()
    }

    async fn list_index_attempts(&self, cc_pair_id: CcPairId) -> Result<Vec<IndexAttempt>> {
        let rows = sqlx::query(
            "SELECT id, cc_pair_id, status, secondary FROM index_attempts WHERE cc_pair_id = ? ORDER BY id",
        )
        .bind(cc_pair_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter()
            .map(|row| {
                let status: String = col(row, "status")?;
                Ok(IndexAttempt {
                    id: col(row, "id")?,
                    cc_pair_id: col(row, "cc_pair_id")?,
                    status: status.parse()?,
                    secondary: col(row, "secondary")?,
                })
            })
            .collect()
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>> {
        let rows = sqlx::query(
            "SELECT in_code_id, name, display_name, description FROM capabilities ORDER BY in_code_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter()
            .map(|row| {
                Ok(CapabilityRecord {
                    in_code_id: col(row, "in_code_id")?,
                    name: col(row, "name")?,
                    display_name: col(row, "display_name")?,
                    description: col(row, "description")?,
                })
            })
            .collect()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(store_err)?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTransaction {
    async fn exec(&mut self, sql: &str, id: i64) -> Result<u64> {
        let done = sqlx::query(sql)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn set_ccpair_status(
        &mut self,
        id: CcPairId,
        expected: CcPairStatus,
        status: CcPairStatus,
    ) -> Result<()> {
        let done = sqlx::query("UPDATE cc_pairs SET status = ? WHERE id = ? AND status = ?")
            .bind(status.as_str())
            .bind(id)
            .bind(expected.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        if done.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM cc_pairs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;
        match current {
            None => Err(LifecycleError::not_found("connector credential pair", id)),
            Some(current) => Err(LifecycleError::Precondition(format!(
                "connector credential pair {} is {}, expected {}",
                id, current, expected
            ))),
        }
    }

    async fn cancel_index_attempts(
        &mut self,
        cc_pair_id: CcPairId,
        include_secondary: bool,
    ) -> Result<u64> {
        let done = sqlx::query(
            r#"
            UPDATE index_attempts SET status = 'CANCELED'
            WHERE cc_pair_id = ?
              AND status IN ('NOT_STARTED', 'IN_PROGRESS')
              AND (? OR secondary = 0)
            "#,
        )
        .bind(cc_pair_id)
        .bind(include_secondary)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected())
    }

    async fn delete_documents(&mut self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids_json = serde_json::to_string(ids)
            .map_err(|e| LifecycleError::store(format!("encode document ids: {}", e)))?;

        sqlx::query("DELETE FROM document_tags WHERE document_id IN (SELECT value FROM json_each(?))")
            .bind(&ids_json)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        let done = sqlx::query("DELETE FROM documents WHERE id IN (SELECT value FROM json_each(?))")
            .bind(&ids_json)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(done.rows_affected())
    }

    async fn delete_orphan_tags(&mut self) -> Result<u64> {
        let done = sqlx::query(
            "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM document_tags)",
        )
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected())
    }

    async fn delete_index_attempts(&mut self, cc_pair_id: CcPairId) -> Result<u64> {
        self.exec("DELETE FROM index_attempts WHERE cc_pair_id = ?", cc_pair_id)
            .await
    }

    async fn delete_document_set_links(&mut self, cc_pair_id: CcPairId) -> Result<u64> {
        self.exec("DELETE FROM document_set_cc_pairs WHERE cc_pair_id = ?", cc_pair_id)
            .await
    }

    async fn delete_user_group_links(&mut self, cc_pair_id: CcPairId) -> Result<u64> {
        self.exec("DELETE FROM user_group_cc_pairs WHERE cc_pair_id = ?", cc_pair_id)
            .await
    }

    async fn delete_ccpair(
        &mut self,
        connector_id: ConnectorId,
        credential_id: CredentialId,
    ) -> Result<u64> {
        let done = sqlx::query("DELETE FROM cc_pairs WHERE connector_id = ? AND credential_id = ?")
            .bind(connector_id)
            .bind(credential_id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(done.rows_affected())
    }

    async fn delete_connector_if_unused(&mut self, connector_id: ConnectorId) -> Result<bool> {
        let done = sqlx::query(
            r#"
            DELETE FROM connectors
            WHERE id = ?
              AND NOT EXISTS (SELECT 1 FROM cc_pairs WHERE connector_id = ?)
            "#,
        )
        .bind(connector_id)
        .bind(connector_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected() > 0)
    }

    async fn upsert_capability(&mut self, record: &CapabilityRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO capabilities (in_code_id, name, display_name, description)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(in_code_id) DO UPDATE SET
                name = excluded.name,
                display_name = excluded.display_name,
                description = excluded.description
            "#,
        )
        .bind(&record.in_code_id)
        .bind(&record.name)
        .bind(&record.display_name)
        .bind(&record.description)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_capability(&mut self, in_code_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM capabilities WHERE in_code_id = ?")
            .bind(in_code_id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn insert_connector(&mut self, connector: &Connector) -> Result<()> {
        let config_json = serde_json::to_string(&connector.config)
            .map_err(|e| LifecycleError::store(format!("encode connector config: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO connectors (id, name, source, config_json) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                source = excluded.source,
                config_json = excluded.config_json
            "#,
        )
        .bind(connector.id)
        .bind(&connector.name)
        .bind(connector.source.as_str())
        .bind(config_json)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn insert_credential(&mut self, credential: &Credential) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (id, name) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(credential.id)
        .bind(&credential.name)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn insert_ccpair(&mut self, ccp: &ConnectorCredentialPair) -> Result<()> {
        sqlx::query(
            "INSERT INTO cc_pairs (id, connector_id, credential_id, name, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ccp.id)
        .bind(ccp.connector_id)
        .bind(ccp.credential_id)
        .bind(&ccp.name)
        .bind(ccp.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_document(&mut self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, connector_id, credential_id, semantic_id, chunk_count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                connector_id = excluded.connector_id,
                credential_id = excluded.credential_id,
                semantic_id = excluded.semantic_id,
                chunk_count = excluded.chunk_count
            "#,
        )
        .bind(&doc.id)
        .bind(doc.connector_id)
        .bind(doc.credential_id)
        .bind(&doc.semantic_id)
        .bind(i64::from(doc.chunk_count))
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn tag_document(
        &mut self,
        document_id: &str,
        key: &str,
        value: &str,
        source: DocumentSource,
    ) -> Result<i64> {
        sqlx::query(
            "INSERT INTO tags (tag_key, tag_value, source) VALUES (?, ?, ?) \
             ON CONFLICT(tag_key, tag_value, source) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(source.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;

        let tag_id: i64 = sqlx::query_scalar(
            "SELECT id FROM tags WHERE tag_key = ? AND tag_value = ? AND source = ?",
        )
        .bind(key)
        .bind(value)
        .bind(source.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(store_err)?;

        sqlx::query("INSERT OR IGNORE INTO document_tags (document_id, tag_id) VALUES (?, ?)")
            .bind(document_id)
            .bind(tag_id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(tag_id)
    }

    async fn insert_index_attempt(&mut self, attempt: &IndexAttempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_attempts (id, cc_pair_id, status, secondary) VALUES (?, ?, ?, ?)",
        )
        .bind(attempt.id)
        .bind(attempt.cc_pair_id)
        .bind(attempt.status.as_str())
        .bind(attempt.secondary)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn link_document_set(
        &mut self,
        document_set_id: i64,
        cc_pair_id: CcPairId,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO document_set_cc_pairs (document_set_id, cc_pair_id) VALUES (?, ?)",
        )
        .bind(document_set_id)
        .bind(cc_pair_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn link_user_group(&mut self, user_group_id: i64, cc_pair_id: CcPairId) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_group_cc_pairs (user_group_id, cc_pair_id) VALUES (?, ?)",
        )
        .bind(user_group_id)
        .bind(cc_pair_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(store_err)
    }
}
