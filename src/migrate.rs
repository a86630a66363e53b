use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Tables in creation order. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS connectors (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        source TEXT NOT NULL,
        config_json TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS credentials (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cc_pairs (
        id INTEGER PRIMARY KEY,
        connector_id INTEGER NOT NULL REFERENCES connectors(id),
        credential_id INTEGER NOT NULL REFERENCES credentials(id),
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        last_doc_sync_at INTEGER,
        last_group_sync_at INTEGER,
        UNIQUE(connector_id, credential_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        connector_id INTEGER NOT NULL,
        credential_id INTEGER NOT NULL,
        semantic_id TEXT NOT NULL,
        chunk_count INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (connector_id, credential_id)
            REFERENCES cc_pairs(connector_id, credential_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tag_key TEXT NOT NULL,
        tag_value TEXT NOT NULL,
        source TEXT NOT NULL,
        UNIQUE(tag_key, tag_value, source)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_tags (
        document_id TEXT NOT NULL REFERENCES documents(id),
        tag_id INTEGER NOT NULL REFERENCES tags(id),
        PRIMARY KEY (document_id, tag_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS index_attempts (
        id INTEGER PRIMARY KEY,
        cc_pair_id INTEGER NOT NULL REFERENCES cc_pairs(id),
        status TEXT NOT NULL,
        secondary INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_set_cc_pairs (
        document_set_id INTEGER NOT NULL,
        cc_pair_id INTEGER NOT NULL REFERENCES cc_pairs(id),
        PRIMARY KEY (document_set_id, cc_pair_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_group_cc_pairs (
        user_group_id INTEGER NOT NULL,
        cc_pair_id INTEGER NOT NULL REFERENCES cc_pairs(id),
        PRIMARY KEY (user_group_id, cc_pair_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS capabilities (
        in_code_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        display_name TEXT NOT NULL,
        description TEXT NOT NULL
    )
    "#,
    // The batch query walks documents by owner in id order.
    "CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(connector_id, credential_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_document_tags_tag_id ON document_tags(tag_id)",
    "CREATE INDEX IF NOT EXISTS idx_index_attempts_cc_pair ON index_attempts(cc_pair_id)",
    "CREATE INDEX IF NOT EXISTS idx_document_set_cc_pair ON document_set_cc_pairs(cc_pair_id)",
    "CREATE INDEX IF NOT EXISTS idx_user_group_cc_pair ON user_group_cc_pairs(cc_pair_id)",
];

/// Create every table and index on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
