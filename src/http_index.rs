//! HTTP client for the document index engine.
//!
//! Each document is stored as `chunk_count` chunks addressed as
//! `{doc_id}::{i}`. Deleting a document issues one `DELETE` per chunk:
//!
//! ```text
//! DELETE {endpoint}/document/v1/{tenant}/chunk/{doc_id}::{i}
//! ```
//!
//! A `404` means the chunk is already gone and counts as success, which
//! keeps retried batches idempotent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use connector_harness_core::error::{LifecycleError, Result};
use connector_harness_core::index::DocumentIndex;

use crate::config::IndexConfig;

pub struct HttpDocumentIndex {
    client: Client,
    base: Url,
}

impl HttpDocumentIndex {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(endpoint)
            .map_err(|e| anyhow::anyhow!("invalid index endpoint '{}': {}", endpoint, e))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("invalid index endpoint '{}': not a base URL", endpoint);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// Build from `[index]`, failing when no endpoint is configured.
    pub fn from_config(config: &IndexConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("index.endpoint must be set to delete documents"))?;
        Self::new(endpoint, Duration::from_secs(config.timeout_secs))
    }

    fn chunk_url(&self, tenant_id: &str, doc_id: &str, chunk: u32) -> Result<Url> {
        let chunk_id = format!("{}::{}", doc_id, chunk);
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| LifecycleError::index(doc_id, "index endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(["document", "v1", tenant_id, "chunk", chunk_id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl DocumentIndex for HttpDocumentIndex {
    async fn delete_single(&self, doc_id: &str, tenant_id: &str, chunk_count: u32) -> Result<()> {
        for chunk in 0..chunk_count {
            let url = self.chunk_url(tenant_id, doc_id, chunk)?;
            let response = self
                .client
                .delete(url)
                .send()
                .await
                .map_err(|e| LifecycleError::IndexDeletion {
                    doc_id: doc_id.to_string(),
                    message: format!("request for chunk {} failed", chunk),
                    source: Some(Box::new(e)),
                })?;

            let status = response.status();
            if status.is_success() || status == StatusCode::NOT_FOUND {
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(LifecycleError::index(
                doc_id,
                format!(
                    "chunk {} delete returned {}: {}",
                    chunk,
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }
        debug!(doc_id, tenant_id, chunk_count, "deleted document from index");
        Ok(())
    }
}
