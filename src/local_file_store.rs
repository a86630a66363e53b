//! Blob store backed by a local directory.
//!
//! Files live at `{root}/{file_id}`. Ids may not escape the root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use connector_harness_core::error::{LifecycleError, Result};
use connector_harness_core::file_store::FileStore;

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, file_id: &str) -> Result<PathBuf> {
        let rel = Path::new(file_id);
        let escapes = file_id.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(LifecycleError::blob(file_id, "file id must be a relative path inside the store"));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let path = self.path_for(file_id)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| LifecycleError::BlobDeletion {
                file_id: file_id.to_string(),
                message: format!("remove {}", path.display()),
                source: Some(Box::new(e)),
            })
    }
}
