//! Binary artifact storage port, used by file-type connectors.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{LifecycleError, Result};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn delete_file(&self, file_id: &str) -> Result<()>;
}

/// In-memory blob store. Deleting a missing file fails like a real backend would.
#[derive(Default)]
pub struct InMemoryFileStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put(&self, file_id: &str, bytes: &[u8]) {
        self.lock().insert(file_id.to_string(), bytes.to_vec());
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.lock().contains_key(file_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn delete_file(&self, file_id: &str) -> Result<()> {
        match self.lock().remove(file_id) {
            Some(_) => Ok(()),
            None => Err(LifecycleError::blob(file_id, "no such file")),
        }
    }
}
