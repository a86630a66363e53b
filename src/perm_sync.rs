//! Permission-sync dispatch.
//!
//! [`SyncDispatcher`] runs the jobs that the cadence policy reports as due.
//! At most `workers` jobs run at once, and a job is skipped while another
//! job holds the same pair's lock key. The actual ACL and group fetching
//! lives behind [`PermissionSyncExecutor`].
//!
//! `cch sync-schedule` prints the cadence and due jobs for every pair.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use connector_harness_core::models::DocumentSource;
use connector_harness_core::perm_sync::{PermissionSyncPolicy, SyncJob, SyncKind};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Performs one permission sync against the external source.
#[async_trait]
pub trait PermissionSyncExecutor: Send + Sync {
    async fn run(&self, job: &SyncJob) -> Result<()>;
}

/// Stamps each successful sync on the pair row so the next schedule pass
/// sees it as fresh.
pub struct RecordingExecutor {
    inner: Arc<dyn PermissionSyncExecutor>,
    store: SqliteStore,
}

impl RecordingExecutor {
    pub fn new(inner: Arc<dyn PermissionSyncExecutor>, store: SqliteStore) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl PermissionSyncExecutor for RecordingExecutor {
    async fn run(&self, job: &SyncJob) -> Result<()> {
        self.inner.run(job).await?;
        self.store
            .record_sync(job.cc_pair_id, job.kind, Utc::now())
            .await?;
        Ok(())
    }
}

/// Outcome counts of one [`SyncDispatcher::run_due`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub started: usize,
    pub skipped_locked: usize,
    pub failed: usize,
}

type HeldKeys = Arc<Mutex<HashSet<String>>>;

fn lock_keys(held: &HeldKeys) -> MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process set of held lock keys. Clones share the same set.
#[derive(Clone, Default)]
pub struct SyncLocks {
    held: HeldKeys,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `key` if nobody holds it. The key is released when the guard drops.
    pub fn try_acquire(&self, key: &str) -> Option<SyncLockGuard> {
        if !lock_keys(&self.held).insert(key.to_string()) {
            return None;
        }
        Some(SyncLockGuard {
            key: key.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        lock_keys(&self.held).contains(key)
    }
}

pub struct SyncLockGuard {
    key: String,
    held: HeldKeys,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        lock_keys(&self.held).remove(&self.key);
    }
}

pub struct SyncDispatcher {
    executor: Arc<dyn PermissionSyncExecutor>,
    semaphore: Arc<Semaphore>,
    locks: SyncLocks,
}

impl SyncDispatcher {
    pub fn new(executor: Arc<dyn PermissionSyncExecutor>, workers: usize) -> Self {
        Self {
            executor,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            locks: SyncLocks::new(),
        }
    }

    /// Share a lock set with other dispatchers in the process.
    pub fn with_locks(mut self, locks: SyncLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &SyncLocks {
        &self.locks
    }

    /// Run `jobs` and wait for all started ones to finish. Executor
    /// failures are logged and counted.
    pub async fn run_due(&self, jobs: Vec<SyncJob>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut tasks = JoinSet::new();

        for job in jobs {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(guard) = self.locks.try_acquire(&job.lock_key) else {
                debug!(lock_key = %job.lock_key, kind = job.kind.as_str(), "sync already running for pair, skipping");
                summary.skipped_locked += 1;
                continue;
            };

            summary.started += 1;
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                let result = executor.run(&job).await;
                (job, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((job, Ok(()))) => {
                    info!(cc_pair_id = job.cc_pair_id, source = %job.source, kind = job.kind.as_str(), "permission sync finished");
                }
                Ok((job, Err(e))) => {
                    summary.failed += 1;
                    warn!(cc_pair_id = job.cc_pair_id, source = %job.source, kind = job.kind.as_str(), error = %e, "permission sync failed");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = ?e, "permission sync task panicked");
                }
            }
        }

        summary
    }
}

fn describe_interval(policy: &PermissionSyncPolicy, kind: SyncKind, source: DocumentSource) -> String {
    match kind {
        SyncKind::Doc if policy.supports_doc_sync(source) => {
            format!("{}s", policy.doc_sync_interval_secs(source))
        }
        SyncKind::Group if policy.supports_group_sync(source) => {
            format!("{}s", policy.group_sync_interval_secs(source))
        }
        _ => "-".to_string(),
    }
}

/// Print every pair's cadence and which syncs are due now.
pub async fn run_sync_schedule(config: &Config) -> Result<()> {
    let policy = config.permission_policy()?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let candidates = store.sync_candidates().await?;
    let due = policy.due_syncs(&candidates, Utc::now());

    println!(
        "{:<6} {:<14} {:<10} {:>8} {:>8}   {}",
        "CCP", "SOURCE", "STATUS", "DOC", "GROUP", "DUE"
    );
    for candidate in &candidates {
        let id = candidate.ccp.id;
        let due_kinds: Vec<&str> = due
            .iter()
            .filter(|j| j.cc_pair_id == id)
            .map(|j| j.kind.as_str())
            .collect();
        println!(
            "{:<6} {:<14} {:<10} {:>8} {:>8}   {}",
            id,
            candidate.source,
            candidate.ccp.status,
            describe_interval(&policy, SyncKind::Doc, candidate.source),
            describe_interval(&policy, SyncKind::Group, candidate.source),
            if due_kinds.is_empty() {
                "-".to_string()
            } else {
                due_kinds.join(",")
            }
        );
    }
    println!();
    println!("pairs: {}", candidates.len());
    println!("due jobs: {}", due.len());
    println!("workers: {}", policy.workers);

    pool.close().await;
    Ok(())
}
