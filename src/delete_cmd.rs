//! `cch delete`: remove a connector-credential pair and everything it owns.
//!
//! The pair must be paused (or invalid) first. Unless `--yes` is given the
//! operator has to type `Y` before anything is touched. Runs are
//! resumable: if one fails half way, running the same command again
//! continues where it stopped.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use connector_harness_core::lifecycle;
use connector_harness_core::models::ConnectorCredentialPair;
use connector_harness_core::store::DocumentStore;
use connector_harness_core::{DeletionOrchestrator, DeletionReport, LifecycleError};

use crate::config::Config;
use crate::db;
use crate::http_index::HttpDocumentIndex;
use crate::local_file_store::LocalFileStore;
use crate::sqlite_store::SqliteStore;

/// Ask the operator to confirm. Only an exact `Y` proceeds.
pub fn confirm<R: BufRead, W: Write>(
    ccp: &ConnectorCredentialPair,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    writeln!(
        output,
        "This will permanently delete connector credential pair {} ('{}', status {}) \
         with all of its documents.",
        ccp.id, ccp.name, ccp.status
    )?;
    write!(output, "Type Y to continue: ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == "Y")
}

pub fn print_report(report: &DeletionReport) {
    println!("documents deleted: {}", report.documents_deleted);
    println!("files deleted: {}", report.files_deleted);
    if !report.failed_files.is_empty() {
        println!("files failed: {}", report.failed_files.len());
        for file_id in &report.failed_files {
            println!("  {}", file_id);
        }
    }
}

pub async fn run_delete(config: &Config, cc_pair_id: i64, yes: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let ccp = store
        .get_ccpair(cc_pair_id)
        .await?
        .ok_or_else(|| LifecycleError::not_found("connector credential pair", cc_pair_id))?;
    lifecycle::assert_deletable(&ccp)?;

    if !yes {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        if !confirm(&ccp, &mut stdin.lock(), &mut stdout)? {
            println!("Aborted.");
            pool.close().await;
            return Ok(());
        }
    }

    let index = Arc::new(HttpDocumentIndex::from_config(&config.index)?);
    let files = Arc::new(LocalFileStore::new(&config.files.root));
    let orchestrator = DeletionOrchestrator::new(store, index, files, &config.index.tenant_id)
        .with_batch_size(config.deletion.batch_size);

    let report = orchestrator
        .delete_connector_credential_pair(cc_pair_id)
        .await
        .with_context(|| {
            format!(
                "deletion of connector credential pair {} did not finish; re-run to resume",
                cc_pair_id
            )
        })?;

    print_report(&report);
    pool.close().await;
    Ok(())
}
