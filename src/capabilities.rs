//! `cch capabilities`: reconcile built-in capabilities into the database
//! and list what is persisted.

use std::sync::Arc;

use anyhow::Result;

use connector_harness_core::capability::{CapabilityKind, CapabilityRegistry};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_sync(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let registry = CapabilityRegistry::new(Arc::new(SqliteStore::new(pool.clone())));

    let plan = registry.reconcile(&config.providers()).await?;
    for record in &plan.added {
        println!("added: {}", record.in_code_id);
    }
    for record in &plan.updated {
        println!("updated: {}", record.in_code_id);
    }
    for id in &plan.removed {
        println!("removed: {}", id);
    }
    println!(
        "capabilities synced: {} added, {} updated, {} removed",
        plan.added.len(),
        plan.updated.len(),
        plan.removed.len()
    );

    pool.close().await;
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let registry = CapabilityRegistry::new(Arc::new(SqliteStore::new(pool.clone())));
    let persisted = registry.persisted().await?;

    if persisted.is_empty() {
        println!("No capabilities. Run `cch capabilities sync` first.");
    } else {
        println!("{:<22} {:<18} {}", "ID", "NAME", "STATUS");
        for (id, record) in &persisted {
            let status = match registry.lookup(id).await {
                Ok(kind) if CapabilityRegistry::registered(&config.providers()).contains(&kind) => {
                    "registered"
                }
                Ok(_) => "unavailable",
                Err(_) => "unknown",
            };
            println!("{:<22} {:<18} {}", id, record.display_name, status);
        }
    }

    let missing: Vec<CapabilityKind> = CapabilityRegistry::registered(&config.providers())
        .into_iter()
        .filter(|k| !persisted.contains_key(k.in_code_id()))
        .collect();
    if !missing.is_empty() {
        println!();
        for kind in missing {
            println!("not yet synced: {}", kind);
        }
    }

    pool.close().await;
    Ok(())
}
