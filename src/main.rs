//! # Connector Harness CLI (`cch`)
//!
//! The `cch` binary manages connector-credential pairs: pausing and
//! resuming them, deleting them with everything they own, showing the
//! permission-sync schedule, and syncing built-in capabilities.
//!
//! ## Usage
//!
//! ```bash
//! cch --config ./config/cch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cch init` | Create the SQLite database and run schema migrations |
//! | `cch ccpair list` | List pairs with status and document counts |
//! | `cch ccpair pause <id>` | Pause a pair |
//! | `cch ccpair resume <id>` | Resume a paused pair |
//! | `cch delete <id>` | Delete a paused pair, its documents, and its files |
//! | `cch sync-schedule` | Show permission-sync cadence and due jobs |
//! | `cch capabilities sync` | Reconcile built-in capabilities into the database |
//! | `cch capabilities list` | List persisted capabilities |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use connector_harness::logging::{self, LogFormat};
use connector_harness::{capabilities, ccpair, config, delete_cmd, migrate, perm_sync};
use connector_harness_core::models::CcPairStatus;

/// Connector Harness CLI: lifecycle management for connector-credential pairs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cch",
    about = "Connector Harness: lifecycle management for connector-credential pairs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cch.toml")]
    config: PathBuf,

    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Inspect and pause or resume connector-credential pairs.
    Ccpair {
        #[command(subcommand)]
        action: CcPairAction,
    },

    /// Delete a connector-credential pair and everything it owns.
    ///
    /// The pair must be paused first. Documents are removed from the index
    /// and the database in batches; an interrupted run is resumed by
    /// running the command again.
    Delete {
        /// Connector-credential pair id.
        id: i64,

        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Show permission-sync cadence and which syncs are due.
    SyncSchedule,

    /// Manage built-in capabilities.
    Capabilities {
        #[command(subcommand)]
        action: CapabilitiesAction,
    },
}

#[derive(Subcommand)]
enum CcPairAction {
    /// List pairs with their status and document counts.
    List,
    /// Pause a pair so ingestion stops and it can be deleted.
    Pause { id: i64 },
    /// Resume a paused pair.
    Resume { id: i64 },
}

#[derive(Subcommand)]
enum CapabilitiesAction {
    /// Add, update, and remove persisted capabilities to match the built-in set.
    Sync,
    /// List persisted capabilities.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ccpair { action } => match action {
            CcPairAction::List => ccpair::run_list(&cfg).await?,
            CcPairAction::Pause { id } => {
                ccpair::run_set_status(&cfg, id, CcPairStatus::Paused).await?
            }
            CcPairAction::Resume { id } => {
                ccpair::run_set_status(&cfg, id, CcPairStatus::Active).await?
            }
        },
        Commands::Delete { id, yes } => {
            delete_cmd::run_delete(&cfg, id, yes).await?;
        }
        Commands::SyncSchedule => {
            perm_sync::run_sync_schedule(&cfg).await?;
        }
        Commands::Capabilities { action } => match action {
            CapabilitiesAction::Sync => capabilities::run_sync(&cfg).await?,
            CapabilitiesAction::List => capabilities::run_list(&cfg).await?,
        },
    }

    Ok(())
}
