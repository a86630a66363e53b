//! # Connector Harness
//!
//! Lifecycle management for connector-credential pairs (a data-source
//! connector bound to one credential): crash-resumable bulk deletion,
//! permission-sync scheduling, and reconciliation of built-in capabilities.
//!
//! The algorithms live in [`connector_harness_core`]. This crate supplies the
//! native runtime around them: configuration, SQLite storage, an HTTP
//! document-index client, a local blob store, the permission-sync
//! dispatcher, and the `cch` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────────┐   ┌──────────────┐
//! │   CLI    │──▶│ DeletionOrchestr.  │──▶│ SQLite store │
//! │  (cch)   │   │ CapabilityRegistry │   └──────────────┘
//! └──────────┘   │ SyncDispatcher     │──▶ HTTP index
//!                └────────────────────┘──▶ blob directory
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cch init                      # create database
//! cch ccpair list               # show pairs and document counts
//! cch ccpair pause 42           # stop ingestion
//! cch delete 42                 # delete the pair and its documents
//! cch sync-schedule             # show permission-sync cadence
//! cch capabilities sync         # reconcile built-in capabilities
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store ports |
//! | [`http_index`] | HTTP document-index client |
//! | [`local_file_store`] | Directory-backed blob store |
//! | [`perm_sync`] | Permission-sync dispatcher |
//! | [`delete_cmd`] | `cch delete` |
//! | [`ccpair`] | `cch ccpair` |
//! | [`capabilities`] | `cch capabilities` |
//! | [`logging`] | Tracing subscriber setup |

pub mod capabilities;
pub mod ccpair;
pub mod config;
pub mod db;
pub mod delete_cmd;
pub mod http_index;
pub mod local_file_store;
pub mod logging;
pub mod migrate;
pub mod perm_sync;
pub mod sqlite_store;
