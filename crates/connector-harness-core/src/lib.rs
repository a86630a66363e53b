//! # Connector Harness Core
//!
//! Runtime-agnostic logic for managing connector-credential pairs: data
//! models, the lifecycle state machine, storage and index ports, the
//! crash-resumable deletion orchestrator, permission-sync policy, and the
//! built-in capability registry.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Every port ships an in-memory
//! implementation so the orchestrator can be driven in tests or embedded
//! without a database.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Connectors, credentials, pairs, documents, tags |
//! | [`lifecycle`] | Allowed status transitions |
//! | [`store`] | Metadata store ports and the in-memory store |
//! | [`index`] | Document index port |
//! | [`file_store`] | Blob store port |
//! | [`deletion`] | Batched, resumable pair deletion |
//! | [`perm_sync`] | Permission-sync cadence and due-job selection |
//! | [`capability`] | Built-in capability reconciliation and lookup |

pub mod capability;
pub mod deletion;
pub mod error;
pub mod file_store;
pub mod index;
pub mod lifecycle;
pub mod models;
pub mod perm_sync;
pub mod store;

pub use deletion::{DeletionOrchestrator, DeletionReport};
pub use error::{LifecycleError, Result};
