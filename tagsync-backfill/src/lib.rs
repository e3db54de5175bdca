//! tagsync-backfill library interface
//!
//! Request coordination for the external metadata API and the migration
//! orchestrator that keeps the local dataset up to date. Exposed as a library
//! for integration testing; the binary in `main.rs` wires it together.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod migration;
pub mod models;
pub mod services;
pub mod store;

pub use crate::coordinator::{CoordinatorConfig, CoordinatorStats, RequestCoordinator};
pub use crate::error::{ApiError, ErrorClass};
pub use crate::migration::{BackfillConfig, MigrationError, MigrationOrchestrator};
pub use crate::store::{LocalStore, MemoryStore};
