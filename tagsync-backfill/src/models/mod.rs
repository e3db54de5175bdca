//! Data models for tagsync-backfill
//!
//! - Track records and the dataset they live in
//! - Persisted migration state and the resumable progress checkpoint

pub mod migration;
pub mod track;

pub use migration::{MigrationProgress, MigrationState};
pub use track::{Dataset, MissingFields, TrackIdentity, TrackMetadata, TrackRecord};
