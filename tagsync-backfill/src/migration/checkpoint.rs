//! Backfill checkpoint persistence
//!
//! Writes here are best-effort: a failed write is logged and the run carries
//! on, losing at most the work since the previous successful checkpoint.

use crate::models::{Dataset, MigrationProgress, TrackMetadata};
use crate::store::{keys, load_json, save_json, LocalStore};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Secondary local cache: record key → previously fetched metadata
pub(super) type TrackCache = BTreeMap<String, TrackMetadata>;

/// Stored progress for `migration`, if any
///
/// A checkpoint for a different migration, or one that cannot be decoded,
/// is ignored and the run starts fresh.
pub(super) async fn load_progress(store: &dyn LocalStore, migration: &str) -> Option<MigrationProgress> {
    match load_json::<MigrationProgress>(store, keys::MIGRATION_PROGRESS).await {
        Ok(Some(progress)) if progress.migration_name == migration => Some(progress),
        Ok(Some(progress)) => {
            debug!(
                stored = %progress.migration_name,
                migration,
                "Ignoring checkpoint of another migration"
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(migration, error = %e, "Failed to load migration checkpoint, starting fresh");
            None
        }
    }
}

pub(super) async fn load_cache(store: &dyn LocalStore) -> TrackCache {
    match load_json::<TrackCache>(store, keys::TRACK_CACHE).await {
        Ok(cache) => cache.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "Failed to load track cache, continuing without it");
            TrackCache::new()
        }
    }
}

/// Persist dataset, then cache (if dirty), then progress
///
/// The dataset goes first: a crash between writes then leaves filled records
/// that simply stop being targets, never keys marked processed whose data
/// was lost.
pub(super) async fn save(
    store: &dyn LocalStore,
    progress: &MigrationProgress,
    dataset: &Dataset,
    cache: Option<&TrackCache>,
) {
    if let Err(e) = save_json(store, keys::DATASET, dataset).await {
        warn!(error = %e, "Failed to persist dataset at checkpoint");
        return;
    }

    if let Some(cache) = cache {
        if let Err(e) = save_json(store, keys::TRACK_CACHE, cache).await {
            warn!(error = %e, "Failed to persist track cache at checkpoint");
        }
    }

    save_progress(store, progress).await;
}

pub(super) async fn save_progress(store: &dyn LocalStore, progress: &MigrationProgress) {
    match save_json(store, keys::MIGRATION_PROGRESS, progress).await {
        Ok(()) => debug!(
            migration = %progress.migration_name,
            processed = progress.processed_keys.len(),
            failed = progress.failed_keys.len(),
            "Checkpoint saved"
        ),
        Err(e) => warn!(
            migration = %progress.migration_name,
            error = %e,
            "Failed to persist migration checkpoint"
        ),
    }
}

pub(super) async fn clear_progress(store: &dyn LocalStore) {
    if let Err(e) = store.delete(keys::MIGRATION_PROGRESS).await {
        warn!(error = %e, "Failed to clear migration checkpoint");
    }
}
