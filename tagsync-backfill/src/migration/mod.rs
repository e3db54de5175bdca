//! Migration orchestrator
//!
//! Applies a fixed, ordered list of named migrations to the dataset exactly
//! once per name. Completion is a flag in the persisted [`MigrationState`];
//! a migration whose flag is still false is picked up again by the next
//! [`MigrationOrchestrator::run_migrations`] call.
//!
//! # Migrations (declaration order)
//! 1. `normalize_tags` (structural)
//! 2. `purge_empty_records` (structural)
//! 3. `backfill_metadata` (long-running, resumable, see [`backfill`])

mod backfill;
mod checkpoint;
mod structural;

pub use backfill::BackfillSummary;

use crate::models::{Dataset, MigrationState};
use crate::services::MetadataFetcher;
use crate::store::{keys, load_json, save_json, LocalStore};
use std::sync::Arc;
use tagsync_common::config::BackfillSection;
use tagsync_common::events::{ChangeReason, EventBus, SyncEvent};
use tagsync_common::time::now;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a migration stopped without completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Too many consecutive batches with failures
    ConsecutiveFailures,
    /// Every key was attempted but some failed retryably
    RetryableFailuresRemaining,
}

/// Migration errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Intentional stop: retry later, do not mark complete
    #[error("Migration '{migration}' paused ({reason:?}), {remaining} keys remaining")]
    Paused {
        migration: String,
        reason: PauseReason,
        /// Failing batches in a row when the run stopped
        consecutive_failures: u32,
        remaining: usize,
        /// Records changed before pausing (already persisted)
        updated_records: usize,
    },

    /// Local Store failure on a non-best-effort path
    #[error("Store error: {0}")]
    Store(#[from] tagsync_common::Error),
}

impl MigrationError {
    pub fn is_paused(&self) -> bool {
        matches!(self, MigrationError::Paused { .. })
    }
}

/// Declared migrations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    NormalizeTags,
    PurgeEmptyRecords,
    BackfillMetadata,
}

impl Migration {
    /// Fixed declaration order
    pub const ALL: [Migration; 3] = [
        Migration::NormalizeTags,
        Migration::PurgeEmptyRecords,
        Migration::BackfillMetadata,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Migration::NormalizeTags => "normalize_tags",
            Migration::PurgeEmptyRecords => "purge_empty_records",
            Migration::BackfillMetadata => "backfill_metadata",
        }
    }
}

/// Backfill tunables
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillConfig {
    /// Records fetched concurrently per batch
    pub batch_size: usize,
    /// Attempts per record for retryable errors
    pub max_record_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Inter-batch delay after an all-success batch
    pub batch_delay_ms: u64,
    pub batch_delay_max_ms: u64,
    pub batch_delay_multiplier: f64,
    /// Consecutive failing batches before pausing
    pub max_consecutive_failures: u32,
    /// Checkpoint after this many batches (and always at the end)
    pub checkpoint_every_batches: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_record_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            batch_delay_ms: 250,
            batch_delay_max_ms: 5_000,
            batch_delay_multiplier: 1.5,
            max_consecutive_failures: 10,
            checkpoint_every_batches: 1,
        }
    }
}

impl BackfillConfig {
    /// Overlay the optional values of a `[backfill]` TOML table
    pub fn with_overrides(mut self, section: &BackfillSection) -> Self {
        if let Some(v) = section.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = section.max_record_attempts {
            self.max_record_attempts = v;
        }
        if let Some(v) = section.retry_base_delay_ms {
            self.retry_base_delay_ms = v;
        }
        if let Some(v) = section.retry_max_delay_ms {
            self.retry_max_delay_ms = v;
        }
        if let Some(v) = section.batch_delay_ms {
            self.batch_delay_ms = v;
        }
        if let Some(v) = section.batch_delay_max_ms {
            self.batch_delay_max_ms = v;
        }
        if let Some(v) = section.batch_delay_multiplier {
            self.batch_delay_multiplier = v;
        }
        if let Some(v) = section.max_consecutive_failures {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = section.checkpoint_every_batches {
            self.checkpoint_every_batches = v;
        }
        self
    }

    /// Clamp values that would stall or spin the loop
    fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.max_record_attempts = self.max_record_attempts.max(1);
        self.max_consecutive_failures = self.max_consecutive_failures.max(1);
        self.checkpoint_every_batches = self.checkpoint_every_batches.max(1);
        if !self.batch_delay_multiplier.is_finite() || self.batch_delay_multiplier < 1.0 {
            self.batch_delay_multiplier = 1.0;
        }
        self.batch_delay_max_ms = self.batch_delay_max_ms.max(self.batch_delay_ms);
        self.retry_max_delay_ms = self.retry_max_delay_ms.max(self.retry_base_delay_ms);
        self
    }
}

/// Runs the declared migrations against the Local Store
///
/// One instance per process; runs must not overlap.
pub struct MigrationOrchestrator {
    store: Arc<dyn LocalStore>,
    fetcher: Arc<dyn MetadataFetcher>,
    event_bus: EventBus,
    config: BackfillConfig,
    app_version: String,
}

impl MigrationOrchestrator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        fetcher: Arc<dyn MetadataFetcher>,
        event_bus: EventBus,
        config: BackfillConfig,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            fetcher,
            event_bus,
            config: config.normalized(),
            app_version: app_version.into(),
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Load the persisted dataset (empty if none stored yet)
    pub async fn load_dataset(&self) -> Result<Dataset, MigrationError> {
        Ok(load_json(self.store.as_ref(), keys::DATASET)
            .await?
            .unwrap_or_default())
    }

    /// Persisted migration state (default if none stored yet)
    pub async fn load_state(&self) -> Result<MigrationState, MigrationError> {
        Ok(load_json(self.store.as_ref(), keys::MIGRATION_STATE)
            .await?
            .unwrap_or_default())
    }

    /// Run every pending migration over `dataset`
    ///
    /// `dataset` is the working copy and is updated in place. Returns true if
    /// any flag flipped, the dataset changed, or the version stamp moved; in
    /// that case a `DatasetChanged` notification is emitted.
    ///
    /// A paused backfill is not an error: its flag stays false and the next
    /// call resumes it from the checkpoint.
    pub async fn run_migrations(&self, dataset: &mut Dataset) -> Result<bool, MigrationError> {
        if dataset.is_empty() {
            debug!("Dataset is empty, no migrations to run");
            return Ok(false);
        }

        let mut state = self.load_state().await?;
        let mut flags_changed = false;
        let mut dataset_changed = false;

        for migration in Migration::ALL {
            let name = migration.name();
            if state.is_complete(name) {
                debug!(migration = name, "Migration already complete, skipping");
                continue;
            }

            info!(migration = name, records = dataset.len(), "Running migration");

            match migration {
                Migration::NormalizeTags | Migration::PurgeEmptyRecords => {
                    let touched = structural::apply(migration, dataset);
                    if touched > 0 {
                        self.persist_dataset(dataset).await?;
                        dataset_changed = true;
                    }
                    info!(migration = name, records_touched = touched, "✓ Migration completed");
                }
                Migration::BackfillMetadata => match backfill::run(self, dataset).await {
                    Ok(summary) => {
                        dataset_changed |= summary.updated_records > 0;
                        info!(
                            migration = name,
                            targets = summary.targets,
                            from_cache = summary.resolved_from_cache,
                            fetched = summary.fetched,
                            skipped = summary.skipped,
                            "✓ Migration completed"
                        );
                    }
                    Err(MigrationError::Paused {
                        reason,
                        consecutive_failures,
                        remaining,
                        updated_records,
                        ..
                    }) => {
                        dataset_changed |= updated_records > 0;
                        warn!(
                            migration = name,
                            ?reason,
                            consecutive_failures,
                            remaining,
                            "Migration paused, will resume on next run"
                        );
                        self.event_bus.emit_lossy(SyncEvent::MigrationPaused {
                            migration: name.to_string(),
                            remaining,
                            timestamp: now(),
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            }

            if state.mark_complete(name) {
                flags_changed = true;
            }
            // Flag is durable before moving on
            save_json(self.store.as_ref(), keys::MIGRATION_STATE, &state).await?;
            self.event_bus.emit_lossy(SyncEvent::MigrationCompleted {
                migration: name.to_string(),
                timestamp: now(),
            });
        }

        let version_changed = state.version != self.app_version;
        if !(flags_changed || dataset_changed || version_changed) {
            debug!("Migrations up to date, nothing changed");
            return Ok(false);
        }

        state.version = self.app_version.clone();
        save_json(self.store.as_ref(), keys::MIGRATION_STATE, &state).await?;
        self.event_bus
            .emit_lossy(SyncEvent::dataset_changed(ChangeReason::Migration));

        info!(
            version = %state.version,
            flags_changed,
            dataset_changed,
            "Migration run finished"
        );
        Ok(true)
    }

    async fn persist_dataset(&self, dataset: &Dataset) -> Result<(), MigrationError> {
        save_json(self.store.as_ref(), keys::DATASET, dataset).await?;
        Ok(())
    }
}
