//! Persisted migration bookkeeping
//!
//! [`MigrationState`] holds one monotonic completion flag per migration name.
//! [`MigrationProgress`] is the checkpoint of a long-running migration; its
//! presence (with a matching name) is what "running" means across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Completion flags plus the version stamp of the last run that changed them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub migrations: BTreeMap<String, bool>,
}

impl MigrationState {
    pub fn is_complete(&self, migration: &str) -> bool {
        self.migrations.get(migration).copied().unwrap_or(false)
    }

    /// Set the flag; returns true if it flipped
    ///
    /// Flags never go back to false.
    pub fn mark_complete(&mut self, migration: &str) -> bool {
        let flag = self.migrations.entry(migration.to_string()).or_insert(false);
        let flipped = !*flag;
        *flag = true;
        flipped
    }
}

/// Resumable checkpoint of a long-running migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub migration_name: String,
    /// Done: succeeded, or terminally failed and not to be retried
    #[serde(default)]
    pub processed_keys: BTreeSet<String>,
    /// Failed with a retryable error; retried by the next run
    #[serde(default)]
    pub failed_keys: BTreeSet<String>,
    /// Terminally failed keys (subset of `processed_keys`), kept for reporting
    #[serde(default)]
    pub skipped_keys: BTreeSet<String>,
    pub total_count: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationProgress {
    pub fn new(migration_name: impl Into<String>, total_count: usize) -> Self {
        let now = Utc::now();
        Self {
            migration_name: migration_name.into(),
            processed_keys: BTreeSet::new(),
            failed_keys: BTreeSet::new(),
            skipped_keys: BTreeSet::new(),
            total_count,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn mark_succeeded(&mut self, key: &str) {
        self.failed_keys.remove(key);
        self.processed_keys.insert(key.to_string());
    }

    pub fn mark_retryable(&mut self, key: &str) {
        self.processed_keys.remove(key);
        self.failed_keys.insert(key.to_string());
    }

    pub fn mark_terminal(&mut self, key: &str) {
        self.failed_keys.remove(key);
        self.processed_keys.insert(key.to_string());
        self.skipped_keys.insert(key.to_string());
    }

    /// Targets still to work on: never processed, or failed and due a retry
    pub fn remaining<'a>(&self, targets: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        targets
            .into_iter()
            .filter(|key| !self.processed_keys.contains(*key) || self.failed_keys.contains(*key))
            .cloned()
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
