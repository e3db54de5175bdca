//! Metadata backfill
//!
//! Fills missing `name`/`artists`/`tempo` on eligible records. Work is split
//! into a cache pass (no API calls) and a network pass in fixed-size batches.
//!
//! Failures are absorbed at three levels:
//! - record: retryable errors are retried with exponential backoff
//! - batch: any failure in a batch grows the inter-batch delay
//! - migration: too many failing batches in a row pauses the run
//!
//! Progress is checkpointed so an interrupted run resumes where it stopped.

use super::checkpoint;
use super::{Migration, MigrationError, MigrationOrchestrator, PauseReason};
use crate::error::ApiError;
use crate::models::{Dataset, MigrationProgress, MissingFields, TrackMetadata};
use crate::services::MetadataFetcher;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tagsync_common::events::SyncEvent;
use tagsync_common::time::now;
use tracing::{debug, error, info, warn};

/// Outcome of a completed backfill
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Records that needed backfill at the start of the run
    pub targets: usize,
    pub resolved_from_cache: usize,
    pub fetched: usize,
    /// Terminally failed, never retried
    pub skipped: usize,
    /// Records with at least one field filled
    pub updated_records: usize,
}

/// Settled per-record effort
#[derive(Debug)]
enum RecordOutcome {
    Updated(TrackMetadata),
    Retryable(ApiError),
    Terminal(ApiError),
}

pub(super) async fn run(
    orch: &MigrationOrchestrator,
    dataset: &mut Dataset,
) -> Result<BackfillSummary, MigrationError> {
    let name = Migration::BackfillMetadata.name();
    let store = orch.store.as_ref();
    let config = &orch.config;

    let targets: Vec<String> = dataset
        .iter()
        .filter(|record| record.needs_backfill())
        .map(|record| record.key.clone())
        .collect();

    let mut summary = BackfillSummary {
        targets: targets.len(),
        ..Default::default()
    };

    if targets.is_empty() {
        info!(migration = name, "No records need backfill");
        checkpoint::clear_progress(store).await;
        return Ok(summary);
    }

    let mut progress = match checkpoint::load_progress(store, name).await {
        Some(mut progress) => {
            // Target set may have changed since the checkpoint was written
            progress.total_count = targets.len();
            info!(
                migration = name,
                processed = progress.processed_keys.len(),
                failed = progress.failed_keys.len(),
                started_at = %progress.started_at,
                "Resuming from checkpoint"
            );
            progress
        }
        None => MigrationProgress::new(name, targets.len()),
    };

    let remaining = progress.remaining(&targets);
    if remaining.is_empty() {
        info!(migration = name, "Checkpoint covers every target");
        checkpoint::clear_progress(store).await;
        return Ok(summary);
    }

    info!(
        migration = name,
        targets = targets.len(),
        remaining = remaining.len(),
        "Starting metadata backfill"
    );
    orch.event_bus.emit_lossy(SyncEvent::MigrationStarted {
        migration: name.to_string(),
        timestamp: now(),
    });
    checkpoint::save_progress(store, &progress).await;

    // Cache pass
    let mut cache = checkpoint::load_cache(store).await;
    let mut needs_work = Vec::new();
    for key in remaining {
        match cache.get(&key) {
            Some(cached) => {
                if let Some(record) = dataset.get_mut(&key) {
                    if record.apply(cached) {
                        summary.updated_records += 1;
                    }
                }
                progress.mark_succeeded(&key);
                summary.resolved_from_cache += 1;
            }
            None => needs_work.push(key),
        }
    }

    if summary.resolved_from_cache > 0 {
        info!(
            migration = name,
            resolved = summary.resolved_from_cache,
            "Resolved records from local cache"
        );
        progress.touch();
        checkpoint::save(store, &progress, dataset, None).await;
    }

    // Network pass
    let batch_count = needs_work.len().div_ceil(config.batch_size);
    let mut delay_ms = config.batch_delay_ms;
    let mut consecutive_failures = 0u32;
    let mut batches_since_checkpoint = 0usize;
    let mut cache_dirty = false;

    for (index, batch) in needs_work.chunks(config.batch_size).enumerate() {
        let jobs: Vec<(String, MissingFields)> = batch
            .iter()
            .filter_map(|key| dataset.get(key).map(|r| (key.clone(), r.missing_fields())))
            .collect();

        let outcomes: Vec<(String, RecordOutcome)> = stream::iter(jobs)
            .map(|(key, missing)| async move {
                let outcome = fetch_record(orch, &key, missing).await;
                (key, outcome)
            })
            .buffer_unordered(config.batch_size)
            .collect()
            .await;

        let mut batch_failures = 0usize;
        for (key, outcome) in outcomes {
            match outcome {
                RecordOutcome::Updated(metadata) => {
                    if let Some(record) = dataset.get_mut(&key) {
                        if record.apply(&metadata) {
                            summary.updated_records += 1;
                        }
                    }
                    progress.mark_succeeded(&key);
                    cache.insert(key, metadata);
                    cache_dirty = true;
                    summary.fetched += 1;
                }
                RecordOutcome::Retryable(e) => {
                    warn!(key = %key, error = %e, "Record failed, will retry on a later run");
                    progress.mark_retryable(&key);
                    batch_failures += 1;
                }
                RecordOutcome::Terminal(e) => {
                    error!(key = %key, error = %e, "Record failed permanently, skipping");
                    progress.mark_terminal(&key);
                    summary.skipped += 1;
                    batch_failures += 1;
                }
            }
        }
        progress.touch();
        batches_since_checkpoint += 1;

        if batch_failures > 0 {
            consecutive_failures += 1;
            delay_ms = next_batch_delay(config, delay_ms);
        } else {
            consecutive_failures = 0;
            delay_ms = config.batch_delay_ms;
        }

        debug!(
            batch = index + 1,
            batches = batch_count,
            failures = batch_failures,
            consecutive_failures,
            next_delay_ms = delay_ms,
            "Batch settled"
        );
        orch.event_bus.emit_lossy(SyncEvent::MigrationProgress {
            migration: name.to_string(),
            processed: progress.processed_keys.len(),
            failed: progress.failed_keys.len(),
            total: progress.total_count,
            timestamp: now(),
        });

        if consecutive_failures >= config.max_consecutive_failures {
            checkpoint::save(store, &progress, dataset, cache_dirty.then_some(&cache)).await;
            let remaining = progress.remaining(&targets).len();
            warn!(
                migration = name,
                consecutive_failures,
                remaining,
                "Too many failing batches, pausing backfill"
            );
            return Err(MigrationError::Paused {
                migration: name.to_string(),
                reason: PauseReason::ConsecutiveFailures,
                consecutive_failures,
                remaining,
                updated_records: summary.updated_records,
            });
        }

        if batches_since_checkpoint >= config.checkpoint_every_batches {
            checkpoint::save(store, &progress, dataset, cache_dirty.then_some(&cache)).await;
            batches_since_checkpoint = 0;
            cache_dirty = false;
        }

        if index + 1 < batch_count {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    if batches_since_checkpoint > 0 {
        checkpoint::save(store, &progress, dataset, cache_dirty.then_some(&cache)).await;
    }

    let retry_later = targets
        .iter()
        .filter(|key| progress.failed_keys.contains(*key))
        .count();
    if retry_later > 0 {
        return Err(MigrationError::Paused {
            migration: name.to_string(),
            reason: PauseReason::RetryableFailuresRemaining,
            consecutive_failures,
            remaining: retry_later,
            updated_records: summary.updated_records,
        });
    }

    checkpoint::clear_progress(store).await;
    Ok(summary)
}

/// Per-record effort with retry on retryable errors
///
/// Fields fetched by an earlier attempt are kept, so a retry only asks for
/// what is still missing. A terminal error discards everything fetched.
async fn fetch_record(orch: &MigrationOrchestrator, key: &str, missing: MissingFields) -> RecordOutcome {
    let config = &orch.config;
    let mut pending = PendingFetch::new(missing);
    let mut attempt = 1u32;

    loop {
        match pending.advance(orch.fetcher.as_ref(), key).await {
            Ok(()) => return RecordOutcome::Updated(pending.metadata),
            Err(e) if !e.is_retryable() => return RecordOutcome::Terminal(e),
            Err(e) if attempt >= config.max_record_attempts => return RecordOutcome::Retryable(e),
            Err(e) => {
                let delay = retry_delay(
                    config.retry_base_delay_ms,
                    config.retry_max_delay_ms,
                    attempt,
                    e.retry_after_ms(),
                );
                debug!(
                    key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying record"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

struct PendingFetch {
    metadata: TrackMetadata,
    need_identity: bool,
    need_tempo: bool,
}

impl PendingFetch {
    fn new(missing: MissingFields) -> Self {
        Self {
            metadata: TrackMetadata::default(),
            need_identity: missing.identity,
            need_tempo: missing.tempo,
        }
    }

    async fn advance(&mut self, fetcher: &dyn MetadataFetcher, key: &str) -> Result<(), ApiError> {
        if self.need_identity {
            if let Some(identity) = fetcher.fetch_identity(key).await? {
                self.metadata = std::mem::take(&mut self.metadata).with_identity(identity);
            }
            self.need_identity = false;
        }
        if self.need_tempo {
            self.metadata.tempo = fetcher.fetch_numeric_feature(key).await?;
            self.need_tempo = false;
        }
        Ok(())
    }
}

/// Exponential backoff for attempt `attempt` (1-based), honoring a server hint
fn retry_delay(base_ms: u64, max_ms: u64, attempt: u32, hint_ms: Option<u64>) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let backoff = base_ms.saturating_mul(1u64 << exponent);
    let wait = backoff.max(hint_ms.unwrap_or(0)).min(max_ms);
    Duration::from_millis(wait)
}

fn next_batch_delay(config: &super::BackfillConfig, current_ms: u64) -> u64 {
    let grown = (current_ms as f64 * config.batch_delay_multiplier).round() as u64;
    grown.clamp(config.batch_delay_ms, config.batch_delay_max_ms)
}
