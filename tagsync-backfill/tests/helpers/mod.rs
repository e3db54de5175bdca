//! Test Helper Utilities
//!
//! Shared fixtures for tagsync-backfill integration tests: a scripted
//! metadata fetcher, a coordinator-backed fetcher, a store with failing
//! writes, dataset builders and orchestrator construction.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tagsync_backfill::migration::BackfillConfig;
use tagsync_backfill::models::{Dataset, TrackIdentity, TrackRecord};
use tagsync_backfill::services::MetadataFetcher;
use tagsync_backfill::store::{keys, save_json};
use tagsync_backfill::{ApiError, LocalStore, MemoryStore, MigrationOrchestrator, RequestCoordinator};
use tagsync_common::events::{EventBus, SyncEvent};
use tagsync_common::Error;
use tokio::sync::broadcast;

pub const TEST_VERSION: &str = "1.0.0";

type IdentityResult = Result<Option<TrackIdentity>, ApiError>;
type TempoResult = Result<Option<f64>, ApiError>;

/// Fetcher answering from per-key scripts
///
/// Scripted results are consumed in order; once a key's script is exhausted
/// the fetcher answers with a healthy default (`Title <key>`, 120 BPM).
/// While the outage flag is set every call fails with a network error.
#[derive(Default)]
pub struct ScriptedFetcher {
    identity_scripts: Mutex<HashMap<String, VecDeque<IdentityResult>>>,
    tempo_scripts: Mutex<HashMap<String, VecDeque<TempoResult>>>,
    identity_calls: Mutex<HashMap<String, usize>>,
    tempo_calls: Mutex<HashMap<String, usize>>,
    outage: AtomicBool,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_identity(&self, key: &str, results: Vec<IdentityResult>) {
        self.identity_scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(results);
    }

    pub fn script_tempo(&self, key: &str, results: Vec<TempoResult>) {
        self.tempo_scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(results);
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    pub fn identity_calls(&self, key: &str) -> usize {
        self.identity_calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn tempo_calls(&self, key: &str) -> usize {
        self.tempo_calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.identity_calls.lock().unwrap().values().sum::<usize>()
            + self.tempo_calls.lock().unwrap().values().sum::<usize>()
    }
}

#[async_trait]
impl MetadataFetcher for ScriptedFetcher {
    async fn fetch_identity(&self, record_key: &str) -> IdentityResult {
        *self
            .identity_calls
            .lock()
            .unwrap()
            .entry(record_key.to_string())
            .or_default() += 1;

        if self.outage.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection refused".into()));
        }

        let scripted = self
            .identity_scripts
            .lock()
            .unwrap()
            .get_mut(record_key)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| Ok(Some(default_identity(record_key))))
    }

    async fn fetch_numeric_feature(&self, record_key: &str) -> TempoResult {
        *self
            .tempo_calls
            .lock()
            .unwrap()
            .entry(record_key.to_string())
            .or_default() += 1;

        if self.outage.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection refused".into()));
        }

        let scripted = self
            .tempo_scripts
            .lock()
            .unwrap()
            .get_mut(record_key)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or(Ok(Some(120.0)))
    }
}

/// Fetcher that routes every call through a real [`RequestCoordinator`]
///
/// The first `failures` invocations that get past the coordinator fail with
/// HTTP 503; later ones answer with the healthy defaults.
pub struct CoordinatedFetcher {
    coordinator: RequestCoordinator,
    invocations: Arc<AtomicUsize>,
    failures: usize,
}

impl CoordinatedFetcher {
    pub fn new(coordinator: RequestCoordinator, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            invocations: Arc::new(AtomicUsize::new(0)),
            failures,
        })
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    /// Calls that actually ran (not rejected by the circuit, not attached)
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    async fn call<T>(&self, call_key: String, value: T) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let invocations = Arc::clone(&self.invocations);
        let failures = self.failures;
        self.coordinator
            .execute(&call_key, move || async move {
                if invocations.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(ApiError::Http {
                        status: 503,
                        message: "unavailable".into(),
                    })
                } else {
                    Ok(value)
                }
            })
            .await
    }
}

#[async_trait]
impl MetadataFetcher for CoordinatedFetcher {
    async fn fetch_identity(&self, record_key: &str) -> IdentityResult {
        self.call(format!("getTrack:{}", record_key), Some(default_identity(record_key)))
            .await
    }

    async fn fetch_numeric_feature(&self, record_key: &str) -> TempoResult {
        self.call(format!("getAudioFeatures:{}", record_key), Some(120.0))
            .await
    }
}

/// In-memory store whose writes fail for chosen keys
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing_keys: Mutex<HashSet<String>>,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes_to(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_keys.lock().unwrap().clear();
    }
}

#[async_trait]
impl LocalStore for FailingStore {
    async fn get(&self, key: &str) -> tagsync_common::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> tagsync_common::Result<()> {
        let failing = self.failing_keys.lock().unwrap().contains(key);
        if failing {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("disk full writing {}", key),
            )));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> tagsync_common::Result<()> {
        self.inner.delete(key).await
    }
}

pub fn default_identity(key: &str) -> TrackIdentity {
    TrackIdentity {
        display_name: format!("Title {}", key),
        artists: vec!["Artist".to_string()],
    }
}

/// Rated record with no metadata (a backfill target that survives the purge)
pub fn rated_record(key: &str) -> TrackRecord {
    let mut record = TrackRecord::new(key);
    record.rating = Some(4);
    record
}

/// Rated record with every backfill field present
pub fn complete_record(key: &str) -> TrackRecord {
    let mut record = rated_record(key);
    record.name = Some(format!("Known {}", key));
    record.artists = Some(vec!["Known Artist".to_string()]);
    record.tempo = Some(100.0);
    record
}

pub fn dataset_of(records: impl IntoIterator<Item = TrackRecord>) -> Dataset {
    records.into_iter().collect()
}

pub async fn seed_dataset(store: &dyn LocalStore, dataset: &Dataset) {
    save_json(store, keys::DATASET, dataset).await.unwrap();
}

/// Defaults with a short inter-batch delay
pub fn test_config() -> BackfillConfig {
    BackfillConfig {
        batch_delay_ms: 10,
        ..Default::default()
    }
}

pub fn create_test_orchestrator(
    store: Arc<MemoryStore>,
    fetcher: Arc<ScriptedFetcher>,
    event_bus: EventBus,
    config: BackfillConfig,
) -> MigrationOrchestrator {
    MigrationOrchestrator::new(store, fetcher, event_bus, config, TEST_VERSION)
}

/// Everything currently queued on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn event_types(events: &[SyncEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}
