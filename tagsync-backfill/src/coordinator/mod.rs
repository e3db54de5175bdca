//! Request coordinator for the external metadata API
//!
//! Every outbound call goes through [`RequestCoordinator::execute`], which
//! enforces, in order:
//! 1. Circuit breaker (fail fast while cooling down, lazy auto-reset)
//! 2. In-flight deduplication by key (attach to the outstanding call)
//! 3. Sliding-window rate limits (wait and re-check, bounded)
//! 4. Per-call timeout
//!
//! All mutable state lives behind one mutex so counts and the pending-call
//! table are updated atomically. The mutex is never held across the call
//! itself.

mod circuit;
mod rate_window;

pub use rate_window::{Admission, WindowCounts};

use crate::error::ApiError;
use circuit::CircuitState;
use futures::future::{BoxFuture, FutureExt, Shared};
use rate_window::RateWindow;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tagsync_common::config::CoordinatorSection;
use tagsync_common::time::{duration_to_millis, millis_to_duration};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Coordinator tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub max_requests_per_second: u32,
    pub max_requests_per_minute: u32,
    /// Consecutive failures that trip the circuit
    pub circuit_breaker_threshold: u32,
    /// Cool-down before a tripped circuit closes again
    pub circuit_breaker_reset_ms: u64,
    pub request_timeout_ms: u64,
    /// Upper bound on rate-limit waits within one `execute` call
    pub max_rate_limit_waits: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 10,
            max_requests_per_minute: 180,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_ms: 30_000,
            request_timeout_ms: 10_000,
            max_rate_limit_waits: 100,
        }
    }
}

impl CoordinatorConfig {
    /// Overlay the optional values of a `[coordinator]` TOML table
    pub fn with_overrides(mut self, section: &CoordinatorSection) -> Self {
        if let Some(v) = section.max_requests_per_second {
            self.max_requests_per_second = v;
        }
        if let Some(v) = section.max_requests_per_minute {
            self.max_requests_per_minute = v;
        }
        if let Some(v) = section.circuit_breaker_threshold {
            self.circuit_breaker_threshold = v;
        }
        if let Some(v) = section.circuit_breaker_reset_ms {
            self.circuit_breaker_reset_ms = v;
        }
        if let Some(v) = section.request_timeout_ms {
            self.request_timeout_ms = v;
        }
        if let Some(v) = section.max_rate_limit_waits {
            self.max_rate_limit_waits = v;
        }
        self
    }

    fn request_timeout(&self) -> Duration {
        millis_to_duration(self.request_timeout_ms)
    }

    fn circuit_cool_down(&self) -> Duration {
        millis_to_duration(self.circuit_breaker_reset_ms)
    }
}

/// Point-in-time view of coordinator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub successes_last_minute: usize,
    pub failures_last_minute: usize,
    pub circuit_open: bool,
    pub consecutive_errors: u32,
    pub pending_calls: usize,
}

type CallValue = Arc<dyn Any + Send + Sync>;
type SharedOutcome = Shared<BoxFuture<'static, Result<CallValue, ApiError>>>;

struct PendingCall {
    id: u64,
    started_at: Instant,
    outcome: SharedOutcome,
}

struct CoordinatorState {
    window: RateWindow,
    circuit: CircuitState,
    pending: HashMap<String, PendingCall>,
    next_call_id: u64,
}

enum Step {
    Attach(SharedOutcome),
    Run(SharedOutcome),
    Wait(Duration),
}

/// Rate-limited, circuit-broken, deduplicating call executor
///
/// Cloning is cheap; clones share limits and state. Create one instance per
/// external endpoint.
#[derive(Clone)]
pub struct RequestCoordinator {
    name: Arc<str>,
    config: Arc<CoordinatorConfig>,
    state: Arc<Mutex<CoordinatorState>>,
}

impl RequestCoordinator {
    pub fn new(name: impl Into<String>, config: CoordinatorConfig) -> Self {
        let state = CoordinatorState {
            window: RateWindow::new(config.max_requests_per_second, config.max_requests_per_minute),
            circuit: CircuitState::new(),
            pending: HashMap::new(),
            next_call_id: 0,
        };

        Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Execute `operation` under the coordinator's limits
    ///
    /// Calls sharing `key` while one is in flight (started less than
    /// `request_timeout_ms` ago) attach to that call and observe its outcome;
    /// `operation` is then never invoked.
    pub async fn execute<T, F, Fut>(&self, key: &str, operation: F) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let mut operation = Some(operation);
        let mut waits = 0u32;

        loop {
            let step = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if let Err(retry_after_ms) = state.circuit.check(now, self.config.circuit_cool_down()) {
                    tracing::debug!(
                        coordinator = %self.name,
                        key,
                        retry_after_ms,
                        "Circuit open, rejecting call"
                    );
                    return Err(ApiError::CircuitOpen { retry_after_ms });
                }

                match self.attachable(&state, key, now) {
                    Some(outcome) => Step::Attach(outcome),
                    None => match state.window.check(now) {
                        Admission::Wait(wait) => Step::Wait(wait),
                        Admission::Allowed => {
                            let operation = operation.take().ok_or_else(|| {
                                ApiError::Terminal(format!("Operation for '{}' already consumed", key))
                            })?;
                            Step::Run(self.start_call(&mut state, key, now, operation))
                        }
                    },
                }
            };

            match step {
                Step::Attach(outcome) => {
                    tracing::debug!(coordinator = %self.name, key, "Attaching to in-flight call");
                    return downcast(key, outcome.await?);
                }
                Step::Run(outcome) => return downcast(key, outcome.await?),
                Step::Wait(wait) => {
                    if waits >= self.config.max_rate_limit_waits {
                        tracing::warn!(
                            coordinator = %self.name,
                            key,
                            waits,
                            "Rate limit wait budget exhausted"
                        );
                        return Err(ApiError::RateLimited {
                            retry_after_ms: Some(duration_to_millis(wait)),
                        });
                    }
                    waits += 1;
                    tracing::debug!(
                        coordinator = %self.name,
                        key,
                        wait_ms = duration_to_millis(wait),
                        "Rate limiting: waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Current counters (prunes the rolling history)
    pub async fn stats(&self) -> CoordinatorStats {
        let mut state = self.state.lock().await;
        let counts = state.window.counts(Instant::now());
        CoordinatorStats {
            requests_last_second: counts.last_second,
            requests_last_minute: counts.last_minute,
            successes_last_minute: counts.successes,
            failures_last_minute: counts.failures,
            circuit_open: state.circuit.is_open(),
            consecutive_errors: state.circuit.consecutive_errors(),
            pending_calls: state.pending.len(),
        }
    }

    /// Forget history, close the circuit and drop pending entries
    ///
    /// Calls already in flight still complete for their callers.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.window.clear();
        state.circuit.reset();
        state.pending.clear();
        tracing::info!(coordinator = %self.name, "Coordinator state reset");
    }

    fn attachable(&self, state: &CoordinatorState, key: &str, now: Instant) -> Option<SharedOutcome> {
        state
            .pending
            .get(key)
            .filter(|pending| now.duration_since(pending.started_at) < self.config.request_timeout())
            .map(|pending| pending.outcome.clone())
    }

    fn start_call<T, F, Fut>(
        &self,
        state: &mut CoordinatorState,
        key: &str,
        now: Instant,
        operation: F,
    ) -> SharedOutcome
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let call_id = state.next_call_id;
        state.next_call_id += 1;
        let sample_id = state.window.admit(now);

        let outcome = run_call(
            Arc::clone(&self.state),
            Arc::clone(&self.config),
            Arc::clone(&self.name),
            key.to_string(),
            call_id,
            sample_id,
            operation,
        )
        .boxed()
        .shared();

        // Replaces a timed-out entry for the same key, if any
        state.pending.insert(
            key.to_string(),
            PendingCall {
                id: call_id,
                started_at: now,
                outcome: outcome.clone(),
            },
        );

        outcome
    }
}

async fn run_call<T, F, Fut>(
    state: Arc<Mutex<CoordinatorState>>,
    config: Arc<CoordinatorConfig>,
    name: Arc<str>,
    key: String,
    call_id: u64,
    sample_id: u64,
    operation: F,
) -> Result<CallValue, ApiError>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    let outcome = match tokio::time::timeout(config.request_timeout(), operation()).await {
        Ok(Ok(value)) => Ok(Arc::new(value) as CallValue),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ApiError::Timeout {
            after_ms: config.request_timeout_ms,
        }),
    };

    let mut state = state.lock().await;
    state.window.record_outcome(sample_id, outcome.is_ok());

    match &outcome {
        Ok(_) => state.circuit.record_success(),
        Err(e) => {
            let tripped = state
                .circuit
                .record_failure(Instant::now(), config.circuit_breaker_threshold);
            if tripped {
                tracing::warn!(
                    coordinator = %name,
                    key = %key,
                    consecutive_errors = state.circuit.consecutive_errors(),
                    cool_down_ms = config.circuit_breaker_reset_ms,
                    error = %e,
                    "Circuit breaker opened"
                );
            } else {
                tracing::debug!(coordinator = %name, key = %key, error = %e, "Call failed");
            }
        }
    }

    if state.pending.get(&key).is_some_and(|p| p.id == call_id) {
        state.pending.remove(&key);
    }

    outcome
}

fn downcast<T: Clone + 'static>(key: &str, value: CallValue) -> Result<T, ApiError> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        ApiError::Terminal(format!("Deduplicated call '{}' produced a different result type", key))
    })
}
