//! Trip-and-cool-down circuit breaker state
//!
//! There is no half-open probe and no background timer: the cool-down is
//! checked lazily by the next call, which closes the circuit if it elapsed.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct CircuitState {
    open: bool,
    opened_at: Option<Instant>,
    consecutive_errors: u32,
}

impl CircuitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate a call. Returns `Err(retry_after_ms)` while cooling down.
    pub fn check(&mut self, now: Instant, cool_down: Duration) -> Result<(), u64> {
        if !self.open {
            return Ok(());
        }

        let elapsed = self
            .opened_at
            .map(|at| now.duration_since(at))
            .unwrap_or(cool_down);

        if elapsed >= cool_down {
            tracing::info!(
                cool_down_ms = cool_down.as_millis() as u64,
                "Circuit breaker cool-down elapsed, closing circuit"
            );
            self.reset();
            return Ok(());
        }

        let remaining = (cool_down - elapsed).as_millis() as u64;
        Err(remaining.max(1))
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Count a failure; returns true if this failure tripped the circuit
    pub fn record_failure(&mut self, now: Instant, threshold: u32) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if !self.open && self.consecutive_errors >= threshold {
            self.open = true;
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.open = false;
        self.opened_at = None;
        self.consecutive_errors = 0;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}
