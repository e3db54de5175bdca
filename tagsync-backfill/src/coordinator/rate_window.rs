//! Sliding-window rate accounting
//!
//! Holds one sample per admitted call for the trailing 60 seconds. Samples
//! are recorded at admission time so that calls still in flight count
//! against the limits; the success flag is filled in when the call settles.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) const SECOND: Duration = Duration::from_secs(1);
pub(crate) const MINUTE: Duration = Duration::from_secs(60);

/// Waits used when a window is full but no sample can be located
const SECOND_FALLBACK: Duration = Duration::from_millis(100);
const MINUTE_FALLBACK: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy)]
struct RateSample {
    id: u64,
    at: Instant,
    /// None while the call is still in flight
    success: Option<bool>,
}

/// Result of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Window full; retry after this long
    Wait(Duration),
}

/// Sample counts over the trailing windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub last_second: usize,
    pub last_minute: usize,
    pub successes: usize,
    pub failures: usize,
}

#[derive(Debug)]
pub struct RateWindow {
    samples: VecDeque<RateSample>,
    max_per_second: usize,
    max_per_minute: usize,
    next_id: u64,
}

impl RateWindow {
    pub fn new(max_per_second: u32, max_per_minute: u32) -> Self {
        Self {
            samples: VecDeque::new(),
            max_per_second: max_per_second.max(1) as usize,
            max_per_minute: max_per_minute.max(1) as usize,
            next_id: 0,
        }
    }

    /// Drop samples 60s old or older
    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) >= MINUTE {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Decide whether a call may start now
    pub fn check(&mut self, now: Instant) -> Admission {
        self.prune(now);

        if self.count_within(now, SECOND) >= self.max_per_second {
            let wait = self
                .oldest_within(now, SECOND)
                .map(|at| SECOND.saturating_sub(now.duration_since(at)))
                .filter(|d| !d.is_zero())
                .unwrap_or(SECOND_FALLBACK);
            return Admission::Wait(wait);
        }

        if self.samples.len() >= self.max_per_minute {
            let wait = self
                .oldest_within(now, MINUTE)
                .map(|at| MINUTE.saturating_sub(now.duration_since(at)))
                .filter(|d| !d.is_zero())
                .unwrap_or(MINUTE_FALLBACK);
            return Admission::Wait(wait);
        }

        Admission::Allowed
    }

    /// Record an admitted call, returning its sample id
    pub fn admit(&mut self, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.samples.push_back(RateSample {
            id,
            at: now,
            success: None,
        });
        id
    }

    /// Fill in the outcome of an admitted call (no-op once pruned)
    pub fn record_outcome(&mut self, id: u64, success: bool) {
        if let Some(sample) = self.samples.iter_mut().rev().find(|s| s.id == id) {
            sample.success = Some(success);
        }
    }

    pub fn counts(&mut self, now: Instant) -> WindowCounts {
        self.prune(now);
        WindowCounts {
            last_second: self.count_within(now, SECOND),
            last_minute: self.samples.len(),
            successes: self.samples.iter().filter(|s| s.success == Some(true)).count(),
            failures: self.samples.iter().filter(|s| s.success == Some(false)).count(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.samples
            .iter()
            .filter(|s| now.duration_since(s.at) < window)
            .count()
    }

    // Samples are appended in time order, so the first match is the oldest.
    fn oldest_within(&self, now: Instant, window: Duration) -> Option<Instant> {
        self.samples
            .iter()
            .find(|s| now.duration_since(s.at) < window)
            .map(|s| s.at)
    }
}
