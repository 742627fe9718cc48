//! Pure backoff arithmetic and connection attempt state
//!
//! Retry intervals start at 500 ms, grow by 1.5x (rounded to the nearest
//! millisecond) and are capped at 6000 ms. Each retry sleeps first, then
//! adds the interval to the elapsed total; the attempt sequence is abandoned
//! as soon as that total reaches the 15 minute budget.

use crate::config::BackoffSection;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_INITIAL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 6_000;
pub const DEFAULT_MAX_ELAPSED_MS: u64 = 900_000;

/// Bounded exponential backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    pub max_elapsed_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: DEFAULT_INITIAL_INTERVAL_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            max_elapsed_ms: DEFAULT_MAX_ELAPSED_MS,
        }
    }
}

impl From<&BackoffSection> for BackoffPolicy {
    fn from(section: &BackoffSection) -> Self {
        Self {
            initial_interval_ms: section.initial_interval_ms,
            multiplier: section.multiplier,
            max_interval_ms: section.max_interval_ms,
            max_elapsed_ms: section.max_elapsed_ms,
        }
    }
}

impl BackoffPolicy {
    /// Interval following `current_ms`
    pub fn next_interval(&self, current_ms: u64) -> u64 {
        let grown = (current_ms as f64 * self.multiplier).round() as u64;
        grown.min(self.max_interval_ms)
    }

    /// Fresh attempt state for one `connect()` call
    pub fn start(&self) -> ConnectionAttempt {
        ConnectionAttempt::new(self.clone())
    }

    /// Every sleep a never-available broker would cause, in order
    pub fn full_schedule(&self) -> Vec<u64> {
        let mut attempt = self.start();
        let mut schedule = Vec::new();
        loop {
            let step = attempt.register_retry();
            schedule.push(step.sleep.as_millis() as u64);
            if step.exhausted {
                return schedule;
            }
        }
    }
}

/// Connection state machine for one `connect()` call
///
/// `Connected` and `FatalFailure` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    /// Handshake in progress (1-based attempt number)
    Connecting(u32),
    /// Waiting out a backoff interval before the next attempt
    Retrying { attempt: u32, retry_in_ms: u64 },
    Connected,
    FatalFailure(String),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::FatalFailure(_))
    }
}

/// Outcome of registering one retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStep {
    /// How long to sleep before deciding
    pub sleep: Duration,
    /// Total retry time after this sleep
    pub total_elapsed_ms: u64,
    /// Budget reached: abandon after sleeping
    pub exhausted: bool,
}

/// Transient retry bookkeeping for one `connect()` call
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    policy: BackoffPolicy,
    retry_interval_ms: u64,
    total_elapsed_ms: u64,
    attempts: u32,
    state: ConnectionState,
}

impl ConnectionAttempt {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            retry_interval_ms: policy.initial_interval_ms,
            policy,
            total_elapsed_ms: 0,
            attempts: 0,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_interval_ms(&self) -> u64 {
        self.retry_interval_ms
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        self.total_elapsed_ms
    }

    /// Enter `Connecting` for the next handshake
    pub fn begin(&mut self) -> u32 {
        self.attempts += 1;
        self.transition(ConnectionState::Connecting(self.attempts));
        self.attempts
    }

    /// Record a retryable refusal and advance the interval
    pub fn register_retry(&mut self) -> RetryStep {
        let sleep_ms = self.retry_interval_ms;
        self.total_elapsed_ms += sleep_ms;
        let exhausted = self.total_elapsed_ms >= self.policy.max_elapsed_ms;
        self.retry_interval_ms = self.policy.next_interval(sleep_ms);

        self.transition(ConnectionState::Retrying {
            attempt: self.attempts,
            retry_in_ms: sleep_ms,
        });

        RetryStep {
            sleep: Duration::from_millis(sleep_ms),
            total_elapsed_ms: self.total_elapsed_ms,
            exhausted,
        }
    }

    pub fn mark_connected(&mut self) {
        self.transition(ConnectionState::Connected);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.transition(ConnectionState::FatalFailure(reason.into()));
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, "Connection state transition");
        self.state = next;
    }
}
