//! Process-wide publishing counters
//!
//! Atomic counters bumped along the publishing path. A snapshot is logged
//! when the sampling loop stops.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Lock-free counters for the publishing path
#[derive(Debug, Default)]
pub struct MetricsCollector {
    cycles_started: AtomicU64,
    connect_attempts: AtomicU64,
    connect_retries: AtomicU64,
    connect_failures: AtomicU64,
    credentials_issued: AtomicU64,
    messages_acknowledged: AtomicU64,
    ack_timeouts: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles_started: u64,
    pub connect_attempts: u64,
    pub connect_retries: u64,
    pub connect_failures: u64,
    pub credentials_issued: u64,
    pub messages_acknowledged: u64,
    pub ack_timeouts: u64,
    pub publish_failures: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_retry(&self) {
        self.connect_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_credential_issued(&self) {
        self.credentials_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_acknowledged(&self) {
        self.messages_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_retries: self.connect_retries.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            credentials_issued: self.credentials_issued.load(Ordering::Relaxed),
            messages_acknowledged: self.messages_acknowledged.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let collector = MetricsCollector::new();
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.cycles_started, 0);
        assert_eq!(snapshot.messages_acknowledged, 0);
    }

    #[test]
    fn test_counters_increment() {
        let collector = MetricsCollector::new();
        collector.record_cycle_started();
        collector.record_connect_attempt();
        collector.record_connect_attempt();
        collector.record_connect_retry();
        collector.record_credential_issued();
        collector.record_ack_timeout();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.cycles_started, 1);
        assert_eq!(snapshot.connect_attempts, 2);
        assert_eq!(snapshot.connect_retries, 1);
        assert_eq!(snapshot.credentials_issued, 1);
        assert_eq!(snapshot.ack_timeouts, 1);
        assert_eq!(snapshot.publish_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsCollector::new().snapshot()).unwrap();
        assert_eq!(json["connect_retries"], 0);
    }
}
