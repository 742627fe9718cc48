//! Resilient publishing path
//!
//! - [`backoff`] - pure retry arithmetic and connection attempt state
//! - [`manager`] - [`ConnectionManager`]: credentialed connect with bounded backoff
//! - [`coordinator`] - [`PublishCoordinator`]: one connect/publish/ack/disconnect cycle
//!
//! Every cycle owns its credential, attempt state and session outright;
//! nothing is shared between cycles.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

pub mod backoff;
pub mod coordinator;
pub mod manager;

pub use backoff::{BackoffPolicy, ConnectionAttempt, ConnectionState, RetryStep};
pub use coordinator::{DeliveryReceipt, DeliveryResult, PublishCoordinator};
pub use manager::{ConnectionManager, ConnectionSettings};

/// Timer used between connection attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Resolve once shutdown has been requested
///
/// Never resolves when there is no shutdown channel or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending().await;
    };

    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Non-blocking check of the shutdown flag
pub(crate) fn is_shutdown_requested(shutdown: &Option<watch::Receiver<bool>>) -> bool {
    shutdown.as_ref().is_some_and(|rx| *rx.borrow())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_requested_resolves_on_signal() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(shutdown_requested(Some(rx)));

        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown should be observed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_already_set() {
        let (_tx, rx) = watch::channel(true);
        tokio::time::timeout(Duration::from_millis(100), shutdown_requested(Some(rx)))
            .await
            .expect("pre-set flag resolves immediately");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_requested_pending_without_channel() {
        let result =
            tokio::time::timeout(Duration::from_secs(5), shutdown_requested(None)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_is_shutdown_requested() {
        assert!(!is_shutdown_requested(&None));
        let (tx, rx) = watch::channel(false);
        let rx = Some(rx);
        assert!(!is_shutdown_requested(&rx));
        tx.send(true).unwrap();
        assert!(is_shutdown_requested(&rx));
    }
}
