//! One publish cycle: connect, publish at QoS 1, wait for the PUBACK, disconnect
//!
//! The session is closed on every path once it exists, whether delivery was
//! acknowledged, timed out, failed or was interrupted by shutdown.

use super::manager::ConnectionManager;
use super::shutdown_requested;
use crate::config::TelemetryConfig;
use crate::error::{sanitize_error_message, PublishError};
use crate::observability::metrics::metrics;
use crate::transport::{BrokerSession, BrokerTransport, DeliveryToken, Message};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(10);

/// Proof that the broker acknowledged a message
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub token: DeliveryToken,
    pub topic: String,
    /// Time from publish submission to acknowledgment
    pub latency: Duration,
}

/// Outcome of one publish cycle
pub type DeliveryResult = Result<DeliveryReceipt, PublishError>;

/// Runs single publish cycles over fresh sessions
pub struct PublishCoordinator<T: BrokerTransport> {
    manager: ConnectionManager<T>,
    ack_timeout: Duration,
    disconnect_grace: Duration,
}

impl<T: BrokerTransport> PublishCoordinator<T> {
    pub fn new(manager: ConnectionManager<T>) -> Self {
        Self {
            manager,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
        }
    }

    pub fn with_timeouts(mut self, ack_timeout: Duration, disconnect_grace: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self.disconnect_grace = disconnect_grace;
        self
    }

    /// Apply `[mqtt]` timeouts from configuration
    pub fn configured(self, config: &TelemetryConfig) -> Self {
        self.with_timeouts(
            Duration::from_millis(config.mqtt.ack_timeout_ms),
            Duration::from_millis(config.mqtt.disconnect_grace_ms),
        )
    }

    pub fn manager(&self) -> &ConnectionManager<T> {
        &self.manager
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Connect, publish `message` once and wait for its acknowledgment
    ///
    /// The acknowledgment deadline also bounds the publish itself. A timeout
    /// is reported as `PublishError::TimedOut`; it is never retried here.
    /// The next cycle opens a new connection.
    pub async fn publish_once(&self, message: &Message) -> DeliveryResult {
        metrics().record_cycle_started();

        let mut session = self.manager.connect().await?;
        let outcome = self.deliver(&mut session, message).await;
        session.disconnect(self.disconnect_grace).await;

        match &outcome {
            Ok(receipt) => {
                metrics().record_message_acknowledged();
                info!(
                    phase = "publish",
                    topic = %receipt.topic,
                    token = %receipt.token,
                    latency_ms = receipt.latency.as_millis() as u64,
                    "Message delivery confirmed"
                );
            }
            Err(PublishError::TimedOut { token, timeout_ms }) => {
                metrics().record_ack_timeout();
                warn!(
                    phase = "publish",
                    topic = %message.topic(),
                    token = ?token,
                    timeout_ms,
                    "No delivery acknowledgment before timeout"
                );
            }
            Err(e) => {
                metrics().record_publish_failure();
                warn!(
                    phase = "publish",
                    topic = %message.topic(),
                    error = %sanitize_error_message(&e.to_string()),
                    "Publish failed"
                );
            }
        }

        outcome
    }

    /// Publish and acknowledgment share one deadline and one shutdown watch
    async fn deliver(&self, session: &mut T::Session, message: &Message) -> DeliveryResult {
        let started = Instant::now();
        let timeout_ms = self.ack_timeout.as_millis() as u64;
        let mut assigned = None;

        let exchange = async {
            let token = session.publish(message).await?;
            assigned = Some(token);

            info!(
                phase = "publish",
                topic = %message.topic(),
                %token,
                qos = message.qos().level(),
                timeout_ms,
                "Waiting for publication acknowledgment"
            );

            session.wait_for_ack(token).await.map(|()| token)
        };

        let outcome = tokio::select! {
            acked = tokio::time::timeout(self.ack_timeout, exchange) => Some(acked),
            _ = shutdown_requested(self.manager.shutdown()) => None,
        };

        match outcome {
            Some(Ok(Ok(token))) => Ok(DeliveryReceipt {
                token,
                topic: message.topic().to_string(),
                latency: started.elapsed(),
            }),
            Some(Ok(Err(e))) => Err(e),
            Some(Err(_)) => Err(PublishError::TimedOut {
                token: assigned,
                timeout_ms,
            }),
            None => Err(PublishError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{BackoffPolicy, ConnectionSettings};
    use crate::testing::{AckBehavior, MockCredentialSource, MockTransport, RecordingSleeper};
    use crate::transport::TlsParams;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn coordinator(transport: MockTransport) -> PublishCoordinator<MockTransport> {
        let settings = ConnectionSettings {
            broker_url: "mqtts://mqtt.example.com".to_string(),
            client_id: "client".to_string(),
            username: "unused".to_string(),
            tls: TlsParams::default(),
            keep_alive: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
        };
        let manager = ConnectionManager::new(
            transport,
            Arc::new(MockCredentialSource::new("tok")),
            settings,
            BackoffPolicy::default(),
        )
        .with_sleeper(Arc::new(RecordingSleeper::new()));
        PublishCoordinator::new(manager)
    }

    #[tokio::test]
    async fn test_acknowledged_publish_disconnects() {
        let transport = MockTransport::accepting();
        let message = Message::new("/devices/d/events", "1");

        let receipt = coordinator(transport.clone())
            .publish_once(&message)
            .await
            .unwrap();

        assert_eq!(receipt.topic, "/devices/d/events");
        assert_eq!(transport.published().await, vec![message]);
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_default_timeouts() {
        let coordinator = coordinator(MockTransport::accepting());
        assert_eq!(coordinator.ack_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_connection_lost_still_disconnects() {
        let transport =
            MockTransport::accepting().with_ack(AckBehavior::Lose("socket closed".to_string()));

        let err = coordinator(transport.clone())
            .publish_once(&Message::new("/devices/d/events", "1"))
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::ConnectionLost { .. }));
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_broker_rejection_reported() {
        let transport =
            MockTransport::accepting().with_ack(AckBehavior::Reject("topic denied".to_string()));

        let err = coordinator(transport.clone())
            .publish_once(&Message::new("/devices/d/events", "1"))
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::BrokerRejected { .. }));
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_ack_wait() {
        let (tx, rx) = watch::channel(false);
        let transport = MockTransport::accepting().with_ack(AckBehavior::Never);
        let coordinator = {
            let c = coordinator(transport.clone());
            PublishCoordinator::new(c.manager.with_shutdown(rx))
        };

        let publish = tokio::spawn(async move {
            coordinator
                .publish_once(&Message::new("/devices/d/events", "1"))
                .await
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();

        let err = publish.await.unwrap().unwrap_err();
        assert!(matches!(err, PublishError::Cancelled));
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_publish_hits_ack_deadline() {
        let transport = MockTransport::accepting().with_stalled_publish();
        let started = tokio::time::Instant::now();

        let err = coordinator(transport.clone())
            .publish_once(&Message::new("/devices/d/events", "1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::TimedOut {
                token: None,
                timeout_ms: 10_000
            }
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(transport.published().await.is_empty());
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_stalled_publish() {
        let (tx, rx) = watch::channel(false);
        let transport = MockTransport::accepting().with_stalled_publish();
        let coordinator = {
            let c = coordinator(transport.clone());
            PublishCoordinator::new(c.manager.with_shutdown(rx))
        };

        let publish = tokio::spawn(async move {
            coordinator
                .publish_once(&Message::new("/devices/d/events", "1"))
                .await
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();

        let err = publish.await.unwrap().unwrap_err();
        assert!(matches!(err, PublishError::Cancelled));
        assert_eq!(transport.disconnect_count(), 1);
    }
}
