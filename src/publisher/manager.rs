//! Credentialed broker connection with bounded exponential backoff
//!
//! Every handshake mints a fresh credential: a token minted before a long
//! backoff sleep may be stale by the time the next attempt runs.

use super::backoff::BackoffPolicy;
use super::{is_shutdown_requested, shutdown_requested, Sleeper, TokioSleeper};
use crate::config::TelemetryConfig;
use crate::credential::CredentialSource;
use crate::error::{sanitize_error_message, ConnectError};
use crate::observability::metrics::metrics;
use crate::transport::{BrokerTransport, ConnectParams, TlsParams};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Broker identity and TLS settings shared by every attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub broker_url: String,
    pub client_id: String,
    pub username: String,
    pub tls: TlsParams,
    pub keep_alive: Duration,
    pub handshake_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            broker_url: config.mqtt.broker_url.clone(),
            client_id: config.client_id(),
            username: config.mqtt.username.clone(),
            tls: TlsParams {
                root_ca_path: config.mqtt.root_ca_path.clone(),
                client_auth: config
                    .mqtt
                    .client_cert_path
                    .clone()
                    .zip(config.mqtt.client_key_path.clone()),
            },
            keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
            handshake_timeout: Duration::from_millis(config.mqtt.handshake_timeout_ms),
        }
    }

    fn connect_params(&self, password: &str) -> ConnectParams {
        ConnectParams {
            broker_url: self.broker_url.clone(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: password.to_string(),
            tls: self.tls.clone(),
            keep_alive: self.keep_alive,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

/// Establishes authenticated broker sessions
pub struct ConnectionManager<T: BrokerTransport> {
    transport: T,
    credentials: Arc<dyn CredentialSource>,
    settings: ConnectionSettings,
    backoff: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<T: BrokerTransport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        credentials: Arc<dyn CredentialSource>,
        settings: ConnectionSettings,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            transport,
            credentials,
            settings,
            backoff,
            sleeper: Arc::new(TokioSleeper),
            shutdown: None,
        }
    }

    /// Replace the backoff timer
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Abort backoff sleeps when the flag flips to `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub(crate) fn shutdown(&self) -> Option<watch::Receiver<bool>> {
        self.shutdown.clone()
    }

    /// Open a session, retrying broker-unavailable refusals with backoff
    ///
    /// Returns `BudgetExhausted` once cumulative sleep reaches the budget.
    /// Any other failure ends the call immediately without sleeping.
    pub async fn connect(&self) -> Result<T::Session, ConnectError> {
        let mut attempt = self.backoff.start();

        loop {
            if is_shutdown_requested(&self.shutdown) {
                attempt.mark_failed("shutdown requested");
                return Err(ConnectError::Cancelled);
            }

            let number = attempt.begin();
            metrics().record_connect_attempt();

            let credential = match self.credentials.issue() {
                Ok(credential) => credential,
                Err(e) => {
                    error!(
                        phase = "connect",
                        attempt = number,
                        error = %e,
                        "Could not issue credential for session"
                    );
                    attempt.mark_failed(e.to_string());
                    metrics().record_connect_failure();
                    return Err(e.into());
                }
            };
            let params = self.settings.connect_params(credential.token());
            drop(credential);

            match self.transport.connect(&params).await {
                Ok(session) => {
                    attempt.mark_connected();
                    info!(
                        phase = "connect",
                        attempt = number,
                        elapsed_ms = attempt.total_elapsed_ms(),
                        broker = %self.settings.broker_url,
                        "Connected to broker"
                    );
                    return Ok(session);
                }
                Err(ConnectError::Retryable { reason }) => {
                    let step = attempt.register_retry();
                    metrics().record_connect_retry();
                    warn!(
                        phase = "connect",
                        attempt = number,
                        retry_in_ms = step.sleep.as_millis() as u64,
                        elapsed_ms = step.total_elapsed_ms,
                        reason = %sanitize_error_message(&reason),
                        "Broker unavailable, backing off"
                    );

                    tokio::select! {
                        _ = self.sleeper.sleep(step.sleep) => {}
                        _ = shutdown_requested(self.shutdown.clone()) => {
                            attempt.mark_failed("shutdown requested");
                            return Err(ConnectError::Cancelled);
                        }
                    }

                    if step.exhausted {
                        error!(
                            phase = "connect",
                            attempts = number,
                            elapsed_ms = step.total_elapsed_ms,
                            budget_ms = self.backoff.max_elapsed_ms,
                            "Maximum connection retry time exceeded"
                        );
                        attempt.mark_failed("retry budget exhausted");
                        metrics().record_connect_failure();
                        return Err(ConnectError::BudgetExhausted {
                            attempts: number,
                            elapsed_ms: step.total_elapsed_ms,
                        });
                    }
                }
                Err(e) => {
                    error!(
                        phase = "connect",
                        attempt = number,
                        elapsed_ms = attempt.total_elapsed_ms(),
                        error = %sanitize_error_message(&e.to_string()),
                        "Connection failed, not retrying"
                    );
                    attempt.mark_failed(e.to_string());
                    metrics().record_connect_failure();
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ConnectBehavior, MockCredentialSource, MockTransport, RecordingSleeper};

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            broker_url: "mqtts://mqtt.example.com:8883".to_string(),
            client_id: "projects/p/locations/r/registries/g/devices/testdev".to_string(),
            username: "unused".to_string(),
            tls: TlsParams::default(),
            keep_alive: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
        }
    }

    fn manager(
        transport: MockTransport,
        credentials: Arc<MockCredentialSource>,
        sleeper: Arc<RecordingSleeper>,
    ) -> ConnectionManager<MockTransport> {
        ConnectionManager::new(transport, credentials, settings(), BackoffPolicy::default())
            .with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_connects_first_try_without_sleeping() {
        let transport = MockTransport::accepting();
        let credentials = Arc::new(MockCredentialSource::new("tok"));
        let sleeper = Arc::new(RecordingSleeper::new());

        let result = manager(transport.clone(), credentials.clone(), sleeper.clone())
            .connect()
            .await;

        assert!(result.is_ok());
        assert!(sleeper.sleeps().is_empty());
        assert_eq!(credentials.issued_count(), 1);

        let attempts = transport.connect_attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].password, "tok");
        assert_eq!(attempts[0].username, "unused");
    }

    #[tokio::test]
    async fn test_fresh_credential_per_attempt() {
        let transport = MockTransport::refusing_then_accepting(3);
        let credentials = Arc::new(MockCredentialSource::new("tok"));
        let sleeper = Arc::new(RecordingSleeper::new());

        manager(transport.clone(), credentials.clone(), sleeper.clone())
            .connect()
            .await
            .unwrap();

        assert_eq!(credentials.issued_count(), 4);
        assert_eq!(transport.connect_attempts().await.len(), 4);
        assert_eq!(sleeper.sleeps_ms(), vec![500, 750, 1125]);
    }

    #[tokio::test]
    async fn test_fatal_error_does_not_retry() {
        let transport = MockTransport::with_connect_script(vec![ConnectBehavior::Reject(
            "bad user name or password".to_string(),
        )]);
        let credentials = Arc::new(MockCredentialSource::new("tok"));
        let sleeper = Arc::new(RecordingSleeper::new());

        let err = manager(transport.clone(), credentials, sleeper.clone())
            .connect()
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectError::Fatal { .. }));
        assert!(sleeper.sleeps().is_empty());
        assert_eq!(transport.connect_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_credential_failure_is_fatal_before_connecting() {
        let transport = MockTransport::accepting();
        let credentials = Arc::new(MockCredentialSource::failing());
        let sleeper = Arc::new(RecordingSleeper::new());

        let err = manager(transport.clone(), credentials, sleeper.clone())
            .connect()
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectError::Credential(_)));
        assert!(transport.connect_attempts().await.is_empty());
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_connect_cancels() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let transport = MockTransport::accepting();

        let err = manager(
            transport.clone(),
            Arc::new(MockCredentialSource::new("tok")),
            Arc::new(RecordingSleeper::new()),
        )
        .with_shutdown(rx)
        .connect()
        .await
        .err()
        .unwrap();

        assert!(matches!(err, ConnectError::Cancelled));
        assert!(transport.connect_attempts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff_sleep() {
        let (tx, rx) = watch::channel(false);
        let transport = MockTransport::always_refusing();
        let manager = ConnectionManager::new(
            transport.clone(),
            Arc::new(MockCredentialSource::new("tok")),
            settings(),
            BackoffPolicy::default(),
        )
        .with_shutdown(rx);

        let connect = tokio::spawn(async move { manager.connect().await.err() });
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        tx.send(true).unwrap();

        let err = connect.await.unwrap().unwrap();
        assert!(matches!(err, ConnectError::Cancelled));
        // 500 ms sleep finished, second attempt was mid-sleep (750 ms)
        assert_eq!(transport.connect_attempts().await.len(), 2);
    }
}
