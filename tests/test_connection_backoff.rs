//! Connection manager retry behavior
//!
//! A recording sleeper stands in for the timer, so the full fifteen minute
//! retry budget runs instantly and every requested sleep can be inspected.

use iot_telemetry::error::ConnectError;
use iot_telemetry::publisher::{BackoffPolicy, ConnectionManager, ConnectionSettings};
use iot_telemetry::testing::{
    ConnectBehavior, MockCredentialSource, MockTransport, RecordingSleeper,
};
use iot_telemetry::transport::TlsParams;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        broker_url: "mqtts://mqtt.example.com:8883".to_string(),
        client_id: "projects/p/locations/r/registries/g/devices/d".to_string(),
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
async fn test_two_refusals_then_success() {
    let transport = MockTransport::refusing_then_accepting(2);
    let credentials = Arc::new(MockCredentialSource::new("jwt"));
    let sleeper = Arc::new(RecordingSleeper::new());

    manager(transport.clone(), credentials.clone(), sleeper.clone())
        .connect()
        .await
        .unwrap();

    assert_eq!(sleeper.sleeps_ms(), vec![500, 750]);
    assert_eq!(transport.connect_attempts().await.len(), 3);
    assert_eq!(credentials.issued_count(), 3);
}

#[tokio::test]
async fn test_every_attempt_carries_identity_and_token() {
    let transport = MockTransport::refusing_then_accepting(1);
    let sleeper = Arc::new(RecordingSleeper::new());

    manager(
        transport.clone(),
        Arc::new(MockCredentialSource::new("jwt")),
        sleeper,
    )
    .connect()
    .await
    .unwrap();

    for params in transport.connect_attempts().await {
        assert_eq!(params.client_id, "projects/p/locations/r/registries/g/devices/d");
        assert_eq!(params.username, "unused");
        assert_eq!(params.password, "jwt");
    }
}

#[tokio::test]
async fn test_unavailable_broker_exhausts_budget() {
    let transport = MockTransport::always_refusing();
    let sleeper = Arc::new(RecordingSleeper::new());

    let err = manager(
        transport.clone(),
        Arc::new(MockCredentialSource::new("jwt")),
        sleeper.clone(),
    )
    .connect()
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ConnectError::BudgetExhausted {
            attempts: 155,
            elapsed_ms: 904_090
        }
    ));

    let sleeps = sleeper.sleeps_ms();
    assert_eq!(sleeps.len(), 155);
    assert_eq!(&sleeps[..8], &[500, 750, 1125, 1688, 2532, 3798, 5697, 6000]);
    assert!(sleeps[7..].iter().all(|&ms| ms == 6000));
    assert_eq!(sleeper.total_ms(), 904_090);
    assert_eq!(transport.connect_attempts().await.len(), 155);
}

#[tokio::test]
async fn test_fatal_refusal_never_sleeps() {
    let transport =
        MockTransport::with_connect_script(vec![ConnectBehavior::Reject("not authorized".into())]);
    let sleeper = Arc::new(RecordingSleeper::new());

    let err = manager(
        transport.clone(),
        Arc::new(MockCredentialSource::new("jwt")),
        sleeper.clone(),
    )
    .connect()
    .await
    .unwrap_err();

    assert!(matches!(err, ConnectError::Fatal { ref reason } if reason == "not authorized"));
    assert!(sleeper.sleeps().is_empty());
    assert_eq!(transport.connect_attempts().await.len(), 1);
}

#[tokio::test]
async fn test_fatal_after_retries_stops_immediately() {
    let transport = MockTransport::with_connect_script(vec![
        ConnectBehavior::Refuse,
        ConnectBehavior::Refuse,
        ConnectBehavior::Reject("bad user name or password".into()),
    ]);
    let sleeper = Arc::new(RecordingSleeper::new());

    let err = manager(
        transport.clone(),
        Arc::new(MockCredentialSource::new("jwt")),
        sleeper.clone(),
    )
    .connect()
    .await
    .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(sleeper.sleeps_ms(), vec![500, 750]);
    assert_eq!(transport.connect_attempts().await.len(), 3);
}

#[tokio::test]
async fn test_credential_failure_skips_connect() {
    let transport = MockTransport::accepting();
    let sleeper = Arc::new(RecordingSleeper::new());

    let err = manager(
        transport.clone(),
        Arc::new(MockCredentialSource::failing()),
        sleeper.clone(),
    )
    .connect()
    .await
    .unwrap_err();

    assert!(matches!(err, ConnectError::Credential(_)));
    assert!(transport.connect_attempts().await.is_empty());
    assert!(sleeper.sleeps().is_empty());
}

#[tokio::test]
async fn test_shutdown_before_connect_cancels() {
    let (_tx, rx) = watch::channel(true);
    let transport = MockTransport::accepting();

    let err = manager(
        transport.clone(),
        Arc::new(MockCredentialSource::new("jwt")),
        Arc::new(RecordingSleeper::new()),
    )
    .with_shutdown(rx)
    .connect()
    .await
    .unwrap_err();

    assert!(matches!(err, ConnectError::Cancelled));
    assert!(transport.connect_attempts().await.is_empty());
}

#[tokio::test]
async fn test_each_connect_call_restarts_backoff() {
    let transport = MockTransport::with_connect_script(vec![
        ConnectBehavior::Refuse,
        ConnectBehavior::Accept,
        ConnectBehavior::Refuse,
        ConnectBehavior::Accept,
    ]);
    let sleeper = Arc::new(RecordingSleeper::new());
    let manager = manager(
        transport,
        Arc::new(MockCredentialSource::new("jwt")),
        sleeper.clone(),
    );

    manager.connect().await.unwrap();
    manager.connect().await.unwrap();

    assert_eq!(sleeper.sleeps_ms(), vec![500, 500]);
}
