//! Mock implementations for testing
//!
//! Provides a scripted broker transport, recording sleeper, fixed clock,
//! static signer, static credential source and scripted sensor so the
//! publishing path can be exercised without a broker, a key or a GPIO pin.

use crate::credential::{
    Claims, Clock, Credential, CredentialError, CredentialSource, SigningAlgorithm, TokenSigner,
};
use crate::error::{ConnectError, PublishError};
use crate::publisher::Sleeper;
use crate::sensor::{Sensor, SensorError};
use crate::transport::{BrokerSession, BrokerTransport, ConnectParams, DeliveryToken, Message};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How the mock broker answers one connection attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    Accept,
    /// Refuse with "server unavailable" (retryable)
    Refuse,
    /// Refuse with a non-retryable reason
    Reject(String),
}

/// How the mock broker treats a published message
#[derive(Debug, Clone, PartialEq)]
pub enum AckBehavior {
    Acknowledge,
    /// Never acknowledge; the wait pends forever
    Never,
    /// Transport failure while waiting
    Lose(String),
    /// Broker closes the session in response to the publish
    Reject(String),
}

/// Scripted broker transport
///
/// Clones share state, so a test can keep a handle after moving one into a
/// connection manager.
#[derive(Debug, Clone)]
pub struct MockTransport {
    connect_script: Arc<Mutex<VecDeque<ConnectBehavior>>>,
    fallback: ConnectBehavior,
    ack: AckBehavior,
    stall_publish: bool,
    connect_attempts: Arc<Mutex<Vec<ConnectParams>>>,
    published: Arc<Mutex<Vec<Message>>>,
    disconnects: Arc<AtomicUsize>,
    next_packet_id: Arc<AtomicU16>,
}

impl MockTransport {
    fn scripted(script: Vec<ConnectBehavior>, fallback: ConnectBehavior) -> Self {
        Self {
            connect_script: Arc::new(Mutex::new(script.into())),
            fallback,
            ack: AckBehavior::Acknowledge,
            stall_publish: false,
            connect_attempts: Arc::new(Mutex::new(Vec::new())),
            published: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(AtomicUsize::new(0)),
            next_packet_id: Arc::new(AtomicU16::new(1)),
        }
    }

    /// Broker that accepts every connection
    pub fn accepting() -> Self {
        Self::scripted(Vec::new(), ConnectBehavior::Accept)
    }

    /// Broker that is unavailable for the first `refusals` attempts
    pub fn refusing_then_accepting(refusals: usize) -> Self {
        Self::scripted(vec![ConnectBehavior::Refuse; refusals], ConnectBehavior::Accept)
    }

    /// Broker that is never available
    pub fn always_refusing() -> Self {
        Self::scripted(Vec::new(), ConnectBehavior::Refuse)
    }

    /// Follow `script`, then accept
    pub fn with_connect_script(script: Vec<ConnectBehavior>) -> Self {
        Self::scripted(script, ConnectBehavior::Accept)
    }

    pub fn with_ack(mut self, ack: AckBehavior) -> Self {
        self.ack = ack;
        self
    }

    /// Sessions whose publish never completes, as with a client whose
    /// outgoing queue stays full
    pub fn with_stalled_publish(mut self) -> Self {
        self.stall_publish = true;
        self
    }

    pub async fn connect_attempts(&self) -> Vec<ConnectParams> {
        self.connect_attempts.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<Message> {
        self.published.lock().await.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    type Session = MockSession;

    async fn connect(&self, params: &ConnectParams) -> Result<MockSession, ConnectError> {
        self.connect_attempts.lock().await.push(params.clone());

        let behavior = self
            .connect_script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match behavior {
            ConnectBehavior::Accept => Ok(MockSession {
                ack: self.ack.clone(),
                stall_publish: self.stall_publish,
                published: self.published.clone(),
                disconnects: self.disconnects.clone(),
                next_packet_id: self.next_packet_id.clone(),
            }),
            ConnectBehavior::Refuse => Err(ConnectError::retryable(
                "connection refused: server unavailable",
            )),
            ConnectBehavior::Reject(reason) => Err(ConnectError::fatal(reason)),
        }
    }
}

/// Session handed out by [`MockTransport`]
#[derive(Debug)]
pub struct MockSession {
    ack: AckBehavior,
    stall_publish: bool,
    published: Arc<Mutex<Vec<Message>>>,
    disconnects: Arc<AtomicUsize>,
    next_packet_id: Arc<AtomicU16>,
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn publish(&mut self, message: &Message) -> Result<DeliveryToken, PublishError> {
        if self.stall_publish {
            return std::future::pending().await;
        }
        self.published.lock().await.push(message.clone());
        Ok(DeliveryToken(
            self.next_packet_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn wait_for_ack(&mut self, _token: DeliveryToken) -> Result<(), PublishError> {
        match &self.ack {
            AckBehavior::Acknowledge => Ok(()),
            AckBehavior::Never => std::future::pending().await,
            AckBehavior::Lose(reason) => Err(PublishError::connection_lost(reason.clone())),
            AckBehavior::Reject(reason) => Err(PublishError::broker_rejected(reason.clone())),
        }
    }

    async fn disconnect(&mut self, _grace: Duration) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sleeper that records requested durations and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sleeps_ms(&self) -> Vec<u64> {
        self.sleeps()
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect()
    }

    /// Simulated time spent sleeping
    pub fn total_ms(&self) -> u64 {
        self.sleeps_ms().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// Clock frozen at a settable instant
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for FixedClock {
    /// 2024-01-01T00:00:00Z
    fn default() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Signer that returns a fixed token and records what it was asked to sign
#[derive(Debug)]
pub struct StaticSigner {
    token: String,
    signed: std::sync::Mutex<Vec<(Claims, SigningAlgorithm)>>,
}

impl StaticSigner {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            signed: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.signed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn signed_claims(&self) -> Vec<(Claims, SigningAlgorithm)> {
        self.signed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TokenSigner for StaticSigner {
    fn sign(
        &self,
        claims: &Claims,
        algorithm: SigningAlgorithm,
        _key: &[u8],
    ) -> Result<String, CredentialError> {
        self.signed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((claims.clone(), algorithm));
        Ok(self.token.clone())
    }
}

/// Credential source that hands out a fixed token without touching disk
#[derive(Debug)]
pub struct MockCredentialSource {
    token: Option<String>,
    issued: AtomicUsize,
}

impl MockCredentialSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            issued: AtomicUsize::new(0),
        }
    }

    /// Source whose key is always unavailable
    pub fn failing() -> Self {
        Self {
            token: None,
            issued: AtomicUsize::new(0),
        }
    }

    pub fn issued_count(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl CredentialSource for MockCredentialSource {
    fn issue(&self) -> Result<Credential, CredentialError> {
        let token = self.token.clone().ok_or_else(|| CredentialError::KeyUnavailable {
            path: "mock/key.pem".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        Ok(Credential::new(
            token,
            now,
            now + chrono::Duration::seconds(3600),
        ))
    }
}

/// Sensor replaying a fixed list of readings, then repeating the last one
#[derive(Debug, Default)]
pub struct MockSensor {
    readings: VecDeque<u8>,
    last: u8,
    reads: usize,
}

impl MockSensor {
    pub fn new(readings: impl IntoIterator<Item = u8>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last: 0,
            reads: 0,
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }
}

impl Sensor for MockSensor {
    fn read_sample(&mut self) -> Result<u8, SensorError> {
        self.reads += 1;
        if let Some(value) = self.readings.pop_front() {
            self.last = value;
        }
        Ok(self.last)
    }

    fn pin(&self) -> u32 {
        0
    }
}
