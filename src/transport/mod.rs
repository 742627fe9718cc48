//! Broker transport seam
//!
//! The publishing path drives the broker through two traits so the
//! connection manager and publish coordinator can be exercised without a
//! network: [`BrokerTransport`] opens sessions and [`BrokerSession`]
//! publishes, waits for acknowledgment and disconnects.
//!
//! [`mqtt`] holds the production implementation on top of `rumqttc`.

use crate::error::{ConnectError, PublishError};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub mod mqtt;

/// Handle correlating a publish with its acknowledgment
///
/// For MQTT this is the packet identifier of the outgoing QoS 1 publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryToken(pub u16);

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    pub fn level(&self) -> u8 {
        match self {
            QualityOfService::AtMostOnce => 0,
            QualityOfService::AtLeastOnce => 1,
            QualityOfService::ExactlyOnce => 2,
        }
    }
}

/// A telemetry message bound for one topic
///
/// Always published at QoS 1, never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn qos(&self) -> QualityOfService {
        QualityOfService::AtLeastOnce
    }

    pub fn retained(&self) -> bool {
        false
    }
}

/// TLS trust parameters for the broker connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlsParams {
    /// PEM bundle of trusted root CAs; `None` uses the platform roots
    pub root_ca_path: Option<PathBuf>,
    /// Optional client certificate and key (PEM) for mutual TLS
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

/// Everything a transport needs for one connection attempt
#[derive(Clone)]
pub struct ConnectParams {
    pub broker_url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub tls: TlsParams,
    pub keep_alive: Duration,
    pub handshake_timeout: Duration,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("broker_url", &self.broker_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("tls", &self.tls)
            .field("keep_alive", &self.keep_alive)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Opens authenticated broker sessions
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    type Session: BrokerSession;

    /// Perform the encrypted handshake; resolves once the broker accepts
    async fn connect(&self, params: &ConnectParams) -> Result<Self::Session, ConnectError>;
}

/// One live broker session
#[async_trait]
pub trait BrokerSession: Send {
    /// Submit a message and return the token its acknowledgment will carry
    async fn publish(&mut self, message: &Message) -> Result<DeliveryToken, PublishError>;

    /// Resolve once the broker acknowledges `token`
    ///
    /// Unbounded on its own; callers impose the deadline.
    async fn wait_for_ack(&mut self, token: DeliveryToken) -> Result<(), PublishError>;

    /// Close the session, allowing up to `grace` for in-flight traffic
    async fn disconnect(&mut self, grace: Duration);
}
