//! Impure I/O for the MQTT transport
//!
//! Each [`MqttSession`] owns its own `rumqttc` client and event loop. The
//! event loop is polled inline (no background task) because a session lives
//! for exactly one publish cycle.

use super::connection::{
    classify_connect_return_code, classify_connection_error, classify_session_error,
    configure_mqtt_options,
};
use crate::error::{ConnectError, PublishError};
use crate::transport::{BrokerSession, BrokerTransport, ConnectParams, DeliveryToken, Message};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Request channel capacity; one cycle only ever queues a publish and a disconnect
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Opens `rumqttc` sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }

    /// Poll until the broker answers the CONNECT
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), ConnectError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return match ack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(classify_connect_return_code(code)),
                    };
                }
                Ok(event) => trace!(target: "mqtt_transport", ?event, "Handshake event"),
                Err(e) => return Err(classify_connection_error(&e)),
            }
        }
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    type Session = MqttSession;

    async fn connect(&self, params: &ConnectParams) -> Result<MqttSession, ConnectError> {
        let mqtt_options = configure_mqtt_options(params)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        debug!(
            target: "mqtt_transport",
            broker = %params.broker_url,
            client_id = %params.client_id,
            "Starting MQTT handshake"
        );

        match tokio::time::timeout(
            params.handshake_timeout,
            Self::wait_for_connack(&mut event_loop),
        )
        .await
        {
            Ok(Ok(())) => Ok(MqttSession { client, event_loop }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::fatal(format!(
                "no CONNACK within {} ms",
                params.handshake_timeout.as_millis()
            ))),
        }
    }
}

/// A connected `rumqttc` session
pub struct MqttSession {
    client: AsyncClient,
    event_loop: EventLoop,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn publish(&mut self, message: &Message) -> Result<DeliveryToken, PublishError> {
        self.client
            .publish_bytes(
                message.topic(),
                message.qos().into(),
                message.retained(),
                message.payload().clone(),
            )
            .await
            .map_err(|e| PublishError::connection_lost(format!("publish request failed: {e}")))?;

        // The packet id is assigned when the event loop writes the publish
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => return Ok(DeliveryToken(pkid)),
                Ok(event) => trace!(target: "mqtt_transport", ?event, "Publish event"),
                Err(e) => return Err(classify_session_error(&e)),
            }
        }
    }

    async fn wait_for_ack(&mut self, token: DeliveryToken) -> Result<(), PublishError> {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(ack))) if ack.pkid == token.0 => return Ok(()),
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    debug!(target: "mqtt_transport", pkid = ack.pkid, expected = token.0, "Ignoring unrelated PUBACK");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return Err(PublishError::broker_rejected("broker sent DISCONNECT"));
                }
                Ok(event) => trace!(target: "mqtt_transport", ?event, "Acknowledgment wait event"),
                Err(e) => return Err(classify_session_error(&e)),
            }
        }
    }

    async fn disconnect(&mut self, grace: Duration) {
        if let Err(e) = self.client.disconnect().await {
            debug!(target: "mqtt_transport", error = %e, "Disconnect request not queued");
            return;
        }

        let drain = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(target: "mqtt_transport", error = %e, "Event loop ended during disconnect");
                        break;
                    }
                }
            }
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(
                target: "mqtt_transport",
                grace_ms = grace.as_millis() as u64,
                "Disconnect did not complete within grace period"
            );
        }
    }
}
