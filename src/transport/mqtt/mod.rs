//! MQTT transport built on `rumqttc`
//!
//! Split the same way as the rest of the transport layer:
//!
//! - [`connection`] - pure option building, topic naming and error classification
//! - [`client`] - impure I/O: handshake, publish, acknowledgment and teardown
//!
//! # Usage
//!
//! ```rust,no_run
//! use iot_telemetry::transport::mqtt::MqttTransport;
//! use iot_telemetry::transport::{BrokerSession, BrokerTransport, ConnectParams, Message, TlsParams};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let params = ConnectParams {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     client_id: "sensor-1".to_string(),
//!     username: "unused".to_string(),
//!     password: "token".to_string(),
//!     tls: TlsParams::default(),
//!     keep_alive: Duration::from_secs(60),
//!     handshake_timeout: Duration::from_secs(30),
//! };
//!
//! let mut session = MqttTransport::new().connect(&params).await?;
//! let token = session.publish(&Message::new("/devices/sensor-1/events", "1")).await?;
//! session.wait_for_ack(token).await?;
//! session.disconnect(Duration::from_secs(10)).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;

pub use client::{MqttSession, MqttTransport};
pub use connection::{
    classify_connect_return_code, classify_connection_error, classify_session_error,
    configure_mqtt_options, TopicBuilder,
};
