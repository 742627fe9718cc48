//! Pure connection configuration for the MQTT transport
//!
//! Option building, topic naming and the mapping from `rumqttc` failures to
//! the crate's retryable/fatal taxonomy. Nothing here touches the network.

use crate::error::{ConnectError, PublishError};
use crate::transport::{ConnectParams, QualityOfService};
use rumqttc::{
    ConnectReturnCode, ConnectionError, MqttOptions, QoS, StateError,
    Transport as RumqttcTransport,
};
use std::io;
use url::Url;

/// Port used when an encrypted broker URL omits one
pub const DEFAULT_TLS_PORT: u16 = 8883;
/// Port used when a plaintext broker URL omits one
pub const DEFAULT_TCP_PORT: u16 = 1883;

impl From<QualityOfService> for QoS {
    fn from(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => QoS::AtMostOnce,
            QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
            QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Whether a broker URL scheme selects TLS
fn is_tls_scheme(scheme: &str) -> Result<bool, ConnectError> {
    match scheme {
        "mqtts" | "ssl" | "tls" => Ok(true),
        "mqtt" | "tcp" => Ok(false),
        other => Err(ConnectError::fatal(format!(
            "unsupported broker URL scheme '{other}'"
        ))),
    }
}

/// Build `rumqttc` options for one connection attempt
///
/// Reads the CA bundle and optional client identity from disk. A missing
/// trust file is fatal: no amount of retrying will make it appear.
pub fn configure_mqtt_options(params: &ConnectParams) -> Result<MqttOptions, ConnectError> {
    let url = Url::parse(&params.broker_url)
        .map_err(|e| ConnectError::fatal(format!("invalid broker URL '{}': {e}", params.broker_url)))?;

    let tls = is_tls_scheme(url.scheme())?;
    let host = url
        .host_str()
        .ok_or_else(|| ConnectError::fatal(format!("broker URL '{}' has no host", params.broker_url)))?;
    let port = url
        .port()
        .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_TCP_PORT });

    let mut mqtt_options = MqttOptions::new(params.client_id.clone(), host, port);
    mqtt_options.set_keep_alive(params.keep_alive);
    mqtt_options.set_clean_session(true);
    mqtt_options.set_credentials(params.username.clone(), params.password.clone());

    if tls {
        let transport = match &params.tls.root_ca_path {
            Some(ca_path) => {
                let ca = read_pem(ca_path, "root CA")?;
                let client_auth = match &params.tls.client_auth {
                    Some((cert_path, key_path)) => Some((
                        read_pem(cert_path, "client certificate")?,
                        read_pem(key_path, "client key")?,
                    )),
                    None => None,
                };
                RumqttcTransport::tls(ca, client_auth, None)
            }
            None if params.tls.client_auth.is_some() => {
                return Err(ConnectError::fatal(
                    "client certificate configured without a root CA",
                ))
            }
            None => RumqttcTransport::tls_with_default_config(),
        };
        mqtt_options.set_transport(transport);
    }

    Ok(mqtt_options)
}

fn read_pem(path: &std::path::Path, what: &str) -> Result<Vec<u8>, ConnectError> {
    std::fs::read(path)
        .map_err(|e| ConnectError::fatal(format!("cannot read {what} at {}: {e}", path.display())))
}

/// Map a CONNACK refusal onto the retry taxonomy
///
/// Only "server unavailable" is transient; every other refusal means the
/// broker will keep saying no to this client.
pub fn classify_connect_return_code(code: ConnectReturnCode) -> ConnectError {
    match code {
        ConnectReturnCode::ServiceUnavailable => {
            ConnectError::retryable("connection refused: server unavailable")
        }
        ConnectReturnCode::BadUserNamePassword => {
            ConnectError::fatal("connection refused: bad user name or password")
        }
        ConnectReturnCode::NotAuthorized => ConnectError::fatal("connection refused: not authorized"),
        other => ConnectError::fatal(format!("connection refused: {other:?}")),
    }
}

fn io_error_kind(error: &ConnectionError) -> Option<io::ErrorKind> {
    match error {
        ConnectionError::Io(e) => Some(e.kind()),
        ConnectionError::MqttState(StateError::Io(e)) => Some(e.kind()),
        _ => None,
    }
}

/// Map a handshake failure onto the retry taxonomy
pub fn classify_connection_error(error: &ConnectionError) -> ConnectError {
    if let ConnectionError::ConnectionRefused(code) = error {
        return classify_connect_return_code(*code);
    }

    match io_error_kind(error) {
        Some(io::ErrorKind::ConnectionRefused) => {
            ConnectError::retryable(format!("broker not accepting connections: {error}"))
        }
        _ => ConnectError::fatal(error.to_string()),
    }
}

/// Map a failure on an established session to a publish error
///
/// The broker dropping the socket while a publish is in flight is how it
/// rejects a message; anything else is a lost connection.
pub fn classify_session_error(error: &ConnectionError) -> PublishError {
    match io_error_kind(error) {
        Some(
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted,
        ) => PublishError::broker_rejected(format!("broker closed the session: {error}")),
        _ => PublishError::connection_lost(error.to_string()),
    }
}

/// Topic and identity naming for cloud IoT registries
pub struct TopicBuilder;

impl TopicBuilder {
    /// Telemetry topic: `/devices/{device_id}/events`
    pub fn build_events_topic(device_id: &str) -> String {
        format!("/devices/{device_id}/events")
    }

    /// Fully qualified client id for a registry device
    pub fn build_client_id(project_id: &str, region: &str, registry_id: &str, device_id: &str) -> String {
        format!("projects/{project_id}/locations/{region}/registries/{registry_id}/devices/{device_id}")
    }
}
