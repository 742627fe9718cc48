//! Telemetry publisher configuration
//!
//! Loaded once at startup from TOML, validated, then passed by reference to
//! the components that need it. Nothing here is mutated after load.

use crate::transport::mqtt::TopicBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub credential: CredentialSection,
    #[serde(default)]
    pub sampling: SamplingSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

/// Device identity within the cloud registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    pub project_id: String,
    pub region: String,
    pub registry_id: String,
    pub device_id: String,
    /// PEM private key used to sign session tokens
    pub private_key_path: PathBuf,
    /// `RS256` or `ES256`
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

fn default_algorithm() -> String {
    "ES256".to_string()
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// PEM bundle of trusted roots; platform roots when unset
    pub root_ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// The broker ignores the user name; only the token is checked
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_ms: u64,
}

fn default_broker_url() -> String {
    "mqtts://mqtt.googleapis.com:8883".to_string()
}

fn default_username() -> String {
    "unused".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_handshake_timeout() -> u64 {
    30_000
}

fn default_ack_timeout() -> u64 {
    10_000
}

fn default_disconnect_grace() -> u64 {
    10_000
}

/// Connection retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffSection {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_initial_interval() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_interval() -> u64 {
    6_000
}

fn default_max_elapsed() -> u64 {
    900_000 // 15 minutes
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

/// Session token settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialSection {
    #[serde(default = "default_lifetime")]
    pub lifetime_secs: u64,
    /// Reuse tokens across cycles until they near expiry
    #[serde(default)]
    pub cache: bool,
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

fn default_lifetime() -> u64 {
    3600
}

fn default_refresh_margin() -> u64 {
    300
}

impl Default for CredentialSection {
    fn default() -> Self {
        Self {
            lifetime_secs: default_lifetime(),
            cache: false,
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

/// Where samples come from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SensorSource {
    Gpio,
    Simulated,
}

/// Sampling loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingSection {
    #[serde(default = "default_source")]
    pub source: SensorSource,
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: u32,
    #[serde(default = "default_sample_interval")]
    pub interval_ms: u64,
}

fn default_source() -> SensorSource {
    SensorSource::Gpio
}

fn default_gpio_pin() -> u32 {
    21
}

fn default_sample_interval() -> u64 {
    1000
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            source: default_source(),
            gpio_pin: default_gpio_pin(),
            interval_ms: default_sample_interval(),
        }
    }
}

/// What the sampling loop does after a fatal connection failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop and exit with a failure status
    #[default]
    Exit,
    /// Log and carry on with the next sample
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RuntimeSection {
    #[serde(default)]
    pub on_fatal: FailurePolicy,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TelemetryConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TelemetryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("device.project_id", &self.device.project_id),
            ("device.region", &self.device.region),
            ("device.registry_id", &self.device.registry_id),
            ("device.device_id", &self.device.device_id),
            ("mqtt.broker_url", &self.mqtt.broker_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!("{name} must not be empty")));
            }
        }

        validate_device_id(&self.device.device_id)?;

        let backoff = &self.backoff;
        if backoff.initial_interval_ms == 0 || backoff.max_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "backoff intervals must be greater than zero".to_string(),
            ));
        }
        if backoff.initial_interval_ms > backoff.max_interval_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff.initial_interval_ms ({}) exceeds backoff.max_interval_ms ({})",
                backoff.initial_interval_ms, backoff.max_interval_ms
            )));
        }
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff.multiplier must be at least 1.0, got {}",
                backoff.multiplier
            )));
        }
        if backoff.max_elapsed_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "backoff.max_elapsed_ms must be greater than zero".to_string(),
            ));
        }

        if self.mqtt.ack_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.ack_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.mqtt.client_cert_path.is_some() != self.mqtt.client_key_path.is_some() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_cert_path and mqtt.client_key_path must be set together".to_string(),
            ));
        }
        if self.mqtt.client_cert_path.is_some() && self.mqtt.root_ca_path.is_none() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_cert_path requires mqtt.root_ca_path".to_string(),
            ));
        }

        if self.credential.lifetime_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "credential.lifetime_secs must be greater than zero".to_string(),
            ));
        }
        if self.credential.cache && self.credential.refresh_margin_secs >= self.credential.lifetime_secs {
            return Err(ConfigError::InvalidConfig(
                "credential.refresh_margin_secs must be shorter than the token lifetime".to_string(),
            ));
        }

        Ok(())
    }

    /// Registry client id used for the MQTT CONNECT
    pub fn client_id(&self) -> String {
        TopicBuilder::build_client_id(
            &self.device.project_id,
            &self.device.region,
            &self.device.registry_id,
            &self.device.device_id,
        )
    }

    /// Telemetry topic for this device
    pub fn events_topic(&self) -> String {
        TopicBuilder::build_events_topic(&self.device.device_id)
    }

    /// Token audience: the cloud project id
    pub fn audience(&self) -> &str {
        &self.device.project_id
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
project_id = "test-project"
region = "europe-west1"
registry_id = "test-registry"
device_id = "testdev"
private_key_path = "tests/fixtures/ec_private.pem"

[mqtt]
broker_url = "mqtts://mqtt.example.com:8883"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Registry device ids: letters, digits and `.`, `_`, `+`, `~`, `%`, `-`
fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '~' | '%' | '-'));

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidConfig(format!(
            "device id '{device_id}' must match [a-zA-Z0-9._+~%-]+"
        )));
    }

    Ok(())
}
