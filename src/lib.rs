//! IoT telemetry publisher
//!
//! Samples a sensor and publishes each reading to a cloud MQTT bridge,
//! authenticating every connection with a freshly signed JWT.
//!
//! # Overview
//!
//! - [`credential`] - session token signing (RS256/ES256) and optional caching
//! - [`transport`] - broker abstraction and the rumqttc-backed MQTT transport
//! - [`publisher`] - bounded exponential backoff and the publish/ack cycle
//! - [`sensor`] - GPIO and simulated sample sources
//! - [`runner`] - the sampling loop tying the above together
//! - [`observability`] - structured logging and counters
//!
//! # Quick Start
//!
//! ```rust
//! use iot_telemetry::publisher::BackoffPolicy;
//!
//! let policy = BackoffPolicy::default();
//! let schedule = policy.full_schedule();
//! assert_eq!(&schedule[..4], &[500, 750, 1125, 1688]);
//! assert_eq!(schedule.last(), Some(&6000));
//! ```

pub mod config;
pub mod credential;
pub mod error;
pub mod observability;
pub mod publisher;
pub mod runner;
pub mod sensor;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, FailurePolicy, TelemetryConfig};
pub use credential::{CachingIssuer, Credential, CredentialIssuer, CredentialSource};
pub use error::{ConnectError, PublishError, TelemetryError, TelemetryResult};
pub use publisher::{BackoffPolicy, ConnectionManager, PublishCoordinator};
pub use runner::{CycleOutcome, TelemetryRunner};
