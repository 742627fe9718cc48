//! Short-lived device credentials
//!
//! A device authenticates each broker session with a signed bearer token
//! (a JWT) carried in the MQTT password field. Tokens hold three claims:
//! issue time, expiry and the audience (the cloud project id).
//!
//! - [`issuer`] - reads the private key, builds claims and mints [`Credential`]s
//! - [`signer`] - the signing seam, backed by `jsonwebtoken`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub mod issuer;
pub mod signer;

pub use issuer::{CachingIssuer, CredentialIssuer, CredentialParams, CredentialSource};
pub use signer::{JwtSigner, TokenSigner};

/// Default token lifetime in seconds
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Signature algorithms a device key may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    #[serde(rename = "RS256")]
    Rs256,
    /// ECDSA on P-256 with SHA-256
    #[serde(rename = "ES256")]
    Es256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::Rs256 => "RS256",
            SigningAlgorithm::Es256 => "ES256",
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(SigningAlgorithm::Rs256),
            "ES256" => Ok(SigningAlgorithm::Es256),
            other => Err(CredentialError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim set embedded in every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Audience (cloud project id)
    pub aud: String,
}

/// A signed, time-bound bearer token
///
/// Owned by the connection attempt that minted it. `Debug` never prints the
/// token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: String, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            issued_at,
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token should be replaced at `now`, given a safety margin
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now >= self.expires_at - margin
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"***")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential issuance failures
///
/// All of these need operator intervention (bad key or config); retrying
/// the same issuance cannot succeed.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Private key unavailable at {}", path.display())]
    KeyUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signing failed: {message}")]
    SigningFailed { message: String },
}

impl CredentialError {
    pub fn signing_failed<S: Into<String>>(message: S) -> Self {
        Self::SigningFailed {
            message: message.into(),
        }
    }
}

/// Wall-clock source for claim timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
