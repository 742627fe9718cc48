//! Credential issuance
//!
//! [`CredentialIssuer`] mints a fresh token on every call: it parses the
//! algorithm name, reads the private key, stamps `iat`/`exp` from the clock
//! and hands the claims to the signer. Nothing is kept between calls.
//!
//! [`CachingIssuer`] is an opt-in wrapper that reuses a token until it is
//! within a safety margin of expiry. It reduces signing frequency, so it is
//! off unless `[credential] cache = true`.

use super::signer::{JwtSigner, TokenSigner};
use super::{
    Claims, Clock, Credential, CredentialError, SigningAlgorithm, SystemClock,
    DEFAULT_TOKEN_LIFETIME_SECS,
};
use crate::config::TelemetryConfig;
use crate::observability::metrics::metrics;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// Source of session passwords for the connection manager
pub trait CredentialSource: Send + Sync {
    fn issue(&self) -> Result<Credential, CredentialError>;
}

/// Inputs for issuing a credential
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialParams {
    pub private_key_path: PathBuf,
    pub audience: String,
    pub algorithm: String,
    pub lifetime: chrono::Duration,
}

impl CredentialParams {
    pub fn new(
        private_key_path: impl Into<PathBuf>,
        audience: impl Into<String>,
        algorithm: impl Into<String>,
    ) -> Self {
        Self {
            private_key_path: private_key_path.into(),
            audience: audience.into(),
            algorithm: algorithm.into(),
            lifetime: chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS as i64),
        }
    }

    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            &config.device.private_key_path,
            config.audience(),
            &config.device.algorithm,
        )
        .with_lifetime(chrono::Duration::seconds(
            config.credential.lifetime_secs as i64,
        ))
    }
}

/// Mints a new signed token per call
pub struct CredentialIssuer {
    params: CredentialParams,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
}

impl CredentialIssuer {
    /// Issuer using the `jsonwebtoken` signer and the system clock
    pub fn new(params: CredentialParams) -> Self {
        Self::with_collaborators(params, Arc::new(JwtSigner), Arc::new(SystemClock))
    }

    pub fn with_collaborators(
        params: CredentialParams,
        signer: Arc<dyn TokenSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            params,
            signer,
            clock,
        }
    }

    pub fn params(&self) -> &CredentialParams {
        &self.params
    }

    /// Issue a credential for an explicit key, audience and algorithm
    ///
    /// The algorithm name is checked before the key is read, so an unknown
    /// name never reaches the signer.
    pub fn issue_with(
        &self,
        private_key_path: &Path,
        audience: &str,
        algorithm: &str,
    ) -> Result<Credential, CredentialError> {
        let algorithm: SigningAlgorithm = algorithm.parse().map_err(|e| {
            error!(phase = "credential", error = %e, "Rejected signing algorithm");
            e
        })?;

        let key = std::fs::read(private_key_path).map_err(|source| {
            error!(
                phase = "credential",
                path = %private_key_path.display(),
                error = %source,
                "Could not read private key"
            );
            CredentialError::KeyUnavailable {
                path: private_key_path.to_path_buf(),
                source,
            }
        })?;

        let issued_at = self.clock.now();
        let expires_at = issued_at + self.params.lifetime;
        let claims = Claims {
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            aud: audience.to_string(),
        };

        let token = self.signer.sign(&claims, algorithm, &key).map_err(|e| {
            error!(phase = "credential", %algorithm, error = %e, "Token signing failed");
            e
        })?;

        debug!(
            phase = "credential",
            %algorithm,
            iat = claims.iat,
            exp = claims.exp,
            "Issued device credential"
        );
        metrics().record_credential_issued();

        Ok(Credential::new(token, issued_at, expires_at))
    }
}

impl CredentialSource for CredentialIssuer {
    fn issue(&self) -> Result<Credential, CredentialError> {
        self.issue_with(
            &self.params.private_key_path,
            &self.params.audience,
            &self.params.algorithm,
        )
    }
}

/// Reuses a credential until it nears expiry
pub struct CachingIssuer<S> {
    inner: S,
    clock: Arc<dyn Clock>,
    refresh_margin: chrono::Duration,
    cached: Mutex<Option<Credential>>,
}

impl<S: CredentialSource> CachingIssuer<S> {
    pub fn new(inner: S, clock: Arc<dyn Clock>, refresh_margin: chrono::Duration) -> Self {
        Self {
            inner,
            clock,
            refresh_margin,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached credential so the next call re-signs
    pub fn invalidate(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        *cached = None;
    }
}

impl<S: CredentialSource> CredentialSource for CachingIssuer<S> {
    fn issue(&self) -> Result<Credential, CredentialError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();

        if let Some(credential) = cached.as_ref() {
            if !credential.needs_refresh(now, self.refresh_margin) {
                debug!(
                    phase = "credential",
                    expires_at = %credential.expires_at(),
                    "Reusing cached credential"
                );
                return Ok(credential.clone());
            }
        }

        let fresh = self.inner.issue()?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}
