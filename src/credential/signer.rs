//! Token signing seam
//!
//! [`TokenSigner`] is the narrow interface to the cryptographic library:
//! sign a claim set with an algorithm and PEM key bytes. [`JwtSigner`] is the
//! production implementation on top of `jsonwebtoken`.

use super::{Claims, CredentialError, SigningAlgorithm};
use jsonwebtoken::{Algorithm, EncodingKey, Header};

/// Signs claim sets into compact tokens
pub trait TokenSigner: Send + Sync {
    fn sign(
        &self,
        claims: &Claims,
        algorithm: SigningAlgorithm,
        key: &[u8],
    ) -> Result<String, CredentialError>;
}

/// Compact JWS signer backed by `jsonwebtoken`
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtSigner;

impl From<SigningAlgorithm> for Algorithm {
    fn from(algorithm: SigningAlgorithm) -> Self {
        match algorithm {
            SigningAlgorithm::Rs256 => Algorithm::RS256,
            SigningAlgorithm::Es256 => Algorithm::ES256,
        }
    }
}

impl TokenSigner for JwtSigner {
    fn sign(
        &self,
        claims: &Claims,
        algorithm: SigningAlgorithm,
        key: &[u8],
    ) -> Result<String, CredentialError> {
        let encoding_key = match algorithm {
            SigningAlgorithm::Rs256 => EncodingKey::from_rsa_pem(key),
            SigningAlgorithm::Es256 => EncodingKey::from_ec_pem(key),
        }
        .map_err(|e| CredentialError::signing_failed(format!("invalid {algorithm} key: {e}")))?;

        jsonwebtoken::encode(&Header::new(algorithm.into()), claims, &encoding_key)
            .map_err(|e| CredentialError::signing_failed(e.to_string()))
    }
}
