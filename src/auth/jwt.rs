use std::time::Duration;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{
    claims::{AuthenticatedIdentity, Claims},
    repo_types::Role,
};
use crate::config::JwtConfig;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Why a presented token was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    SignatureMismatch,
}

/// Signing failed; the caller may retry.
#[derive(Debug, Error)]
#[error("token signing failed: {0}")]
pub struct SigningError(#[from] jsonwebtoken::errors::Error);

/// Mints and validates HS256 session tokens with a secret fixed at construction.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            ttl: Duration::from_secs(cfg.ttl_hours.saturating_mul(3600)),
        }
    }

    pub fn issue(&self, user_id: Uuid, email: &str, role: Role) -> Result<String, SigningError> {
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role,
            iat: now,
            exp: now.saturating_add(self.ttl.as_secs()),
            iss: self.issuer.clone(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)?;
        debug!(user_id = %user_id, role = %role, "jwt signed");
        Ok(token)
    }

    pub fn validate(&self, token: &str) -> Result<AuthenticatedIdentity, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::SignatureMismatch
                }
                _ => TokenError::Malformed,
            }
        })?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims.into())
    }
}
