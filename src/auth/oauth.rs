use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::repo_types::Provider;

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("token verification failed: {0}")]
    TokenVerificationFailed(String),
    #[error("invalid provider response: {0}")]
    InvalidProviderResponse(String),
}

/// Identity asserted by an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub email: String,
    pub provider_subject_id: String,
    pub is_verified: bool,
    pub display_name: String,
}

/// One provider's ID-token check.
#[async_trait]
pub trait OAuthVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<OAuthIdentity, OAuthError>;
}

/// Provider tag → verifier. Providers are added by registering, never by matching on names.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    verifiers: HashMap<Provider, Arc<dyn OAuthVerifier>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Provider, verifier: Arc<dyn OAuthVerifier>) -> Self {
        self.verifiers.insert(provider, verifier);
        self
    }

    /// Resolves a wire tag to a registered provider.
    pub fn resolve(&self, tag: &str) -> Result<Provider, OAuthError> {
        tag.parse::<Provider>()
            .ok()
            .filter(|p| self.verifiers.contains_key(p))
            .ok_or_else(|| OAuthError::UnsupportedProvider(tag.to_string()))
    }

    #[instrument(skip(self, id_token))]
    pub async fn verify(
        &self,
        provider: Provider,
        id_token: &str,
    ) -> Result<OAuthIdentity, OAuthError> {
        let verifier = self
            .verifiers
            .get(&provider)
            .ok_or_else(|| OAuthError::UnsupportedProvider(provider.to_string()))?;
        verifier.verify(id_token).await
    }
}

fn require(field: Option<String>, name: &str) -> Result<String, OAuthError> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::InvalidProviderResponse(format!("missing {name}")))
}

// ---- Google ----

/// `email_verified` arrives as either a JSON bool or the strings "true"/"false".
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerifiedFlag {
    Bool(bool),
    Text(String),
}

impl VerifiedFlag {
    fn as_bool(&self) -> bool {
        match self {
            VerifiedFlag::Bool(b) => *b,
            VerifiedFlag::Text(s) => s == "true",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenInfo {
    sub: Option<String>,
    email: Option<String>,
    email_verified: Option<VerifiedFlag>,
    name: Option<String>,
}

impl TryFrom<GoogleTokenInfo> for OAuthIdentity {
    type Error = OAuthError;

    fn try_from(info: GoogleTokenInfo) -> Result<Self, Self::Error> {
        Ok(Self {
            provider_subject_id: require(info.sub, "sub")?,
            email: require(info.email, "email")?,
            is_verified: info.email_verified.map(|f| f.as_bool()).unwrap_or(false),
            display_name: info.name.unwrap_or_default(),
        })
    }
}

/// Checks Google ID tokens against the tokeninfo endpoint.
pub struct GoogleVerifier {
    client: reqwest::Client,
    tokeninfo_url: String,
}

impl GoogleVerifier {
    pub fn new(tokeninfo_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            tokeninfo_url: tokeninfo_url.into(),
        })
    }
}

#[async_trait]
impl OAuthVerifier for GoogleVerifier {
    async fn verify(&self, id_token: &str) -> Result<OAuthIdentity, OAuthError> {
        let resp = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "google tokeninfo request failed");
                OAuthError::TokenVerificationFailed(e.to_string())
            })?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "google rejected id token");
            return Err(OAuthError::TokenVerificationFailed(format!(
                "tokeninfo returned {status}: {body}"
            )));
        }

        let info = resp
            .json::<GoogleTokenInfo>()
            .await
            .map_err(|e| OAuthError::InvalidProviderResponse(e.to_string()))?;
        let identity = OAuthIdentity::try_from(info)?;
        debug!(subject = %identity.provider_subject_id, "google token verified");
        Ok(identity)
    }
}

// ---- Apple ----

#[derive(Debug, Deserialize)]
pub struct AppleClaims {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<String>,
}

/// Turns an Apple ID token into its claims. Production deployments should
/// plug in a decoder that checks the signature against Apple's published keys.
pub trait AppleTokenDecoder: Send + Sync {
    fn decode(&self, id_token: &str) -> Result<AppleClaims, OAuthError>;
}

/// Reads the claims without checking the signature.
pub struct UnverifiedAppleDecoder;

impl AppleTokenDecoder for UnverifiedAppleDecoder {
    fn decode(&self, id_token: &str) -> Result<AppleClaims, OAuthError> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<AppleClaims>(id_token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| OAuthError::TokenVerificationFailed(e.to_string()))?;
        warn!("apple id token accepted without signature verification");
        Ok(data.claims)
    }
}

pub struct AppleVerifier {
    decoder: Arc<dyn AppleTokenDecoder>,
}

impl AppleVerifier {
    pub fn new(decoder: Arc<dyn AppleTokenDecoder>) -> Self {
        Self { decoder }
    }
}

#[async_trait]
impl OAuthVerifier for AppleVerifier {
    async fn verify(&self, id_token: &str) -> Result<OAuthIdentity, OAuthError> {
        let claims = self.decoder.decode(id_token)?;
        Ok(OAuthIdentity {
            provider_subject_id: require(claims.sub, "sub")?,
            email: require(claims.email, "email")?,
            is_verified: claims.email_verified.as_deref() == Some("true"),
            display_name: String::new(),
        })
    }
}
