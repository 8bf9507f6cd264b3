use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{
    claims::AuthenticatedIdentity,
    jwt::{TokenError, TokenIssuer},
};
use crate::error::AuthError;

/// Extracts and validates the bearer token, yielding the caller's identity.
pub struct AuthUser(pub AuthenticatedIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenIssuer: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                warn!("authorization header missing");
                AuthError::Token(TokenError::Malformed)
            })?;

        // Expect "Bearer <token>"
        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or(AuthError::Token(TokenError::Malformed))?;

        let identity = TokenIssuer::from_ref(state).validate(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AuthError::Token(e)
        })?;
        Ok(AuthUser(identity))
    }
}
