//! Error type returned by the auth service and rendered by the HTTP layer.
//!
//! Caller faults are shown as-is. Collaborator faults are logged with their
//! detail and reach the client only as an opaque internal error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::auth::{
    codes::{CodeError, DeliveryError},
    jwt::{SigningError, TokenError},
    oauth::OAuthError,
    password::HashingError,
    repo::StoreError,
};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed request (400)
    #[error("{0}")]
    InvalidInput(String),

    /// Unknown user or wrong password, deliberately indistinguishable (401)
    #[error("invalid email or password")]
    InvalidCredentials,

    /// No unused, unexpired code matched (401)
    #[error("invalid or expired verification code")]
    InvalidOrExpiredCode,

    /// The identity provider did not vouch for the token (401)
    #[error("oauth verification failed: {0}")]
    VerificationFailed(String),

    /// Provider tag has no registered verifier (400)
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Identity already exists (409)
    #[error("{0}")]
    Conflict(String),

    /// Resource missing (404)
    #[error("not found")]
    NotFound,

    /// Presented session token rejected (401)
    #[error("unauthenticated: {0}")]
    Token(#[from] TokenError),

    /// Persistence failure (500)
    #[error("store error: {0}")]
    Store(StoreError),

    /// Code could not be sent (500)
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Password hashing failed (500)
    #[error(transparent)]
    Hashing(#[from] HashingError),

    /// Token minting failed; any account created in the same call is kept (500)
    #[error(transparent)]
    TokenIssuance(#[from] SigningError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Conflict => AuthError::Conflict("account already exists".into()),
            e => AuthError::Store(e),
        }
    }
}

impl From<CodeError> for AuthError {
    fn from(e: CodeError) -> Self {
        match e {
            CodeError::InvalidOrExpired => AuthError::InvalidOrExpiredCode,
            CodeError::Store(e) => e.into(),
        }
    }
}

impl From<OAuthError> for AuthError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::UnsupportedProvider(p) => AuthError::UnsupportedProvider(p),
            e => AuthError::VerificationFailed(e.to_string()),
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidInput(_) | AuthError::UnsupportedProvider(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::InvalidCredentials
            | AuthError::InvalidOrExpiredCode
            | AuthError::VerificationFailed(_)
            | AuthError::Token(_) => StatusCode::UNAUTHORIZED,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Store(_)
            | AuthError::Delivery(_)
            | AuthError::Hashing(_)
            | AuthError::TokenIssuance(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidInput(_) => "invalid_input",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidOrExpiredCode => "invalid_or_expired_code",
            AuthError::VerificationFailed(_) => "verification_failed",
            AuthError::UnsupportedProvider(_) => "unsupported_provider",
            AuthError::Conflict(_) => "conflict",
            AuthError::NotFound => "not_found",
            AuthError::Token(_) => "unauthenticated",
            AuthError::Store(_)
            | AuthError::Delivery(_)
            | AuthError::Hashing(_)
            | AuthError::TokenIssuance(_) => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error, please retry".to_string()
        } else {
            self.to_string()
        };
        let body = Json(serde_json::json!({
            "error": self.kind(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_faults_keep_their_message() {
        let err = AuthError::InvalidCredentials;
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "invalid email or password");
    }

    #[test]
    fn store_errors_split_by_kind() {
        assert!(matches!(AuthError::from(StoreError::NotFound), AuthError::NotFound));
        assert!(matches!(AuthError::from(StoreError::Conflict), AuthError::Conflict(_)));
        let internal = AuthError::from(StoreError::Decode("bad role".into()));
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn token_faults_are_unauthorized() {
        for e in [TokenError::Expired, TokenError::Malformed, TokenError::SignatureMismatch] {
            assert_eq!(AuthError::from(e).status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn internal_errors_hide_detail() {
        let resp = AuthError::Delivery(DeliveryError("smtp 421 at mx1".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("internal_error"));
        assert!(!text.contains("smtp"));
    }
}
