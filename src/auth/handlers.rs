use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            self, AuthResponse, LoginRequest, MessageResponse, NewUserResponse,
            OAuthLoginRequest, RegisterRequest, SendCodeRequest, SendCodeResponse, UserResponse,
            VerifyCodeRequest,
        },
        extractors::AuthUser,
        services::LoginOutcome,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/profile", get(profile))
}

pub fn passwordless_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/oauth/login", post(oauth_login))
        .route("/auth/email/send-code", post(send_code))
        .route("/auth/email/verify", post(verify_code))
}

impl IntoResponse for LoginOutcome {
    fn into_response(self) -> Response {
        match self {
            LoginOutcome::Authenticated(session) => {
                (StatusCode::OK, Json(AuthResponse::from(session))).into_response()
            }
            LoginOutcome::NewIdentityPending { email, provider } => (
                StatusCode::ACCEPTED,
                Json(NewUserResponse {
                    is_new_user: true,
                    email,
                    provider,
                }),
            )
                .into_response(),
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let (email, role) = payload.validate().map_err(|e| {
        warn!(error = %e, "register rejected");
        e
    })?;
    let session = state
        .auth
        .register_password(&email, &payload.password, role)
        .await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let email = payload.validate()?;
    let session = state.auth.login_password(&email, &payload.password).await?;
    Ok(Json(session.into()))
}

/// Tokens are stateless; the client discards its copy.
#[instrument(skip_all)]
pub async fn logout(AuthUser(identity): AuthUser) -> Json<MessageResponse> {
    info!(user_id = %identity.user_id, "user logged out");
    Json(MessageResponse {
        message: "logged out".into(),
    })
}

#[instrument(skip_all)]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<UserResponse>, AuthError> {
    let current = state.auth.current_user(identity.user_id).await?;
    Ok(Json(UserResponse::new(current.user, current.profile)))
}

#[instrument(skip(state, payload))]
pub async fn oauth_login(
    State(state): State<AppState>,
    Json(payload): Json<OAuthLoginRequest>,
) -> Result<LoginOutcome, AuthError> {
    let role = payload.validate()?;
    state
        .auth
        .oauth_login(payload.provider.trim(), &payload.id_token, role)
        .await
}

#[instrument(skip(state, payload))]
pub async fn send_code(
    State(state): State<AppState>,
    Json(payload): Json<SendCodeRequest>,
) -> Result<Json<SendCodeResponse>, AuthError> {
    let email = payload.email.trim();
    if !dto::is_valid_email(email) {
        warn!(%email, "invalid email");
        return Err(AuthError::InvalidInput("invalid email".into()));
    }
    let expires_at = state.auth.request_email_code(email).await?;
    Ok(Json(SendCodeResponse {
        message: "verification code sent".into(),
        expires_at,
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_code(
    State(state): State<AppState>,
    Json(payload): Json<VerifyCodeRequest>,
) -> Result<LoginOutcome, AuthError> {
    let (email, role) = payload.validate()?;
    state
        .auth
        .complete_email_login(&email, &payload.code, role)
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::app::build_app;
    use crate::auth::{
        memory::{harness, Harness},
        repo_types::ProfileSummary,
    };
    use crate::state::AppState;

    use super::*;

    fn app(h: &Harness) -> Router {
        build_app(AppState::fake(Arc::clone(&h.service)))
    }

    async fn call(app: Router, method: Method, uri: &str, body: Option<Value>, bearer: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn register_then_login_then_profile() {
        let h = harness();
        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/register",
            Some(json!({ "email": "a@x.com", "password": "password123", "role": "mentee" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "a@x.com");
        assert_eq!(body["user"]["role"], "mentee");
        assert!(body["user"].get("password_hash").is_none());

        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "a@x.com", "password": "password123" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let user_id = h.service.validate_token(&token).unwrap().user_id;
        h.profiles.insert(
            user_id,
            ProfileSummary {
                id: uuid::Uuid::new_v4(),
                first_name: "Ada".into(),
                last_name: "L".into(),
                avatar_url: String::new(),
            },
        );

        let (status, body) = call(app(&h), Method::GET, "/api/v1/auth/profile", None, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["profile"]["first_name"], "Ada");
    }

    #[tokio::test]
    async fn register_validates_input() {
        let h = harness();
        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/register",
            Some(json!({ "email": "a@x.com", "password": "short", "role": "mentee" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, _) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/register",
            Some(json!({ "email": "a@x.com", "password": "password123", "role": "admin" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.users.count(), 0);
    }

    #[tokio::test]
    async fn duplicate_register_is_conflict() {
        let h = harness();
        let body = json!({ "email": "a@x.com", "password": "password123", "role": "mentor" });
        let (first, _) = call(app(&h), Method::POST, "/api/v1/auth/register", Some(body.clone()), None).await;
        let (second, resp) = call(app(&h), Method::POST, "/api/v1/auth/register", Some(body), None).await;
        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(resp["error"], "conflict");
    }

    #[tokio::test]
    async fn bad_login_is_unauthorized() {
        let h = harness();
        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "nobody@x.com", "password": "password123" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_credentials");
    }

    #[tokio::test]
    async fn profile_requires_bearer_token() {
        let h = harness();
        let (status, _) = call(app(&h), Method::GET, "/api/v1/auth/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = call(app(&h), Method::GET, "/api/v1/auth/profile", None, Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthenticated");
    }

    #[tokio::test]
    async fn logout_acknowledges() {
        let h = harness();
        let token = h
            .service
            .register_password("a@x.com", "password123", crate::auth::repo_types::Role::Mentee)
            .await
            .unwrap()
            .token;
        let (status, body) = call(app(&h), Method::POST, "/api/v1/auth/logout", None, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "logged out");
    }

    #[tokio::test]
    async fn oauth_pending_then_created() {
        let h = harness();
        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/oauth/login",
            Some(json!({ "provider": "google", "id_token": "google-token-new" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({ "is_new_user": true, "email": "g@x.com", "provider": "google" }));

        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/oauth/login",
            Some(json!({ "provider": "google", "id_token": "google-token-new", "role": "mentor" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "mentor");
        assert!(body["token"].is_string());
    }

    #[tokio::test]
    async fn oauth_unknown_provider_is_bad_request() {
        let h = harness();
        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/oauth/login",
            Some(json!({ "provider": "myspace", "id_token": "t" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported_provider");
    }

    #[tokio::test]
    async fn email_code_flow_over_http() {
        let h = harness();
        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/email/send-code",
            Some(json!({ "email": "e@x.com" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["expires_at"].is_string());
        let code = h.outbox.last_code_for("e@x.com").unwrap();

        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/email/verify",
            Some(json!({ "email": "e@x.com", "code": code })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["provider"], "email");

        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/email/verify",
            Some(json!({ "email": "e@x.com", "code": code, "role": "mentee" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "e@x.com");

        let (status, body) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/email/verify",
            Some(json!({ "email": "e@x.com", "code": code, "role": "mentee" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_or_expired_code");
    }

    #[tokio::test]
    async fn malformed_code_is_bad_request() {
        let h = harness();
        let (status, _) = call(
            app(&h),
            Method::POST,
            "/api/v1/auth/email/verify",
            Some(json!({ "email": "e@x.com", "code": "12" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_ready() {
        let h = harness();
        let (status, _) = call(app(&h), Method::GET, "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(app(&h), Method::GET, "/api/v1/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }
}
