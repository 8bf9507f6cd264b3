use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    codes::CODE_LENGTH,
    repo_types::{ProfileSummary, Provider, Role, User},
    services::AuthSession,
};
use crate::error::AuthError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn checked_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim();
    if !is_valid_email(email) {
        return Err(AuthError::InvalidInput("invalid email".into()));
    }
    Ok(email.to_string())
}

fn checked_role(raw: &str) -> Result<Role, AuthError> {
    raw.parse::<Role>().map_err(AuthError::InvalidInput)
}

/// Absent or empty means "no role chosen yet".
fn optional_role(raw: Option<&str>) -> Result<Option<Role>, AuthError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(r) => checked_role(r).map(Some),
    }
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub role: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(String, Role), AuthError> {
        let email = checked_email(&self.email)?;
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok((email, checked_role(self.role.trim())?))
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<String, AuthError> {
        if self.password.is_empty() {
            return Err(AuthError::InvalidInput("password is required".into()));
        }
        checked_email(&self.email)
    }
}

#[derive(Debug, Deserialize)]
pub struct OAuthLoginRequest {
    pub provider: String,
    pub id_token: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl OAuthLoginRequest {
    pub fn validate(&self) -> Result<Option<Role>, AuthError> {
        if self.provider.trim().is_empty() {
            return Err(AuthError::InvalidInput("provider is required".into()));
        }
        if self.id_token.is_empty() {
            return Err(AuthError::InvalidInput("id_token is required".into()));
        }
        optional_role(self.role.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl VerifyCodeRequest {
    pub fn validate(&self) -> Result<(String, Option<Role>), AuthError> {
        let email = checked_email(&self.email)?;
        if self.code.len() != CODE_LENGTH || !self.code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AuthError::InvalidInput(format!(
                "code must be {CODE_LENGTH} digits"
            )));
        }
        Ok((email, optional_role(self.role.as_deref())?))
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileSummary>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UserResponse {
    pub fn new(user: User, profile: Option<ProfileSummary>) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            profile,
            created_at: user.created_at,
        }
    }
}

/// Response returned after a successful login or registration.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

impl From<AuthSession> for AuthResponse {
    fn from(s: AuthSession) -> Self {
        Self {
            user: UserResponse::new(s.user, s.profile),
            token: s.token,
        }
    }
}

/// Returned with 202 when the caller must pick a role before an account is created.
#[derive(Debug, Serialize)]
pub struct NewUserResponse {
    pub is_new_user: bool,
    pub email: String,
    pub provider: Provider,
}

#[derive(Debug, Serialize)]
pub struct SendCodeResponse {
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
