use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Role a user acts under on the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mentor,
    Mentee,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Mentor => "mentor",
            Role::Mentee => "mentee",
            Role::Admin => "admin",
        }
    }

    /// Roles a caller may pick for themselves when an account is created.
    pub fn is_self_service(self) -> bool {
        !matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mentor" => Ok(Role::Mentor),
            "mentee" => Ok(Role::Mentee),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Where an account's credentials come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Google,
    Apple,
    Email,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Google => "google",
            Provider::Apple => "apple",
            Provider::Email => "email",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Provider::Local),
            "google" => Ok(Provider::Google),
            "apple" => Ok(Provider::Apple),
            "email" => Ok(Provider::Email),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// User record.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // Argon2 PHC string, local accounts only
    pub role: Role,
    pub provider: Provider,
    #[serde(skip_serializing)]
    pub provider_id: String, // external subject, empty for local/email
    pub is_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn from_new(new: NewUser, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            provider: new.provider,
            provider_id: new.provider_id,
            is_verified: new.is_verified,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields needed to create a user; id and timestamps are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub provider: Provider,
    pub provider_id: String,
    pub is_verified: bool,
}

/// Raw `users` row as stored; converted to [`User`] in one place.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub provider: String,
    pub provider_id: String,
    pub is_verified: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash.filter(|h| !h.is_empty()),
            role: row.role.parse()?,
            provider: row.provider.parse()?,
            provider_id: row.provider_id,
            is_verified: row.is_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// One-time email code record.
#[derive(Debug, Clone, FromRow)]
pub struct EmailVerification {
    pub id: Uuid,
    pub email: String,
    pub code: String,
    pub expires_at: OffsetDateTime,
    pub is_used: bool,
    pub created_at: OffsetDateTime,
}

/// The part of a user's profile returned alongside the identity.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
}
