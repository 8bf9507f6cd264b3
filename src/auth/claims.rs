use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::{ProfileSummary, Role};

/// JWT payload. Every field is required; a token missing or mistyping one fails to decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,     // user ID
    pub email: String, // email at issue time
    pub role: Role,    // role at issue time
    pub iat: u64,      // issued at (unix timestamp)
    pub exp: u64,      // expires at (unix timestamp)
    pub iss: String,   // issuer
}

/// Identity carried by a valid token.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileSummary>,
}

impl From<Claims> for AuthenticatedIdentity {
    fn from(c: Claims) -> Self {
        Self {
            user_id: c.sub,
            email: c.email,
            role: c.role,
            profile: None,
        }
    }
}
