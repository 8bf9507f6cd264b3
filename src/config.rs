use std::str::FromStr;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;

use crate::auth::oauth::GOOGLE_TOKENINFO_URL;

const DEV_JWT_SECRET: &str = "dev-only-secret-not-for-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => bail!("unknown APP_ENV {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    pub jwt: JwtConfig,
    pub google_tokeninfo_url: String,
    pub oauth_http_timeout_secs: u64,
    pub verification_ttl_minutes: u64,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = match std::env::var("APP_ENV") {
            Ok(v) => v.parse()?,
            Err(_) => Environment::Development,
        };
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: resolve_jwt_secret(environment, std::env::var("JWT_SECRET").ok())?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "mentori-api".into()),
            ttl_hours: env_number("JWT_TTL_HOURS", 24),
        };
        Ok(Self {
            database_url,
            environment,
            jwt,
            google_tokeninfo_url: std::env::var("GOOGLE_TOKENINFO_URL")
                .unwrap_or_else(|_| GOOGLE_TOKENINFO_URL.into()),
            oauth_http_timeout_secs: env_number("OAUTH_HTTP_TIMEOUT_SECS", 10),
            verification_ttl_minutes: env_number("VERIFICATION_CODE_TTL_MINUTES", 10),
            request_timeout_secs: env_number("REQUEST_TIMEOUT_SECS", 30),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn env_number<T: FromStr>(key: &str, default: T) -> T {
    parse_or(std::env::var(key).ok(), default)
}

/// Unparsable values, including negatives for unsigned settings, fall back to `default`.
fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Production refuses to start without a real secret; other environments fall back loudly.
fn resolve_jwt_secret(env: Environment, configured: Option<String>) -> anyhow::Result<String> {
    let configured = configured.filter(|s| !s.trim().is_empty() && s != DEV_JWT_SECRET);
    match (configured, env) {
        (Some(secret), _) => Ok(secret),
        (None, Environment::Production) => {
            bail!("JWT_SECRET must be set to a non-default value in production")
        }
        (None, env) => {
            warn!(?env, "JWT_SECRET not set, using development default");
            Ok(DEV_JWT_SECRET.to_string())
        }
    }
}
