use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::{rngs::OsRng, Rng};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    repo::{StoreError, VerificationStore},
    repo_types::EmailVerification,
};

pub const CODE_LENGTH: usize = 6;

/// Source of "now" for code expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Error)]
pub enum CodeError {
    #[error("invalid or expired verification code")]
    InvalidOrExpired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
#[error("code delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Sends a freshly issued code to its owner.
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn send(&self, email: &str, code: &str) -> Result<(), DeliveryError>;
}

/// Writes codes to the log instead of mailing them. `reveal_code` is off in production.
pub struct LogDelivery {
    reveal_code: bool,
}

impl LogDelivery {
    pub fn new(reveal_code: bool) -> Self {
        Self { reveal_code }
    }
}

#[async_trait]
impl CodeDelivery for LogDelivery {
    async fn send(&self, email: &str, code: &str) -> Result<(), DeliveryError> {
        if self.reveal_code {
            info!(%email, %code, "verification code issued");
        } else {
            info!(%email, "verification code issued");
        }
        Ok(())
    }
}

/// Six digits, each drawn independently from the OS CSPRNG.
pub fn generate_code() -> String {
    let mut rng = OsRng;
    (0..CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Issues and checks one-time email codes.
///
/// Issuing never invalidates earlier codes for the same address; each stays
/// valid until it is consumed or its expiry passes.
#[derive(Clone)]
pub struct VerificationCodes {
    store: Arc<dyn VerificationStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl VerificationCodes {
    pub fn new(store: Arc<dyn VerificationStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    #[instrument(skip(self))]
    pub async fn issue(&self, email: &str) -> Result<EmailVerification, StoreError> {
        let now = self.clock.now();
        let record = EmailVerification {
            id: Uuid::new_v4(),
            email: email.to_string(),
            code: generate_code(),
            expires_at: now + self.ttl,
            is_used: false,
            created_at: now,
        };
        self.store.insert(&record).await?;
        debug!(verification_id = %record.id, expires_at = %record.expires_at, "code stored");
        Ok(record)
    }

    /// Checks a code; with `consume` the matching record is atomically marked used.
    #[instrument(skip(self, code))]
    pub async fn verify(
        &self,
        email: &str,
        code: &str,
        consume: bool,
    ) -> Result<EmailVerification, CodeError> {
        let record = self
            .store
            .find_matching(email, code, self.clock.now())
            .await?
            .ok_or(CodeError::InvalidOrExpired)?;
        if consume {
            self.consume(&record).await?;
        }
        Ok(record)
    }

    /// Marks a previously matched record used. Losing a race reads as an invalid code.
    async fn consume(&self, record: &EmailVerification) -> Result<(), CodeError> {
        if self.store.mark_used(record.id).await? {
            debug!(verification_id = %record.id, "code consumed");
            Ok(())
        } else {
            Err(CodeError::InvalidOrExpired)
        }
    }
}
