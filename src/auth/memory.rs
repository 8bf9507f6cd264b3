//! In-memory collaborators for exercising the auth flows without Postgres or the network.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    codes::{Clock, CodeDelivery, DeliveryError, VerificationCodes},
    jwt::TokenIssuer,
    oauth::{OAuthError, OAuthIdentity, OAuthVerifier, ProviderRegistry},
    repo::{ProfileDirectory, StoreError, UserStore, VerificationStore},
    repo_types::{EmailVerification, NewUser, ProfileSummary, Provider, User},
    services::AuthService,
};
use crate::config::JwtConfig;

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        let clash = users.iter().any(|u| {
            u.email == new.email
                || (!new.provider_id.is_empty()
                    && u.provider == new.provider
                    && u.provider_id == new.provider_id)
        });
        if clash {
            return Err(StoreError::Conflict);
        }
        let user = User::from_new(new, OffsetDateTime::now_utc());
        users.push(user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        let users = self.users.lock().unwrap();
        users.iter().find(|u| u.id == id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        let users = self.users.lock().unwrap();
        users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_provider_identity(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<User, StoreError> {
        let users = self.users.lock().unwrap();
        users
            .iter()
            .find(|u| u.provider == provider && u.provider_id == provider_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryVerificationStore {
    records: Mutex<Vec<EmailVerification>>,
}

impl MemoryVerificationStore {
    pub fn is_used(&self, email: &str, code: &str) -> Option<bool> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .find(|r| r.email == email && r.code == code)
            .map(|r| r.is_used)
    }
}

#[async_trait]
impl VerificationStore for MemoryVerificationStore {
    async fn insert(&self, record: &EmailVerification) -> Result<(), StoreError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn find_matching(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<Option<EmailVerification>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| r.email == email && r.code == code && !r.is_used && r.expires_at > now)
            .cloned())
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id && !r.is_used) {
            Some(r) => {
                r.is_used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryProfiles {
    profiles: Mutex<HashMap<Uuid, ProfileSummary>>,
}

impl MemoryProfiles {
    pub fn insert(&self, user_id: Uuid, profile: ProfileSummary) {
        self.profiles.lock().unwrap().insert(user_id, profile);
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfiles {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<ProfileSummary>, StoreError> {
        Ok(self.profiles.lock().unwrap().get(&user_id).cloned())
    }
}

/// Keeps every delivered (email, code) pair.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
    fail: Mutex<bool>,
}

impl RecordingDelivery {
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        sent.iter().rev().find(|(e, _)| e == email).map(|(_, c)| c.clone())
    }

    pub fn fail_next(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl CodeDelivery for RecordingDelivery {
    async fn send(&self, email: &str, code: &str) -> Result<(), DeliveryError> {
        let mut fail = self.fail.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(DeliveryError("mailbox unavailable".into()));
        }
        self.sent.lock().unwrap().push((email.to_string(), code.to_string()));
        Ok(())
    }
}

pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(OffsetDateTime::now_utc()),
        }
    }

    pub fn advance(&self, by: time::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

/// Accepts tokens of the form registered with [`StaticVerifier::with`].
#[derive(Default)]
pub struct StaticVerifier {
    identities: HashMap<String, OAuthIdentity>,
}

impl StaticVerifier {
    pub fn with(mut self, token: &str, identity: OAuthIdentity) -> Self {
        self.identities.insert(token.to_string(), identity);
        self
    }
}

#[async_trait]
impl OAuthVerifier for StaticVerifier {
    async fn verify(&self, id_token: &str) -> Result<OAuthIdentity, OAuthError> {
        // Yield so concurrent callers interleave between verification and lookup.
        tokio::task::yield_now().await;
        self.identities
            .get(id_token)
            .cloned()
            .ok_or_else(|| OAuthError::TokenVerificationFailed("unknown token".into()))
    }
}

pub fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "test-secret".into(),
        issuer: "mentori-api".into(),
        ttl_hours: 24,
    }
}

pub fn google_identity(subject: &str, email: &str) -> OAuthIdentity {
    OAuthIdentity {
        email: email.into(),
        provider_subject_id: subject.into(),
        is_verified: true,
        display_name: "Test User".into(),
    }
}

/// A fully wired [`AuthService`] plus handles on its collaborators.
pub struct Harness {
    pub service: Arc<AuthService>,
    pub users: Arc<MemoryUserStore>,
    pub verifications: Arc<MemoryVerificationStore>,
    pub profiles: Arc<MemoryProfiles>,
    pub outbox: Arc<RecordingDelivery>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(StaticVerifier::default().with("google-token-new", google_identity("g-1", "g@x.com")))
}

pub fn harness_with(google: StaticVerifier) -> Harness {
    let users = Arc::new(MemoryUserStore::default());
    let verifications = Arc::new(MemoryVerificationStore::default());
    let profiles = Arc::new(MemoryProfiles::default());
    let outbox = Arc::new(RecordingDelivery::default());
    let clock = Arc::new(ManualClock::new());

    let codes = VerificationCodes::new(
        verifications.clone(),
        clock.clone(),
        Duration::from_secs(10 * 60),
    );
    let providers = ProviderRegistry::new().register(Provider::Google, Arc::new(google));
    let service = AuthService::new(
        users.clone(),
        profiles.clone(),
        codes,
        outbox.clone(),
        providers,
        TokenIssuer::new(&test_jwt_config()),
    );

    Harness {
        service: Arc::new(service),
        users,
        verifications,
        profiles,
        outbox,
        clock,
    }
}
