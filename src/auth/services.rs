use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    claims::AuthenticatedIdentity,
    codes::{CodeDelivery, VerificationCodes},
    jwt::TokenIssuer,
    oauth::ProviderRegistry,
    password::{hash_password, verify_against_dummy, verify_password, HashingError},
    repo::{ProfileDirectory, StoreError, UserStore},
    repo_types::{NewUser, ProfileSummary, Provider, Role, User},
};
use crate::error::AuthError;

/// A minted token together with the account it was minted for.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
    pub profile: Option<ProfileSummary>,
}

/// Result of a login path that can also discover a brand-new identity.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(AuthSession),
    /// The credential is valid but no account exists yet; retry with a role to create one.
    NewIdentityPending { email: String, provider: Provider },
}

/// Fresh view of the caller's account.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user: User,
    pub profile: Option<ProfileSummary>,
}

/// Resolves password, OAuth, and email-code credentials into authenticated identities.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    profiles: Arc<dyn ProfileDirectory>,
    codes: VerificationCodes,
    delivery: Arc<dyn CodeDelivery>,
    providers: ProviderRegistry,
    tokens: TokenIssuer,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        profiles: Arc<dyn ProfileDirectory>,
        codes: VerificationCodes,
        delivery: Arc<dyn CodeDelivery>,
        providers: ProviderRegistry,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            users,
            profiles,
            codes,
            delivery,
            providers,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    #[instrument(skip(self, password))]
    pub async fn register_password(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<AuthSession, AuthError> {
        ensure_self_service(role)?;

        match self.users.get_by_email(email).await {
            Ok(_) => {
                warn!(%email, "email already registered");
                return Err(AuthError::Conflict("user with this email already exists".into()));
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let hash = hash_blocking(password.to_string()).await?;
        let user = self
            .users
            .create(NewUser {
                email: email.to_string(),
                password_hash: Some(hash),
                role,
                provider: Provider::Local,
                provider_id: String::new(),
                is_verified: false,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict => {
                    AuthError::Conflict("user with this email already exists".into())
                }
                e => e.into(),
            })?;

        info!(user_id = %user.id, %email, role = %role, "user registered");
        self.session_for(user).await
    }

    /// Unknown email and wrong password produce the same error.
    #[instrument(skip(self, password))]
    pub async fn login_password(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = match self.users.get_by_email(email).await {
            Ok(u) => u,
            Err(StoreError::NotFound) => {
                warn!(%email, "login unknown email");
                burn_blocking(password.to_string()).await?;
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(hash) = user.password_hash.clone() else {
            warn!(user_id = %user.id, provider = %user.provider, "password login on passwordless account");
            burn_blocking(password.to_string()).await?;
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_blocking(password.to_string(), hash).await? {
            warn!(%email, user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %user.id, %email, "user logged in");
        self.session_for(user).await
    }

    /// Issues a code and hands it to the delivery collaborator. Returns the code's expiry.
    #[instrument(skip(self))]
    pub async fn request_email_code(&self, email: &str) -> Result<OffsetDateTime, AuthError> {
        let record = self.codes.issue(email).await?;
        self.delivery.send(email, &record.code).await.map_err(|e| {
            warn!(error = %e, %email, "verification code delivery failed");
            AuthError::Delivery(e)
        })?;
        Ok(record.expires_at)
    }

    /// Without a role the code is only checked and stays valid for a later call.
    #[instrument(skip(self, code))]
    pub async fn complete_email_login(
        &self,
        email: &str,
        code: &str,
        role: Option<Role>,
    ) -> Result<LoginOutcome, AuthError> {
        if let Some(role) = role {
            ensure_self_service(role)?;
        }

        self.codes.verify(email, code, role.is_some()).await.map_err(|e| {
            let e = AuthError::from(e);
            if matches!(e, AuthError::InvalidOrExpiredCode) {
                warn!(%email, "email code rejected");
            }
            e
        })?;

        match self.users.get_by_email(email).await {
            Ok(user) => {
                info!(user_id = %user.id, %email, "user logged in with email code");
                self.session_for(user).await.map(LoginOutcome::Authenticated)
            }
            Err(StoreError::NotFound) => match role {
                None => Ok(LoginOutcome::NewIdentityPending {
                    email: email.to_string(),
                    provider: Provider::Email,
                }),
                Some(role) => {
                    let new = NewUser {
                        email: email.to_string(),
                        password_hash: None,
                        role,
                        provider: Provider::Email,
                        provider_id: String::new(),
                        is_verified: true,
                    };
                    let user = self
                        .create_or_adopt(new, || self.users.get_by_email(email))
                        .await?;
                    self.session_for(user).await.map(LoginOutcome::Authenticated)
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, id_token))]
    pub async fn oauth_login(
        &self,
        provider: &str,
        id_token: &str,
        role: Option<Role>,
    ) -> Result<LoginOutcome, AuthError> {
        let provider = self.providers.resolve(provider)?;
        if let Some(role) = role {
            ensure_self_service(role)?;
        }

        let identity = self.providers.verify(provider, id_token).await.map_err(|e| {
            warn!(error = %e, %provider, "oauth verification failed");
            AuthError::from(e)
        })?;

        let subject = identity.provider_subject_id.as_str();
        match self.users.get_by_provider_identity(provider, subject).await {
            Ok(user) => {
                info!(user_id = %user.id, %provider, "user logged in with oauth");
                self.session_for(user).await.map(LoginOutcome::Authenticated)
            }
            Err(StoreError::NotFound) => match role {
                None => Ok(LoginOutcome::NewIdentityPending {
                    email: identity.email,
                    provider,
                }),
                Some(role) => {
                    let new = NewUser {
                        email: identity.email.clone(),
                        password_hash: None,
                        role,
                        provider,
                        provider_id: subject.to_string(),
                        is_verified: identity.is_verified,
                    };
                    let user = self
                        .create_or_adopt(new, || {
                            self.users.get_by_provider_identity(provider, subject)
                        })
                        .await?;
                    self.session_for(user).await.map(LoginOutcome::Authenticated)
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Trusts the token's claims; no store round-trip.
    pub fn validate_token(&self, token: &str) -> Result<AuthenticatedIdentity, AuthError> {
        self.tokens.validate(token).map_err(|e| {
            warn!(error = %e, "token rejected");
            AuthError::Token(e)
        })
    }

    #[instrument(skip(self))]
    pub async fn current_user(&self, user_id: Uuid) -> Result<CurrentUser, AuthError> {
        let user = self.users.get_by_id(user_id).await?;
        let profile = self.profiles.find_by_user(user.id).await?;
        Ok(CurrentUser { user, profile })
    }

    pub async fn ready(&self) -> Result<(), AuthError> {
        self.users.ping().await.map_err(AuthError::from)
    }

    /// Creates the user; if a concurrent caller won the insert, adopts the account they
    /// created when `lookup` finds it, otherwise reports the clash as a conflict.
    async fn create_or_adopt<F, Fut>(&self, new: NewUser, lookup: F) -> Result<User, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<User, StoreError>>,
    {
        let email = new.email.clone();
        let provider = new.provider;
        match self.users.create(new).await {
            Ok(user) => {
                info!(user_id = %user.id, %email, %provider, role = %user.role, "user created");
                Ok(user)
            }
            Err(StoreError::Conflict) => match lookup().await {
                Ok(user) => {
                    warn!(user_id = %user.id, %provider, "lost registration race; using existing account");
                    Ok(user)
                }
                Err(StoreError::NotFound) => {
                    warn!(%email, %provider, "email already owned by another account");
                    Err(AuthError::Conflict(
                        "an account with this email already exists".into(),
                    ))
                }
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn session_for(&self, user: User) -> Result<AuthSession, AuthError> {
        let token = self.tokens.issue(user.id, &user.email, user.role)?;
        let profile = self.profiles.find_by_user(user.id).await?;
        Ok(AuthSession {
            token,
            user,
            profile,
        })
    }
}

fn ensure_self_service(role: Role) -> Result<(), AuthError> {
    if role.is_self_service() {
        Ok(())
    } else {
        Err(AuthError::InvalidInput("role must be mentor or mentee".into()))
    }
}

async fn hash_blocking(password: String) -> Result<String, AuthError> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(HashingError::from)??;
    Ok(hash)
}

/// Spends one Argon2 verification so a miss costs the same as a wrong password.
async fn burn_blocking(password: String) -> Result<(), AuthError> {
    tokio::task::spawn_blocking(move || verify_against_dummy(&password))
        .await
        .map_err(HashingError::from)?;
    Ok(())
}

async fn verify_blocking(password: String, hash: String) -> Result<bool, AuthError> {
    let ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(HashingError::from)?;
    Ok(ok)
}
