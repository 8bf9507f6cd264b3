use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{
    EmailVerification, NewUser, ProfileSummary, Provider, User, UserRow,
};
use crate::db::is_unique_violation;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("stored record is invalid: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            e if is_unique_violation(&e) => StoreError::Conflict,
            e => StoreError::Database(e),
        }
    }
}

/// User records. Email and (provider, provider_id) are unique; `create` reports a clash as `Conflict`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<User, StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;
    async fn get_by_provider_identity(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<User, StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
}

/// One-time code records.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn insert(&self, record: &EmailVerification) -> Result<(), StoreError>;
    /// Any one unused record for (email, code) whose expiry is after `now`.
    async fn find_matching(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<Option<EmailVerification>, StoreError>;
    /// Flips `is_used` only if the record is still unused. Returns whether this call flipped it.
    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<ProfileSummary>, StoreError>;
}

const USER_COLUMNS: &str =
    "id, email, password_hash, role, provider, provider_id, is_verified, created_at, updated_at";

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(StoreError::Decode)
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_where(&self, predicate: &str, binds: &[&str]) -> Result<User, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for b in binds {
            query = query.bind(*b);
        }
        let row = query.fetch_optional(&self.db).await?;
        into_user(row.ok_or(StoreError::NotFound)?)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let user = User::from_new(new, OffsetDateTime::now_utc());
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, role, provider, provider_id,
                               is_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(user.provider.as_str())
            .bind(&user.provider_id)
            .bind(user.is_verified)
            .bind(user.created_at)
            .bind(user.updated_at)
            .fetch_one(&self.db)
            .await?;
        into_user(row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        into_user(row.ok_or(StoreError::NotFound)?)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.fetch_one_where("email = $1", &[email]).await
    }

    async fn get_by_provider_identity(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<User, StoreError> {
        self.fetch_one_where(
            "provider = $1 AND provider_id = $2",
            &[provider.as_str(), provider_id],
        )
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgVerificationStore {
    db: PgPool,
}

impl PgVerificationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VerificationStore for PgVerificationStore {
    async fn insert(&self, record: &EmailVerification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO email_verifications (id, email, code, expires_at, is_used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(&record.email)
        .bind(&record.code)
        .bind(record.expires_at)
        .bind(record.is_used)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_matching(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<Option<EmailVerification>, StoreError> {
        let record = sqlx::query_as::<_, EmailVerification>(
            r#"
            SELECT id, email, code, expires_at, is_used, created_at
            FROM email_verifications
            WHERE email = $1 AND code = $2 AND is_used = FALSE AND expires_at > $3
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(code)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(record)
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE email_verifications
               SET is_used = TRUE
             WHERE id = $1 AND is_used = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Clone)]
pub struct PgProfileDirectory {
    db: PgPool,
}

impl PgProfileDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileDirectory for PgProfileDirectory {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<ProfileSummary>, StoreError> {
        let profile = sqlx::query_as::<_, ProfileSummary>(
            r#"
            SELECT id, first_name, last_name, avatar_url
            FROM profiles
            WHERE user_id = $1
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(profile)
    }
}
