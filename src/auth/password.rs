use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use thiserror::Error;
use tracing::error;

lazy_static! {
    /// Hash of a throwaway password, verified against when no real hash exists.
    static ref DUMMY_HASH: Option<String> = hash_password("mentori-dummy-password").ok();
}

/// Hashing could not complete (salt generation or parameter failure).
#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct HashingError(String);

impl From<tokio::task::JoinError> for HashingError {
    fn from(e: tokio::task::JoinError) -> Self {
        HashingError(format!("hashing task aborted: {e}"))
    }
}

/// Hash with Argon2id and a fresh random salt embedded in the PHC string.
pub fn hash_password(plain: &str) -> Result<String, HashingError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            HashingError(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Constant-time check. A mismatch and an unparsable stored hash both yield `false`.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "argon2 parse hash error");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Runs a full verification against a fixed hash; the outcome is discarded.
pub fn verify_against_dummy(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}
