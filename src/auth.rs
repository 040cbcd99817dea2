use crate::db::{is_unique_violation, UserRepository};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sqlx::SqlitePool;
use thiserror::Error;

/// Username recorded for uploads made without credentials.
pub const ANONYMOUS: &str = "anonymous";

const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 16;

/// Length of a raw auth token before base64 encoding
const AUTH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid request")]
    InvalidRequest,
    #[error("username contains illegal characters or has an invalid length")]
    InvalidName,
    #[error("username is already in use")]
    UserExists,
    #[error("incorrect username or password")]
    IncorrectPassword,
    #[error("invalid auth token")]
    InvalidAuthToken,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Check a username against `[a-zA-Z0-9_-]{3,16}`.
pub fn valid_username(name: &str) -> bool {
    (MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Generate a fresh auth token: 32 random bytes, unpadded standard base64.
pub fn generate_auth_token() -> String {
    let mut bytes = [0u8; AUTH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD_NO_PAD.encode(bytes)
}

/// bcrypt is CPU bound; run it on the blocking pool.
async fn hash_secret(secret: String, cost: u32) -> Result<String, AuthError> {
    Ok(tokio::task::spawn_blocking(move || bcrypt::hash(secret, cost)).await??)
}

async fn verify_secret(secret: String, hash: String) -> Result<bool, AuthError> {
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash)).await?;
    // A malformed stored hash counts as a mismatch.
    Ok(verified.unwrap_or(false))
}

/// Create an account and return its first auth token.
pub async fn register(
    db: &SqlitePool,
    username: &str,
    password: &str,
    password_cost: u32,
    token_cost: u32,
) -> Result<String, AuthError> {
    if !valid_username(username) {
        return Err(AuthError::InvalidName);
    }
    if username.eq_ignore_ascii_case(ANONYMOUS) {
        return Err(AuthError::UserExists);
    }

    let users = UserRepository::new(db);
    if users.exists(username).await? {
        return Err(AuthError::UserExists);
    }

    let password_hash = hash_secret(password.to_string(), password_cost).await?;
    let token = generate_auth_token();
    let token_hash = hash_secret(token.clone(), token_cost).await?;

    users
        .create(username, &password_hash, &token_hash)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AuthError::UserExists
            } else {
                AuthError::Database(e)
            }
        })?;

    Ok(token)
}

/// Verify a password and issue a new auth token, replacing the previous one.
pub async fn login(
    db: &SqlitePool,
    username: &str,
    password: &str,
    token_cost: u32,
) -> Result<String, AuthError> {
    let users = UserRepository::new(db);
    let hash = users
        .password_hash(username)
        .await?
        .ok_or(AuthError::IncorrectPassword)?;

    if !verify_secret(password.to_string(), hash).await? {
        return Err(AuthError::IncorrectPassword);
    }

    let token = generate_auth_token();
    let token_hash = hash_secret(token.clone(), token_cost).await?;
    users.set_token(username, &token_hash).await?;

    Ok(token)
}

/// Check that `token` is the current auth token of `username`.
pub async fn check_auth_token(
    db: &SqlitePool,
    username: &str,
    token: &str,
) -> Result<(), AuthError> {
    let hash = UserRepository::new(db)
        .token_hash(username)
        .await?
        .ok_or(AuthError::InvalidAuthToken)?;

    if verify_secret(token.to_string(), hash).await? {
        Ok(())
    } else {
        Err(AuthError::InvalidAuthToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    const COST: u32 = 4;

    async fn test_pool() -> SqlitePool {
        db::connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn username_rules() {
        assert!(valid_username("bob"));
        assert!(valid_username("Some_user-16char"));
        assert!(!valid_username("ab"));
        assert!(!valid_username("seventeen_chars_x"));
        assert!(!valid_username("spaces here"));
        assert!(!valid_username("ünïcode"));
    }

    #[test]
    fn tokens_are_random_unpadded_base64() {
        let a = generate_auth_token();
        let b = generate_auth_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.ends_with('='));
        assert_eq!(STANDARD_NO_PAD.decode(&a).unwrap().len(), AUTH_TOKEN_BYTES);
    }

    #[tokio::test]
    async fn register_then_check_token() {
        let pool = test_pool().await;

        let token = register(&pool, "alice", "hunter2", COST, COST).await.unwrap();
        check_auth_token(&pool, "alice", &token).await.unwrap();

        assert!(matches!(
            check_auth_token(&pool, "alice", "wrong").await,
            Err(AuthError::InvalidAuthToken)
        ));
        assert!(matches!(
            check_auth_token(&pool, "nobody", &token).await,
            Err(AuthError::InvalidAuthToken)
        ));
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_names() {
        let pool = test_pool().await;

        register(&pool, "alice", "pw", COST, COST).await.unwrap();
        assert!(matches!(
            register(&pool, "alice", "pw", COST, COST).await,
            Err(AuthError::UserExists)
        ));
        assert!(matches!(
            register(&pool, "a!", "pw", COST, COST).await,
            Err(AuthError::InvalidName)
        ));
        assert!(matches!(
            register(&pool, "Anonymous", "pw", COST, COST).await,
            Err(AuthError::UserExists)
        ));
    }

    #[tokio::test]
    async fn login_rotates_token() {
        let pool = test_pool().await;

        let first = register(&pool, "alice", "hunter2", COST, COST).await.unwrap();
        let second = login(&pool, "alice", "hunter2", COST).await.unwrap();
        assert_ne!(first, second);

        check_auth_token(&pool, "alice", &second).await.unwrap();
        assert!(check_auth_token(&pool, "alice", &first).await.is_err());
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let pool = test_pool().await;
        register(&pool, "alice", "hunter2", COST, COST).await.unwrap();

        assert!(matches!(
            login(&pool, "alice", "wrong", COST).await,
            Err(AuthError::IncorrectPassword)
        ));
        assert!(matches!(
            login(&pool, "nobody", "hunter2", COST).await,
            Err(AuthError::IncorrectPassword)
        ));
    }
}
