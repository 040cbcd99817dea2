//! SQLite persistence for users and image metadata.

use crate::models::ImageEntry;
use crate::search::SearchFilter;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        username    TEXT PRIMARY KEY,
        password    TEXT NOT NULL,
        auth_token  TEXT
    )",
    "CREATE TABLE IF NOT EXISTS images (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        image_name  TEXT NOT NULL UNIQUE,
        format      TEXT NOT NULL,
        mime_type   TEXT NOT NULL,
        adder       TEXT NOT NULL,
        adder_ip    TEXT NOT NULL,
        client      TEXT NOT NULL,
        timestamp   INTEGER NOT NULL,
        hidden      BOOLEAN NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_images_adder ON images(adder)",
    "CREATE INDEX IF NOT EXISTS idx_images_timestamp ON images(timestamp)",
];

const IMAGE_COLUMNS: &str =
    "id, image_name, format, mime_type, adder, adder_ip, client, timestamp, hidden";

/// Open the pool (creating the database file if needed) and apply the schema.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let mut pool_options = SqlitePoolOptions::new();
    if database_url.contains(":memory:") {
        // Every connection to :memory: is a separate database.
        pool_options = pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!("Database schema is up to date");
    Ok(())
}

/// Image metadata written on upload or replace.
#[derive(Debug, Clone)]
pub struct NewImage<'a> {
    pub name: &'a str,
    pub format: &'a str,
    pub mime_type: &'a str,
    pub adder: &'a str,
    pub adder_ip: &'a str,
    pub client: &'a str,
    pub timestamp: i64,
    pub hidden: bool,
}

pub struct ImageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ImageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Username of whoever uploaded the image, if it exists.
    pub async fn owner(&self, name: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT adder FROM images WHERE image_name = ?")
            .bind(name)
            .fetch_optional(self.pool)
            .await
    }

    pub async fn query(&self, name: &str) -> Result<Option<ImageEntry>, sqlx::Error> {
        let sql = format!("SELECT {} FROM images WHERE image_name = ?", IMAGE_COLUMNS);
        sqlx::query_as::<_, ImageEntry>(&sql)
            .bind(name)
            .fetch_optional(self.pool)
            .await
    }

    /// Insert a new image row and return its id.
    pub async fn insert(&self, image: &NewImage<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO images (image_name, format, mime_type, adder, adder_ip, client, timestamp, hidden)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(image.name)
        .bind(image.format)
        .bind(image.mime_type)
        .bind(image.adder)
        .bind(image.adder_ip)
        .bind(image.client)
        .bind(image.timestamp)
        .bind(image.hidden)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite the metadata of an existing image. The owner never changes.
    pub async fn update(&self, image: &NewImage<'_>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE images SET format = ?, mime_type = ?, adder_ip = ?, client = ?, timestamp = ?, hidden = ?
             WHERE image_name = ?",
        )
        .bind(image.format)
        .bind(image.mime_type)
        .bind(image.adder_ip)
        .bind(image.client)
        .bind(image.timestamp)
        .bind(image.hidden)
        .bind(image.name)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn remove(&self, name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM images WHERE image_name = ?")
            .bind(name)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_hidden(&self, name: &str, hidden: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE images SET hidden = ? WHERE image_name = ?")
            .bind(hidden)
            .bind(name)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn search(&self, filter: &SearchFilter) -> Result<Vec<ImageEntry>, sqlx::Error> {
        let mut query = filter.query(IMAGE_COLUMNS);
        query
            .build_query_as::<ImageEntry>()
            .fetch_all(self.pool)
            .await
    }
}

pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn exists(&self, username: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
            .bind(username)
            .fetch_one(self.pool)
            .await
    }

    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
        token_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO users (username, password, auth_token) VALUES (?, ?, ?)")
            .bind(username)
            .bind(password_hash)
            .bind(token_hash)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn password_hash(&self, username: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool)
            .await
    }

    pub async fn token_hash(&self, username: &str) -> Result<Option<String>, sqlx::Error> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT auth_token FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(self.pool)
                .await?;
        Ok(hash.flatten())
    }

    pub async fn set_token(&self, username: &str, token_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET auth_token = ? WHERE username = ?")
            .bind(token_hash)
            .bind(username)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Whether the error is a UNIQUE/PRIMARY KEY violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        connect("sqlite::memory:").await.unwrap()
    }

    fn image<'a>(name: &'a str, adder: &'a str, timestamp: i64) -> NewImage<'a> {
        NewImage {
            name,
            format: "png",
            mime_type: "png",
            adder,
            adder_ip: "127.0.0.1",
            client: "test-client",
            timestamp,
            hidden: false,
        }
    }

    #[tokio::test]
    async fn insert_and_query_image() {
        let pool = test_pool().await;
        let images = ImageRepository::new(&pool);

        let id = images.insert(&image("abcde", "alice", 100)).await.unwrap();
        assert!(id > 0);

        let entry = images.query("abcde").await.unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.adder, "alice");
        assert_eq!(entry.timestamp, 100);
        assert!(!entry.hidden);

        assert_eq!(images.owner("abcde").await.unwrap().as_deref(), Some("alice"));
        assert!(images.owner("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_name_is_unique_violation() {
        let pool = test_pool().await;
        let images = ImageRepository::new(&pool);

        images.insert(&image("abcde", "alice", 1)).await.unwrap();
        let err = images.insert(&image("abcde", "bob", 2)).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn update_keeps_owner() {
        let pool = test_pool().await;
        let images = ImageRepository::new(&pool);

        images.insert(&image("abcde", "alice", 1)).await.unwrap();
        let replacement = NewImage {
            format: "gif",
            mime_type: "gif",
            hidden: true,
            ..image("abcde", "mallory", 2)
        };
        assert!(images.update(&replacement).await.unwrap());

        let entry = images.query("abcde").await.unwrap().unwrap();
        assert_eq!(entry.adder, "alice");
        assert_eq!(entry.format, "gif");
        assert_eq!(entry.timestamp, 2);
        assert!(entry.hidden);
    }

    #[tokio::test]
    async fn set_hidden_and_remove() {
        let pool = test_pool().await;
        let images = ImageRepository::new(&pool);

        images.insert(&image("abcde", "alice", 1)).await.unwrap();
        assert!(images.set_hidden("abcde", true).await.unwrap());
        assert!(images.query("abcde").await.unwrap().unwrap().hidden);

        assert!(images.remove("abcde").await.unwrap());
        assert!(!images.remove("abcde").await.unwrap());
        assert!(!images.set_hidden("abcde", false).await.unwrap());
    }

    #[tokio::test]
    async fn user_tokens() {
        let pool = test_pool().await;
        let users = UserRepository::new(&pool);

        assert!(!users.exists("alice").await.unwrap());
        users.create("alice", "pw-hash", "token-hash").await.unwrap();
        assert!(users.exists("alice").await.unwrap());
        assert_eq!(
            users.password_hash("alice").await.unwrap().as_deref(),
            Some("pw-hash")
        );

        assert!(users.set_token("alice", "new-hash").await.unwrap());
        assert_eq!(
            users.token_hash("alice").await.unwrap().as_deref(),
            Some("new-hash")
        );
        assert!(users.token_hash("bob").await.unwrap().is_none());

        let err = users.create("alice", "x", "y").await.unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
