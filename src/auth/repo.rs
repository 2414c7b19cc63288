use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub confirmed: bool,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, confirmed, refresh_token, avatar_url, created_at";

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
    }

    /// Creates an unconfirmed user. Unique violations on email or username
    /// bubble up as database errors.
    pub async fn create(
        db: &PgPool,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, password_hash)
             VALUES ($1, $2, $3)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await
    }

    pub async fn set_confirmed(db: &PgPool, email: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET confirmed = TRUE WHERE email = $1")
            .bind(email)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Stores the latest refresh token, or clears it when `token` is None.
    /// There is exactly one active refresh token per user.
    pub async fn update_refresh_token(
        db: &PgPool,
        user_id: Uuid,
        token: Option<&str>,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET refresh_token = $1 WHERE id = $2")
            .bind(token)
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_avatar_url(db: &PgPool, user_id: Uuid, url: &str) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET avatar_url = $1 WHERE id = $2 RETURNING {USER_COLUMNS}"
        ))
        .bind(url)
        .bind(user_id)
        .fetch_one(db)
        .await
    }
}
