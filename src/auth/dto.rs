use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for the request_email endpoint.
#[derive(Debug, Deserialize)]
pub struct RequestEmailBody {
    pub email: String,
}

/// Query parameters for the test-email endpoint.
#[derive(Debug, Deserialize)]
pub struct SendTestEmailParams {
    pub email_to_send: String,
}

/// Access/refresh pair returned by login and refresh_token.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

impl TokenPair {
    pub fn bearer(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "bearer",
        }
    }
}

/// Public part of the user returned to clients.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub confirmed: bool,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            confirmed: u.confirmed,
            avatar_url: u.avatar_url,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: PublicUser,
    pub detail: &'static str,
}

/// Plain message payload for confirmation-flow endpoints.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pair_serializes_bearer_type() {
        let pair = TokenPair::bearer("a".into(), "r".into());
        let json = serde_json::to_string(&pair).unwrap();
        assert!(json.contains("\"token_type\":\"bearer\""));
        assert!(json.contains("\"access_token\":\"a\""));
        assert!(json.contains("\"refresh_token\":\"r\""));
    }

    #[test]
    fn public_user_omits_password_hash() {
        let user = PublicUser {
            id: Uuid::new_v4(),
            username: "jane".into(),
            email: "jane@x.com".into(),
            confirmed: false,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("jane@x.com"));
        assert!(!json.contains("password"));
    }
}
