use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::JwtConfig;
use crate::state::AppState;

/// Scope claim distinguishing access and refresh JWTs.
///
/// Email-verification tokens carry no scope claim at all, which is why
/// `Claims.scope` is optional.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    #[serde(rename = "access_token")]
    Access,
    #[serde(rename = "refresh_token")]
    Refresh,
}

/// JWT payload. `sub` is the user's email.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<TokenScope>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid scope for token")]
    InvalidScope,
    #[error("Could not validate credentials")]
    Invalid,
}

/// Holds JWT signing and verification keys plus per-scope TTLs.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    email_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            access_ttl_minutes,
            refresh_ttl_days,
            email_ttl_days,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: Duration::minutes(access_ttl_minutes),
            refresh_ttl: Duration::days(refresh_ttl_days),
            email_ttl: Duration::days(email_ttl_days),
        }
    }
}

impl JwtKeys {
    fn sign(&self, email: &str, ttl: Duration, scope: Option<TokenScope>) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: email.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: (now + ttl).unix_timestamp() as usize,
            scope,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(sub = %email, scope = ?scope, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, email: &str) -> anyhow::Result<String> {
        self.sign(email, self.access_ttl, Some(TokenScope::Access))
    }

    pub fn sign_refresh(&self, email: &str) -> anyhow::Result<String> {
        self.sign(email, self.refresh_ttl, Some(TokenScope::Refresh))
    }

    /// Email-verification token. Intentionally scope-less, mirroring the
    /// signup confirmation flow.
    pub fn sign_email(&self, email: &str) -> anyhow::Result<String> {
        self.sign(email, self.email_ttl, None)
    }

    /// Decodes a token and checks both the signature/expiry and the scope
    /// claim. Never returns a subject unless both checks pass.
    pub fn decode_and_validate(
        &self,
        token: &str,
        expected: TokenScope,
    ) -> Result<String, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| TokenError::Invalid)?;
        if data.claims.scope != Some(expected) {
            return Err(TokenError::InvalidScope);
        }
        Ok(data.claims.sub)
    }

    /// Decodes an email-verification token. Signature and expiry are
    /// checked; the scope claim is not enforced.
    pub fn email_from_token(&self, token: &str) -> Result<String, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| TokenError::Invalid)?;
        Ok(data.claims.sub)
    }
}
