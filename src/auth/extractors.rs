use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::auth::jwt::{JwtKeys, TokenScope};
use crate::auth::repo::User;
use crate::error::ApiError;
use crate::state::AppState;

fn bearer_token(parts: &Parts) -> Result<String, ApiError> {
    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header"))
}

/// Raw bearer token, without decoding. The refresh handler validates the
/// scope itself and compares the token against the stored value.
pub struct Bearer(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Bearer(bearer_token(parts)?))
    }
}

/// Validated access token plus the user it belongs to.
///
/// Decodes the bearer token with the access scope, then looks the user up
/// by the subject email. Either failure is a 401.
#[derive(Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let keys = JwtKeys::from_ref(state);
        let email = keys
            .decode_and_validate(&token, TokenScope::Access)
            .map_err(|_| ApiError::unauthorized("Could not validate credentials"))?;

        let user = User::find_by_email(&state.db, &email)
            .await
            .map_err(|_| ApiError::unauthorized("Could not validate credentials"))?
            .ok_or_else(|| ApiError::unauthorized("Could not validate credentials"))?;

        Ok(CurrentUser(user))
    }
}
