use axum::{
    extract::{FromRef, Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, MessageResponse, PublicUser, RequestEmailBody, SendTestEmailParams,
            SignupRequest, SignupResponse, TokenPair,
        },
        extractors::{Bearer, CurrentUser},
        jwt::{JwtKeys, TokenScope},
        password::{hash_password, verify_password},
        repo::User,
    },
    error::ApiError,
    mailer::{confirmation_email, test_email},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    let username = payload.username.trim();

    if !is_valid_email(&payload.email) {
        return Err(ApiError::bad_request("Invalid email"));
    }
    if username.is_empty() {
        return Err(ApiError::bad_request("Username must not be empty"));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::bad_request("Password too short"));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::conflict("Account"));
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create(&state.db, username, &payload.email, &hash).await?;

    // Best-effort confirmation email; a send failure leaves the user
    // unconfirmed.
    let keys = JwtKeys::from_ref(&state);
    match keys.sign_email(&user.email) {
        Ok(token) => state.mailer.enqueue(confirmation_email(
            &state.config.mail.base_url,
            &user.username,
            &user.email,
            &token,
        )),
        Err(e) => warn!(error = %e, "could not sign confirmation token"),
    }

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: user.into(),
            detail: "User created, check your email for confirmation",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    let user = User::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid email"))?;

    // Fails closed before the password check: an unconfirmed account must
    // complete the email confirmation step first.
    if !user.confirmed {
        warn!(email = %user.email, "login before email confirmation");
        return Err(ApiError::unauthorized("Email not confirmed"));
    }

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(email = %user.email, "login invalid password");
        return Err(ApiError::unauthorized("Invalid password"));
    }

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign_access(&user.email)?;
    let refresh_token = keys.sign_refresh(&user.email)?;
    User::update_refresh_token(&state.db, user.id, Some(&refresh_token)).await?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(TokenPair::bearer(access_token, refresh_token)))
}

#[instrument(skip(state, token))]
pub async fn refresh_token(
    State(state): State<AppState>,
    Bearer(token): Bearer,
) -> Result<Json<TokenPair>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let email = keys
        .decode_and_validate(&token, TokenScope::Refresh)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Could not validate credentials"))?;

    // Single-session policy: a presented token that is not the stored one
    // clears the stored token, forcing a fresh login.
    if user.refresh_token.as_deref() != Some(token.as_str()) {
        warn!(user_id = %user.id, "refresh token mismatch, clearing session");
        User::update_refresh_token(&state.db, user.id, None).await?;
        return Err(ApiError::unauthorized("Invalid refresh token"));
    }

    let access_token = keys.sign_access(&email)?;
    let refresh_token = keys.sign_refresh(&email)?;
    User::update_refresh_token(&state.db, user.id, Some(&refresh_token)).await?;

    Ok(Json(TokenPair::bearer(access_token, refresh_token)))
}

#[instrument(skip(state, token))]
pub async fn confirmed_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let email = keys
        .email_from_token(&token)
        .map_err(|_| ApiError::bad_request("Invalid token for email verification"))?;

    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::bad_request("Verification error"))?;

    if user.confirmed {
        return Ok(Json(MessageResponse::new("Your email is already confirmed")));
    }

    User::set_confirmed(&state.db, &email).await?;
    info!(user_id = %user.id, email = %email, "email confirmed");
    Ok(Json(MessageResponse::new("Email confirmed")))
}

/// Reports confirmation state only; no token is re-sent. Unconfirmed users
/// have no resend path here.
#[instrument(skip(state, body))]
pub async fn request_email(
    State(state): State<AppState>,
    Json(body): Json<RequestEmailBody>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = body.email.trim().to_lowercase();
    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::not_found("Account"))?;

    if user.confirmed {
        Ok(Json(MessageResponse::new("Your email is already confirmed")))
    } else {
        Ok(Json(MessageResponse::new("Confirmation pending")))
    }
}

#[instrument(skip(state))]
pub async fn send_test_email(
    State(state): State<AppState>,
    Query(params): Query<SendTestEmailParams>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !is_valid_email(&params.email_to_send) {
        return Err(ApiError::bad_request("Invalid email"));
    }
    state.mailer.enqueue(test_email(&params.email_to_send));
    Ok(Json(MessageResponse::new("Email has been queued")))
}

fn avatar_ext(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[instrument(skip(state, user, multipart))]
pub async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<PublicUser>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() == Some("file") {
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
            upload = Some((body, content_type));
        }
    }
    let (body, content_type) = upload.ok_or_else(|| ApiError::bad_request("file is required"))?;

    let ext = avatar_ext(&content_type).unwrap_or("bin");
    let key = format!("avatars/{}.{}", user.id, ext);
    state
        .storage
        .put_object(&key, body, &content_type)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    let url = state.storage.object_url(&key);
    let updated = User::update_avatar_url(&state.db, user.id, &url).await?;

    // Best-effort cleanup of the previous object when the key changed
    // (different extension leaves the old upload behind otherwise).
    if let Some(old_key) = user
        .avatar_url
        .as_deref()
        .and_then(|u| state.storage.key_from_url(u))
    {
        if old_key != key {
            if let Err(e) = state.storage.delete_object(&old_key).await {
                warn!(error = %e, key = %old_key, "stale avatar cleanup failed");
            }
        }
    }

    info!(user_id = %updated.id, url = %url, "avatar updated");
    Ok(Json(updated.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_regex_accepts_normal_addresses() {
        assert!(is_valid_email("jane@x.com"));
        assert!(is_valid_email("a.b+c@sub.domain.org"));
    }

    #[test]
    fn email_regex_rejects_garbage() {
        assert!(!is_valid_email("jane"));
        assert!(!is_valid_email("jane@"));
        assert!(!is_valid_email("jane@localhost"));
        assert!(!is_valid_email("ja ne@x.com"));
    }

    #[test]
    fn avatar_ext_maps_known_mime_types() {
        assert_eq!(avatar_ext("image/jpeg"), Some("jpg"));
        assert_eq!(avatar_ext("image/png"), Some("png"));
        assert_eq!(avatar_ext("image/webp"), Some("webp"));
        assert_eq!(avatar_ext("application/pdf"), None);
    }

    fn signup_request(email: &str) -> SignupRequest {
        SignupRequest {
            username: "jane".into(),
            email: email.into(),
            password: "password123".into(),
        }
    }

    async fn signed_up_user(state: &AppState, email: &str) -> User {
        signup(State(state.clone()), Json(signup_request(email)))
            .await
            .expect("signup");
        User::find_by_email(&state.db, email)
            .await
            .expect("query")
            .expect("user exists")
    }

    #[sqlx::test]
    async fn signup_rejects_duplicate_email(pool: sqlx::PgPool) {
        let state = AppState::fake_with_pool(pool);
        signed_up_user(&state, "dup@x.com").await;

        let err = signup(State(state.clone()), Json(signup_request("dup@x.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[sqlx::test]
    async fn login_rejects_unconfirmed_email_before_password(pool: sqlx::PgPool) {
        let state = AppState::fake_with_pool(pool);
        signed_up_user(&state, "new@x.com").await;

        // Even the correct password is refused until the email is confirmed.
        let err = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "new@x.com".into(),
                password: "password123".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(msg) if msg == "Email not confirmed"));
    }

    #[sqlx::test]
    async fn login_persists_issued_refresh_token(pool: sqlx::PgPool) {
        let state = AppState::fake_with_pool(pool);
        signed_up_user(&state, "ok@x.com").await;
        User::set_confirmed(&state.db, "ok@x.com").await.expect("confirm");

        let Json(pair) = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "ok@x.com".into(),
                password: "password123".into(),
            }),
        )
        .await
        .expect("login");

        let user = User::find_by_email(&state.db, "ok@x.com")
            .await
            .expect("query")
            .expect("user exists");
        assert_eq!(user.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));

        let err = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "ok@x.com".into(),
                password: "wrong-password".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(msg) if msg == "Invalid password"));
    }

    #[sqlx::test]
    async fn refresh_with_unstored_token_clears_session(pool: sqlx::PgPool) {
        let state = AppState::fake_with_pool(pool);
        let user = signed_up_user(&state, "single@x.com").await;
        User::set_confirmed(&state.db, "single@x.com").await.expect("confirm");

        let Json(pair) = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "single@x.com".into(),
                password: "password123".into(),
            }),
        )
        .await
        .expect("login");

        // A second, validly signed refresh token that was never stored.
        // The sleep guarantees a distinct iat, so the token strings differ.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let keys = JwtKeys::from_ref(&state);
        let stray = keys.sign_refresh("single@x.com").expect("sign");
        assert_ne!(stray, pair.refresh_token);

        let err = refresh_token(State(state.clone()), Bearer(stray))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(msg) if msg == "Invalid refresh token"));

        // The mismatch cleared the stored token, so the previously valid
        // one no longer works either: a fresh login is required.
        let cleared = User::find_by_email(&state.db, "single@x.com")
            .await
            .expect("query")
            .expect("user exists");
        assert_eq!(cleared.refresh_token, None);
        assert_eq!(cleared.id, user.id);

        let err = refresh_token(State(state.clone()), Bearer(pair.refresh_token))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[sqlx::test]
    async fn refresh_rotates_and_invalidates_old_token(pool: sqlx::PgPool) {
        let state = AppState::fake_with_pool(pool);
        signed_up_user(&state, "rotate@x.com").await;
        User::set_confirmed(&state.db, "rotate@x.com").await.expect("confirm");

        let Json(pair) = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "rotate@x.com".into(),
                password: "password123".into(),
            }),
        )
        .await
        .expect("login");

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let Json(rotated) = refresh_token(State(state.clone()), Bearer(pair.refresh_token.clone()))
            .await
            .expect("refresh with stored token");
        assert_ne!(rotated.refresh_token, pair.refresh_token);

        let err = refresh_token(State(state.clone()), Bearer(pair.refresh_token))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[sqlx::test]
    async fn confirmed_email_is_idempotent(pool: sqlx::PgPool) {
        let state = AppState::fake_with_pool(pool);
        signed_up_user(&state, "confirm@x.com").await;

        let keys = JwtKeys::from_ref(&state);
        let token = keys.sign_email("confirm@x.com").expect("sign");

        let Json(first) = confirmed_email(State(state.clone()), Path(token.clone()))
            .await
            .expect("confirm");
        assert_eq!(first.message, "Email confirmed");

        let Json(again) = confirmed_email(State(state.clone()), Path(token))
            .await
            .expect("confirm again");
        assert_eq!(again.message, "Your email is already confirmed");
    }

    #[sqlx::test]
    async fn request_email_normalizes_address(pool: sqlx::PgPool) {
        let state = AppState::fake_with_pool(pool);
        signed_up_user(&state, "case@x.com").await;

        let Json(resp) = request_email(
            State(state.clone()),
            Json(RequestEmailBody {
                email: "  CASE@X.COM ".into(),
            }),
        )
        .await
        .expect("known account");
        assert_eq!(resp.message, "Confirmation pending");

        let err = request_email(
            State(state.clone()),
            Json(RequestEmailBody {
                email: "nobody@x.com".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
