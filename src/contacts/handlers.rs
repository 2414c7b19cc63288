use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    auth::CurrentUser,
    contacts::dto::{ContactPayload, Pagination, SearchParams},
    contacts::repo::{self, Contact},
    error::ApiError,
    state::AppState,
};

#[instrument(skip(state, _user, payload))]
pub async fn create_contact(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(payload): Json<ContactPayload>,
) -> Result<(StatusCode, Json<Contact>), ApiError> {
    let contact = repo::create(&state.db, &payload).await?;
    info!(contact_id = contact.id, "contact created");
    Ok((StatusCode::CREATED, Json(contact)))
}

#[instrument(skip(state, _user))]
pub async fn list_contacts(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    // Negative values would be rejected by Postgres.
    let contacts = repo::list(&state.db, p.limit.max(0), p.offset.max(0)).await?;
    Ok(Json(contacts))
}

#[instrument(skip(state, _user))]
pub async fn get_contact(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Contact>, ApiError> {
    let contact = repo::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Contact"))?;
    Ok(Json(contact))
}

#[instrument(skip(state, _user, payload))]
pub async fn update_contact(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<ContactPayload>,
) -> Result<Json<Contact>, ApiError> {
    let contact = repo::update(&state.db, id, &payload)
        .await?
        .ok_or_else(|| ApiError::not_found("Contact"))?;
    Ok(Json(contact))
}

#[instrument(skip(state, _user))]
pub async fn delete_contact(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Contact>, ApiError> {
    let contact = repo::delete(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Contact"))?;
    info!(contact_id = id, "contact deleted");
    Ok(Json(contact))
}

#[instrument(skip(state, _user))]
pub async fn search_contacts(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let contacts = repo::search(&state.db, &params.query).await?;
    Ok(Json(contacts))
}

#[instrument(skip(state, _user))]
pub async fn upcoming_birthdays(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let today = OffsetDateTime::now_utc().date();
    let contacts = repo::upcoming_birthdays(&state.db, today).await?;
    Ok(Json(contacts))
}
