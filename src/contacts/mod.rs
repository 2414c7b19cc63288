use axum::{routing::get, Router};
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};

use crate::config::RateLimitConfig;
use crate::state::AppState;

mod dto;
pub mod handlers;
pub mod repo;

pub fn router(rate_limit: &RateLimitConfig) -> Router<AppState> {
    let period_secs = (60 / rate_limit.contacts_per_minute.max(1)) as u64;
    let governor = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(period_secs)
            .burst_size(rate_limit.contacts_per_minute)
            .finish()
            .expect("valid governor config"),
    );

    Router::new()
        .route(
            "/contacts",
            get(handlers::list_contacts).post(handlers::create_contact),
        )
        .route("/contacts/search", get(handlers::search_contacts))
        .route(
            "/contacts/upcoming_birthdays",
            get(handlers::upcoming_birthdays),
        )
        .route(
            "/contacts/:id",
            get(handlers::get_contact)
                .put(handlers::update_contact)
                .delete(handlers::delete_contact),
        )
        .layer(GovernorLayer { config: governor })
}
