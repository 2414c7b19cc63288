use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};

use crate::config::RateLimitConfig;
use crate::state::AppState;

mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;

pub use extractors::CurrentUser;

pub fn router(rate_limit: &RateLimitConfig) -> Router<AppState> {
    // Per-IP cap on the abuse-prone endpoints; one request replenishes
    // every 60/n seconds.
    let period_secs = (60 / rate_limit.auth_per_minute.max(1)) as u64;
    let governor = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(period_secs)
            .burst_size(rate_limit.auth_per_minute)
            .finish()
            .expect("valid governor config"),
    );

    let limited = Router::new()
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/login", post(handlers::login))
        .route("/auth/send_test_email", post(handlers::send_test_email))
        .layer(GovernorLayer { config: governor });

    Router::new()
        .merge(limited)
        .route("/auth/refresh_token", get(handlers::refresh_token))
        .route("/auth/confirmed_email/:token", get(handlers::confirmed_email))
        .route("/auth/request_email", post(handlers::request_email))
        .route("/auth/avatar", patch(handlers::update_avatar))
}
