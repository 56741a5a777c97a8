//! HTTP surface of the service.
//!
//! A small axum router exposing:
//! - health and ping probes
//! - today/tomorrow prices (cached) and arbitrary range lookups
//! - CRUD on per-user price settings
//!
//! Errors are returned as JSON with a status derived from the error kind.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    create_price_settings, delete_price_settings, get_price_settings, health, market_price,
    not_found, patch_price_settings, ping, today_tomorrow_price, ApiError, AppState,
    DeletedResponse, ErrorResponse, HealthResponse, UserQuery,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/ping", get(ping))
        .route("/v1/market-price", post(market_price))
        .route("/v1/market-price/today-tomorrow", get(today_tomorrow_price))
        .route(
            "/v1/price-settings",
            get(get_price_settings)
                .post(create_price_settings)
                .patch(patch_price_settings)
                .delete(delete_price_settings),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
