//! HTTP endpoint handlers.
//!
//! Handlers are thin: they decode the request, call into [`PriceService`] or
//! the [`SettingsStore`], and map library errors to JSON error responses.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::Error;
use crate::price::service::SERVICE_USER;
use crate::price::{PriceRequest, PriceResponse, PriceService, PriceSettings, TodayTomorrowPrice};
use crate::settings::SettingsStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub prices: Arc<PriceService>,
    pub settings: Arc<dyn SettingsStore>,
}

impl AppState {
    pub fn new(prices: Arc<PriceService>, settings: Arc<dyn SettingsStore>) -> Self {
        Self { prices, settings }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

/// Library error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "request_failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "request_rejected");
        }

        (
            status,
            Json(ErrorResponse {
                status: "error".to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn ping() -> &'static str {
    "pong"
}

/// Fallback for unknown routes.
pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    info!(method = %method, path = %uri.path(), "undefined_endpoint");
    ApiError(Error::NotFound(format!("no route for {method} {}", uri.path())))
}

// =============================================================================
// Market Price
// =============================================================================

/// Today's and tomorrow's hourly prices.
///
/// Tomorrow is reported with `available: false` and no prices until it has
/// been published upstream.
pub async fn today_tomorrow_price(
    State(state): State<AppState>,
) -> ApiResult<Json<TodayTomorrowPrice>> {
    let prices = state.prices.today_tomorrow().await?;
    Ok(Json(prices))
}

/// Optional user selection for price lookups.
#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub userid: Option<String>,
}

impl UserQuery {
    fn require(self) -> Result<String, Error> {
        self.userid
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Validation("missing userid parameter in URL".to_string()))
    }
}

/// Spot prices for an arbitrary range.
///
/// With `?userid=` the user's VAT and margin settings apply; otherwise the
/// service defaults do.
pub async fn market_price(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    payload: Result<Json<PriceRequest>, JsonRejection>,
) -> ApiResult<Json<PriceResponse>> {
    let Json(request) = payload?;

    let settings = match query.userid.as_deref() {
        Some(user_id) => state.settings.get_price_settings(user_id).await?,
        None => PriceSettings::defaults_for(SERVICE_USER),
    };

    info!(
        start_date = %request.start_date,
        end_date = %request.end_date,
        group = %request.group,
        user_id = %settings.user_id,
        "market_price_requested"
    );

    let response = state.prices.market_price(&request, &settings).await?;
    Ok(Json(response))
}

// =============================================================================
// Price Settings
// =============================================================================

pub async fn get_price_settings(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<PriceSettings>> {
    let user_id = query.require()?;
    let settings = state.settings.get_price_settings(&user_id).await?;
    Ok(Json(settings))
}

pub async fn create_price_settings(
    State(state): State<AppState>,
    payload: Result<Json<PriceSettings>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PriceSettings>)> {
    let Json(settings) = payload?;
    state.settings.insert_price_settings(settings.clone()).await?;
    Ok((StatusCode::CREATED, Json(settings)))
}

pub async fn patch_price_settings(
    State(state): State<AppState>,
    payload: Result<Json<PriceSettings>, JsonRejection>,
) -> ApiResult<Json<PriceSettings>> {
    let Json(settings) = payload?;
    state.settings.patch_price_settings(settings.clone()).await?;
    Ok(Json(settings))
}

/// Confirmation body for a deletion.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub user_id: String,
}

pub async fn delete_price_settings(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<DeletedResponse>> {
    let user_id = query.require()?;
    state.settings.delete_price_settings(&user_id).await?;
    Ok(Json(DeletedResponse { user_id }))
}
