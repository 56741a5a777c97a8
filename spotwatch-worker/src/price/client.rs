//! HTTP client for the third-party spot price source.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use tracing::{error, info};
use url::Url;

use super::mapping::DATE_FORMAT;
use super::types::{PriceRequest, PriceResponse, PriceSettings};
use crate::error::{Error, Result};

const SPOT_PRICE_PATH: &str = "spot-price/v1/get";
const SUPPORTED_GROUPS: [&str; 5] = ["hour", "day", "week", "month", "year"];

/// Capability to fetch spot prices.
#[async_trait]
pub trait SpotPriceSource: Send + Sync {
    /// Fetch prices for `request`, applying the margin and VAT preference of
    /// `settings`.
    async fn fetch_spot_price(
        &self,
        request: &PriceRequest,
        settings: &PriceSettings,
    ) -> Result<PriceResponse>;
}

/// reqwest-backed [`SpotPriceSource`].
#[derive(Debug, Clone)]
pub struct SpotPriceClient {
    client: Client,
    base_url: String,
}

impl SpotPriceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl SpotPriceSource for SpotPriceClient {
    async fn fetch_spot_price(
        &self,
        request: &PriceRequest,
        settings: &PriceSettings,
    ) -> Result<PriceResponse> {
        let url = build_url(&self.base_url, request, settings)?;

        info!(
            start_date = %request.start_date,
            end_date = %request.end_date,
            group = %request.group,
            "spot_price_fetch_starting"
        );

        let response = self.client.get(url).send().await.map_err(|e| {
            error!(error = %e, is_timeout = e.is_timeout(), "spot_price_fetch_failed");
            Error::Http(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(status_code = status.as_u16(), "spot_price_fetch_bad_status");
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<PriceResponse>().await?;

        info!(
            status = %body.status,
            series = body.data.series.len(),
            "spot_price_fetch_complete"
        );

        Ok(body)
    }
}

/// Reject requests the source would answer with garbage.
pub fn validate_request(request: &PriceRequest, settings: &PriceSettings) -> Result<()> {
    let start = parse_date("start date", &request.start_date)?;
    let end = parse_date("end date", &request.end_date)?;
    if start > end {
        return Err(Error::Validation("start date cannot be after end date".to_string()));
    }

    if !SUPPORTED_GROUPS.contains(&request.group.as_str()) {
        return Err(Error::Validation(
            "group should have valid value: 'hour', 'day', 'week', 'month', 'year'".to_string(),
        ));
    }

    if !settings.marginal.is_finite() {
        return Err(Error::Validation("margin should be a finite number".to_string()));
    }

    if !(0..=1).contains(&request.compare_to_last_year) {
        return Err(Error::Validation(
            "compare_to_last_year needs to be 0 or 1".to_string(),
        ));
    }

    Ok(())
}

/// Validate `request` and build the source URL.
pub fn build_url(base_url: &str, request: &PriceRequest, settings: &PriceSettings) -> Result<Url> {
    validate_request(request, settings)?;

    let base = format!("{}/{}", base_url.trim_end_matches('/'), SPOT_PRICE_PATH);
    let mut url = Url::parse(&base)
        .map_err(|e| Error::Invariant(format!("invalid price source url '{base}': {e}")))?;

    url.query_pairs_mut()
        .append_pair("starttime", &request.start_date)
        .append_pair("endtime", &request.end_date)
        .append_pair("margin", &format!("{:.6}", settings.marginal))
        .append_pair("group", &request.group)
        .append_pair("include_vat", if settings.vat_included { "1" } else { "0" })
        .append_pair(
            "compare_to_last_year",
            &request.compare_to_last_year.to_string(),
        );

    Ok(url)
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
        Error::Validation(format!("{field} should be in format 'YYYY-MM-DD', got '{value}'"))
    })
}
