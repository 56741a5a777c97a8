//! Split a raw price response into today's and tomorrow's prices.

use std::ops::RangeInclusive;

use chrono::{Days, NaiveDate};

use super::types::{DailyPrice, PriceRequest, PriceResponse, PriceSeries};
use crate::error::{Error, Result};

/// Date layout expected by the price source.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Hourly points in a complete day; 23 and 25 occur on DST transitions.
const FULL_DAY_POINTS: RangeInclusive<usize> = 23..=25;

/// Request covering today and tomorrow at hourly granularity.
pub fn today_tomorrow_request(today: NaiveDate) -> PriceRequest {
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    PriceRequest {
        start_date: today.format(DATE_FORMAT).to_string(),
        end_date: tomorrow.format(DATE_FORMAT).to_string(),
        group: "hour".to_string(),
        compare_to_last_year: 0,
    }
}

/// Map a response into today/tomorrow prices.
///
/// Today must be a complete day. Tomorrow is reported as unavailable, with no
/// points, until the source publishes a complete day.
pub fn to_today_tomorrow(response: &PriceResponse) -> Result<super::TodayTomorrowPrice> {
    let series = response
        .data
        .series
        .first()
        .ok_or_else(|| Error::Upstream {
            status: 200,
            message: "price response contains no series".to_string(),
        })?;

    if series.data.is_empty() {
        return Err(Error::Upstream {
            status: 200,
            message: "price response contains no price points".to_string(),
        });
    }

    let (today, tomorrow): (Vec<_>, Vec<_>) =
        series.data.iter().cloned().partition(|point| point.is_today);

    if !FULL_DAY_POINTS.contains(&today.len()) {
        return Err(Error::Upstream {
            status: 200,
            message: format!("expected a full day of prices for today, got {}", today.len()),
        });
    }

    let tomorrow_available = FULL_DAY_POINTS.contains(&tomorrow.len());

    Ok(super::TodayTomorrowPrice {
        today: DailyPrice {
            available: true,
            prices: PriceSeries {
                name: series.name.clone(),
                data: today,
            },
        },
        tomorrow: DailyPrice {
            available: tomorrow_available,
            prices: PriceSeries {
                name: series.name.clone(),
                data: if tomorrow_available { tomorrow } else { Vec::new() },
            },
        },
    })
}
