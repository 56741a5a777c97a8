//! Wire types for the spot price source and the service's own responses.

use serde::{Deserialize, Serialize};

/// Query parameters accepted by the spot price source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRequest {
    /// First day of the range, `YYYY-MM-DD`
    #[serde(rename = "starttime")]
    pub start_date: String,
    /// Last day of the range, `YYYY-MM-DD`
    #[serde(rename = "endtime")]
    pub end_date: String,
    /// One of `hour`, `day`, `week`, `month`, `year`
    pub group: String,
    /// `0` or `1`
    #[serde(default)]
    pub compare_to_last_year: i32,
}

/// A single price point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_utc: Option<String>,
    #[serde(default, rename = "orig_time", skip_serializing_if = "Option::is_none")]
    pub original_time: Option<String>,
    pub time: String,
    pub price: f64,
    #[serde(default)]
    pub vat_factor: f64,
    #[serde(rename = "isToday")]
    pub is_today: bool,
    /// Legacy string flag, "0" or "1"
    #[serde(default, rename = "includeVat", skip_serializing_if = "Option::is_none")]
    pub include_vat: Option<String>,
}

/// Price points sharing one unit, e.g. `c/kWh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub name: String,
    pub data: Vec<PricePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub group: String,
    pub series: Vec<PriceSeries>,
}

/// Response body of the spot price source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceResponse {
    pub status: String,
    pub data: PriceData,
}

/// Prices for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPrice {
    pub available: bool,
    pub prices: PriceSeries,
}

/// Today's prices plus tomorrow's once they are published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodayTomorrowPrice {
    pub today: DailyPrice,
    pub tomorrow: DailyPrice,
}

/// Per-user pricing preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSettings {
    pub user_id: String,
    #[serde(default)]
    pub vat_included: bool,
    #[serde(default, rename = "margin")]
    pub marginal: f64,
}

impl PriceSettings {
    /// Settings used when no user-specific settings apply.
    pub fn defaults_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            vat_included: false,
            marginal: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_response_deserialization() {
        let raw = r#"{
            "status": "success",
            "data": {
                "group": "hour",
                "series": [{
                    "name": "c/kWh",
                    "data": [{
                        "time_utc": "2024-12-08 22:00:00",
                        "orig_time": "2024-12-09 00:00:00",
                        "time": "2024-12-09 00:00:00",
                        "price": 2.47,
                        "vat_factor": 1.255,
                        "isToday": false,
                        "includeVat": "1"
                    }]
                }]
            }
        }"#;

        let parsed: PriceResponse = serde_json::from_str(raw).unwrap();
        let point = &parsed.data.series[0].data[0];
        assert_eq!(parsed.data.group, "hour");
        assert_eq!(point.price, 2.47);
        assert!(!point.is_today);
        assert_eq!(point.include_vat.as_deref(), Some("1"));
    }

    #[test]
    fn test_price_settings_wire_names() {
        let settings: PriceSettings =
            serde_json::from_str(r#"{"user_id":"u1","vat_included":true,"margin":0.59}"#).unwrap();
        assert_eq!(settings.user_id, "u1");
        assert!(settings.vat_included);
        assert_eq!(settings.marginal, 0.59);

        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"margin\":0.59"));
    }
}
