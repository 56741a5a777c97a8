//! Electricity spot prices: source client, mapping and cached lookups.

pub mod client;
pub mod mapping;
pub mod service;
pub mod types;

pub use client::{SpotPriceClient, SpotPriceSource};
pub use service::{CacheCutoffs, PriceService, TODAY_TOMORROW_CACHE_KEY};
pub use types::{
    DailyPrice, PriceData, PricePoint, PriceRequest, PriceResponse, PriceSeries, PriceSettings,
    TodayTomorrowPrice,
};
