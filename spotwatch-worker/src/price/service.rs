//! Price lookups with today/tomorrow caching.
//!
//! Today/tomorrow prices change at most once a day, when tomorrow's prices are
//! published in the afternoon. The cached copy is therefore kept until:
//! - the end of the day once tomorrow is known, or
//! - the publication cut-off while tomorrow is still unknown.
//!
//! After the cut-off an incomplete answer is not cached at all, so every
//! request goes to the source until tomorrow's prices appear.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use super::client::{validate_request, SpotPriceSource};
use super::mapping::{to_today_tomorrow, today_tomorrow_request};
use super::types::{PriceRequest, PriceResponse, PriceSettings, TodayTomorrowPrice};
use crate::cache::{Expiration, ExpiringCache};
use crate::clock::{today_at, Clock, TimeOfDay};
use crate::error::Result;

/// Cache key of the today/tomorrow answer.
pub const TODAY_TOMORROW_CACHE_KEY: &str = "today-tomorrow-exchange-price";

/// Identity used when the service queries prices on its own behalf.
pub const SERVICE_USER: &str = "spotwatch";

/// Daily cache cut-offs in market time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCutoffs {
    /// Expiry of an answer that still lacks tomorrow's prices.
    pub unavailable_until: TimeOfDay,
    /// Expiry of an answer that includes tomorrow's prices.
    pub available_until: TimeOfDay,
}

impl Default for CacheCutoffs {
    fn default() -> Self {
        Self {
            unavailable_until: TimeOfDay::new(14, 0),
            available_until: TimeOfDay::new(23, 59),
        }
    }
}

/// When a today/tomorrow answer fetched at `now` should expire, or `None`
/// when it should not be cached.
pub fn cache_deadline<Tz: TimeZone>(
    now: &DateTime<Tz>,
    tomorrow_available: bool,
    cutoffs: &CacheCutoffs,
) -> Option<DateTime<Tz>> {
    let deadline = if tomorrow_available {
        today_at(now, cutoffs.available_until)
    } else {
        today_at(now, cutoffs.unavailable_until)
    };

    (deadline > *now).then_some(deadline)
}

/// Price lookups shared by the web layer and the scheduler.
pub struct PriceService {
    source: Arc<dyn SpotPriceSource>,
    cache: Arc<ExpiringCache<TodayTomorrowPrice>>,
    clock: Arc<dyn Clock>,
    cutoffs: CacheCutoffs,
}

impl PriceService {
    pub fn new(
        source: Arc<dyn SpotPriceSource>,
        cache: Arc<ExpiringCache<TodayTomorrowPrice>>,
        clock: Arc<dyn Clock>,
        cutoffs: CacheCutoffs,
    ) -> Self {
        Self {
            source,
            cache,
            clock,
            cutoffs,
        }
    }

    /// Today/tomorrow prices, served from cache when possible.
    pub async fn today_tomorrow(&self) -> Result<TodayTomorrowPrice> {
        if let Some(cached) = self.cache.get(TODAY_TOMORROW_CACHE_KEY) {
            info!(source = "cache", "today_tomorrow_price_served");
            return Ok(cached);
        }

        let now = self.clock.now();
        let prices = self.fetch_today_tomorrow_fresh().await?;

        match cache_deadline(&now, prices.tomorrow.available, &self.cutoffs) {
            Some(deadline) => {
                self.cache.set(
                    TODAY_TOMORROW_CACHE_KEY,
                    prices.clone(),
                    Expiration::At(deadline.with_timezone(&Utc)),
                );
                info!(
                    tomorrow_available = prices.tomorrow.available,
                    expires_at = %deadline,
                    "today_tomorrow_price_cached"
                );
            }
            None => {
                warn!(now = %now, "today_tomorrow_price_not_cached");
            }
        }

        info!(source = "upstream", "today_tomorrow_price_served");
        Ok(prices)
    }

    /// Today/tomorrow prices straight from the source, bypassing the cache.
    pub async fn fetch_today_tomorrow_fresh(&self) -> Result<TodayTomorrowPrice> {
        let request = today_tomorrow_request(self.clock.now().date_naive());
        let response = self
            .source
            .fetch_spot_price(&request, &PriceSettings::defaults_for(SERVICE_USER))
            .await?;
        to_today_tomorrow(&response)
    }

    /// Arbitrary range lookup, passed through to the source.
    pub async fn market_price(
        &self,
        request: &PriceRequest,
        settings: &PriceSettings,
    ) -> Result<PriceResponse> {
        validate_request(request, settings)?;
        self.source.fetch_spot_price(request, settings).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::price::mapping::tests::response_with;
    use async_trait::async_trait;
    use crate::clock::MarketZone;
    use chrono::Timelike;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Source returning a canned response and counting calls.
    pub(crate) struct StubSource {
        pub tomorrow_points: usize,
        pub calls: AtomicUsize,
        pub last_request: Mutex<Option<PriceRequest>>,
    }

    impl StubSource {
        pub(crate) fn new(tomorrow_available: bool) -> Self {
            Self {
                tomorrow_points: if tomorrow_available { 24 } else { 0 },
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SpotPriceSource for StubSource {
        async fn fetch_spot_price(
            &self,
            request: &PriceRequest,
            _settings: &PriceSettings,
        ) -> Result<PriceResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            Ok(response_with(24, self.tomorrow_points))
        }
    }

    fn local(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<MarketZone> {
        FixedClock::at(year, month, day, hour, minute).0
    }

    fn service(source: Arc<StubSource>, now: DateTime<MarketZone>) -> (PriceService, Arc<ExpiringCache<TodayTomorrowPrice>>) {
        let cache = Arc::new(ExpiringCache::new());
        let service = PriceService::new(
            source,
            Arc::clone(&cache),
            Arc::new(FixedClock(now)),
            CacheCutoffs::default(),
        );
        (service, cache)
    }

    #[test]
    fn test_cache_deadline_rules() {
        let cutoffs = CacheCutoffs::default();

        let afternoon = local(2099, 3, 10, 15, 0);
        let deadline = cache_deadline(&afternoon, true, &cutoffs).unwrap();
        assert_eq!((deadline.hour(), deadline.minute()), (23, 59));

        let morning = local(2099, 3, 10, 13, 0);
        let deadline = cache_deadline(&morning, false, &cutoffs).unwrap();
        assert_eq!((deadline.hour(), deadline.minute()), (14, 0));
        assert_eq!(deadline.date_naive(), morning.date_naive());

        assert!(cache_deadline(&afternoon, false, &cutoffs).is_none());
    }

    #[tokio::test]
    async fn test_available_tomorrow_cached_until_end_of_day() {
        let now = local(2099, 3, 10, 15, 0);
        let (service, cache) = service(Arc::new(StubSource::new(true)), now);

        let prices = service.today_tomorrow().await.unwrap();
        assert!(prices.tomorrow.available);

        let expected = local(2099, 3, 10, 23, 59).with_timezone(&Utc);
        assert_eq!(cache.expires_at(TODAY_TOMORROW_CACHE_KEY), Some(expected));
    }

    #[tokio::test]
    async fn test_unavailable_before_cutoff_cached_until_cutoff() {
        let now = local(2099, 3, 10, 13, 0);
        let (service, cache) = service(Arc::new(StubSource::new(false)), now);

        service.today_tomorrow().await.unwrap();

        let expected = local(2099, 3, 10, 14, 0).with_timezone(&Utc);
        assert_eq!(cache.expires_at(TODAY_TOMORROW_CACHE_KEY), Some(expected));
    }

    #[tokio::test]
    async fn test_unavailable_after_cutoff_not_cached() {
        let now = local(2099, 3, 10, 15, 0);
        let (service, cache) = service(Arc::new(StubSource::new(false)), now);

        let prices = service.today_tomorrow().await.unwrap();
        assert!(!prices.tomorrow.available);
        assert!(cache.expires_at(TODAY_TOMORROW_CACHE_KEY).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cached_answer_skips_source() {
        let source = Arc::new(StubSource::new(true));
        let (service, _cache) = service(Arc::clone(&source), local(2099, 3, 10, 15, 0));

        service.today_tomorrow().await.unwrap();
        service.today_tomorrow().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        service.fetch_today_tomorrow_fresh().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_market_price_rejects_invalid_request_before_source() {
        let source = Arc::new(StubSource::new(true));
        let (service, _cache) = service(Arc::clone(&source), local(2099, 3, 10, 15, 0));
        let request = PriceRequest {
            start_date: "2099-03-11".to_string(),
            end_date: "2099-03-10".to_string(),
            group: "hour".to_string(),
            compare_to_last_year: 0,
        };

        let result = service
            .market_price(&request, &PriceSettings::defaults_for("u1"))
            .await;

        assert!(matches!(result, Err(crate::error::Error::Validation(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_end_of_day_expiry_is_market_time() {
        let (service, cache) = service(Arc::new(StubSource::new(true)), local(2099, 1, 10, 15, 0));

        service.today_tomorrow().await.unwrap();

        // 23:59 in Helsinki winter time.
        let expected = Utc.with_ymd_and_hms(2099, 1, 10, 21, 59, 0).unwrap();
        assert_eq!(cache.expires_at(TODAY_TOMORROW_CACHE_KEY), Some(expected));
    }

    #[tokio::test]
    async fn test_request_dates_follow_market_day() {
        let source = Arc::new(StubSource::new(true));
        // 00:30 in Helsinki, still the previous day in UTC.
        let (service, _cache) = service(Arc::clone(&source), local(2099, 1, 10, 0, 30));

        service.fetch_today_tomorrow_fresh().await.unwrap();

        let request = source.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.start_date, "2099-01-10");
        assert_eq!(request.end_date, "2099-01-11");
    }
}
