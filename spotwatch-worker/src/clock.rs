//! Wall-clock access and market-time helpers.
//!
//! All time-of-day decisions (polling window, cache cut-offs, which calendar
//! day is "today") are made in the price market's zone, not the zone of the
//! host. Components take a [`Clock`] so tests can pin "now" to a fixed
//! instant.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
pub use chrono_tz::Tz as MarketZone;

/// Zone of the Nord Pool Finland area the spot prices are quoted in.
pub const DEFAULT_MARKET_ZONE: MarketZone = chrono_tz::Europe::Helsinki;

/// Source of the current market time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<MarketZone>;
}

/// Clock backed by the operating system, reported in a fixed market zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    zone: MarketZone,
}

impl SystemClock {
    pub fn new(zone: MarketZone) -> Self {
        Self { zone }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_MARKET_ZONE)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<MarketZone> {
        Utc::now().with_timezone(&self.zone)
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<MarketZone>);

#[cfg(test)]
impl FixedClock {
    /// Wall-clock time in the default market zone.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Self {
        let now = DEFAULT_MARKET_ZONE
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .earliest()
            .unwrap_or_else(|| panic!("{year}-{month}-{day} {hour}:{minute} does not exist"));
        Self(now)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<MarketZone> {
        self.0
    }
}

/// Time of day expressed as hour and minute, parsed from "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (hour, minute) = raw.trim().split_once(':')?;
        let hour = hour.parse().ok()?;
        let minute = minute.parse().ok()?;
        NaiveTime::from_hms_opt(hour, minute, 0)?;
        Some(Self { hour, minute })
    }

    fn as_naive(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }
}

/// The given time of day on `date` in `tz`.
///
/// Ambiguous local times resolve to the earlier instant; times that fall in a
/// DST gap are shifted forward by one hour.
pub fn at_time_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: TimeOfDay) -> DateTime<Tz> {
    let naive_time = time.as_naive().unwrap_or_default();
    let naive = date.and_time(naive_time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// The given time of day on the same calendar day as `now`.
pub fn today_at<Tz: TimeZone>(now: &DateTime<Tz>, time: TimeOfDay) -> DateTime<Tz> {
    at_time_of_day(&now.timezone(), now.date_naive(), time)
}

/// The given time of day on the calendar day after `now`.
pub fn tomorrow_at<Tz: TimeZone>(now: &DateTime<Tz>, time: TimeOfDay) -> DateTime<Tz> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(NaiveDate::MAX);
    at_time_of_day(&now.timezone(), tomorrow, time)
}
