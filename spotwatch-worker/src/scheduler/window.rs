//! Daily polling window and per-day polling state.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike};

use crate::clock::{today_at, tomorrow_at, TimeOfDay};
use crate::error::{Error, Result};

/// Market-time interval `[start_hour, end_hour)` in which polling is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingWindow {
    start_hour: u32,
    end_hour: u32,
}

impl PollingWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(Error::Validation(format!(
                "polling window must satisfy start < end <= 24, got [{start_hour}, {end_hour})"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn contains<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        (self.start_hour..self.end_hour).contains(&now.hour())
    }

    /// Start of the next window to wait for.
    ///
    /// Today's window if it has not begun yet; tomorrow's if today's has
    /// ended or today's job is already done.
    pub fn next_start<Tz: TimeZone>(&self, now: &DateTime<Tz>, job_done: bool) -> DateTime<Tz> {
        let start = TimeOfDay::new(self.start_hour, 0);
        if job_done || now.hour() >= self.start_hour {
            tomorrow_at(now, start)
        } else {
            today_at(now, start)
        }
    }
}

impl Default for PollingWindow {
    fn default() -> Self {
        Self {
            start_hour: 14,
            end_hour: 22,
        }
    }
}

/// Polling state owned by one scheduler worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollingState {
    done_on: Option<NaiveDate>,
}

impl PollingState {
    /// Whether the notification for `today` was already sent.
    ///
    /// Resets implicitly when the calendar day changes.
    pub fn job_done_today(&self, today: NaiveDate) -> bool {
        self.done_on == Some(today)
    }

    pub fn mark_done(&mut self, today: NaiveDate) {
        self.done_on = Some(today);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 12, day, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_window_bounds() {
        let window = PollingWindow::new(14, 22).unwrap();
        assert!(!window.contains(&at(10, 13, 59)));
        assert!(window.contains(&at(10, 14, 0)));
        assert!(window.contains(&at(10, 21, 59)));
        assert!(!window.contains(&at(10, 22, 0)));
    }

    #[test]
    fn test_invalid_windows_rejected() {
        assert!(PollingWindow::new(22, 14).is_err());
        assert!(PollingWindow::new(14, 14).is_err());
        assert!(PollingWindow::new(0, 25).is_err());
        assert!(PollingWindow::new(0, 24).is_ok());
    }

    #[test]
    fn test_next_start_before_window_is_today() {
        let window = PollingWindow::new(14, 22).unwrap();
        assert_eq!(window.next_start(&at(10, 13, 59), false), at(10, 14, 0));
    }

    #[test]
    fn test_next_start_after_window_is_tomorrow() {
        let window = PollingWindow::new(14, 22).unwrap();
        assert_eq!(window.next_start(&at(10, 22, 1), false), at(11, 14, 0));
        assert_eq!(window.next_start(&at(10, 23, 30), false), at(11, 14, 0));
    }

    #[test]
    fn test_next_start_after_done_is_tomorrow() {
        let window = PollingWindow::new(14, 22).unwrap();
        assert_eq!(window.next_start(&at(10, 16, 0), true), at(11, 14, 0));
    }

    #[test]
    fn test_next_start_crosses_month_end() {
        let window = PollingWindow::new(14, 22).unwrap();
        let now = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 12, 31, 22, 30, 0)
            .unwrap();
        let next = window.next_start(&now, false);
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(next.hour(), 14);
    }

    #[test]
    fn test_polling_state_resets_on_new_day() {
        let mut state = PollingState::default();
        let today = NaiveDate::from_ymd_opt(2024, 12, 10).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2024, 12, 11).unwrap();

        assert!(!state.job_done_today(today));
        state.mark_done(today);
        assert!(state.job_done_today(today));
        assert!(!state.job_done_today(tomorrow));
    }
}
