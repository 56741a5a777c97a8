//! The daily "tomorrow's prices are out" polling job.
//!
//! Inside the polling window the job asks the price source on every tick
//! whether tomorrow is available. The first positive answer publishes one
//! notification and parks the job until the next day's window opens.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument};

use super::notifier::{AvailabilityCheck, Notifier};
use super::window::{PollingState, PollingWindow};
use crate::clock::Clock;
use crate::error::Error;
use crate::queue::report;

pub const PRICE_POLL_WORKER: &str = "scheduler:price_poll";

/// What a single tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome<Tz: TimeZone> {
    /// Outside the window; sleep until `next_start`.
    OutsideWindow { next_start: DateTime<Tz> },
    /// Today's notification already went out.
    AlreadyNotified { next_start: DateTime<Tz> },
    /// Tomorrow is not published yet; try again next tick.
    NotYetAvailable,
    /// The availability check failed; try again next tick.
    CheckFailed,
    /// Notification sent; sleep until `next_start`.
    Published { next_start: DateTime<Tz> },
    /// Publishing failed; try again next tick.
    PublishFailed,
}

impl<Tz: TimeZone> TickOutcome<Tz> {
    /// Instant to sleep until before ticking again, if any.
    fn pause_until(self) -> Option<DateTime<Tz>> {
        match self {
            TickOutcome::OutsideWindow { next_start }
            | TickOutcome::AlreadyNotified { next_start }
            | TickOutcome::Published { next_start } => Some(next_start),
            TickOutcome::NotYetAvailable
            | TickOutcome::CheckFailed
            | TickOutcome::PublishFailed => None,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    window: PollingWindow,
    tick_interval: Duration,
    check: Arc<dyn AvailabilityCheck>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    errors: mpsc::Sender<Error>,
    stop: CancellationToken,
}

impl Scheduler {
    /// `stop` is the process-wide token; the scheduler derives its own child
    /// so [`Scheduler::stop_jobs`] only affects scheduler jobs.
    pub fn new(
        window: PollingWindow,
        tick_interval: Duration,
        check: Arc<dyn AvailabilityCheck>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        errors: mpsc::Sender<Error>,
        stop: &CancellationToken,
    ) -> Self {
        Self {
            window,
            tick_interval,
            check,
            notifier,
            clock,
            errors,
            stop: stop.child_token(),
        }
    }

    /// Spawn every scheduled job on `tracker`.
    pub fn start_jobs(&self, tracker: &TaskTracker) {
        info!(
            window_start = self.window.start_hour(),
            window_end = self.window.end_hour(),
            tick_secs = self.tick_interval.as_secs(),
            "scheduler_starting"
        );
        tracker.spawn(
            self.clone()
                .poll_price(PRICE_POLL_WORKER.to_string())
                .instrument(info_span!("worker", worker = PRICE_POLL_WORKER)),
        );
    }

    /// Signal every scheduled job to stop. Jobs exit at their next await.
    pub fn stop_jobs(&self) {
        info!("scheduler_stopping");
        self.stop.cancel();
    }

    /// Run the polling loop until stopped.
    pub async fn poll_price(self, worker: String) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = PollingState::default();

        info!(worker = %worker, "polling_job_started");

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = self.clock.now();
            let Some(next_start) = self.tick(&mut state, &worker, now).await.pause_until() else {
                continue;
            };

            let wait = (next_start - now).to_std().unwrap_or_default();
            info!(
                worker = %worker,
                next_start = %next_start,
                wait_secs = wait.as_secs(),
                "polling_job_paused"
            );

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            ticker.reset();
        }

        info!(worker = %worker, "polling_job_stopped");
    }

    /// Evaluate one tick at `now`.
    pub async fn tick<Tz: TimeZone>(
        &self,
        state: &mut PollingState,
        worker: &str,
        now: DateTime<Tz>,
    ) -> TickOutcome<Tz> {
        if !self.window.contains(&now) {
            return TickOutcome::OutsideWindow {
                next_start: self.window.next_start(&now, false),
            };
        }

        let today = now.date_naive();
        if state.job_done_today(today) {
            return TickOutcome::AlreadyNotified {
                next_start: self.window.next_start(&now, true),
            };
        }

        match self.check.tomorrow_available().await {
            Ok(true) => {}
            Ok(false) => {
                info!(worker = %worker, "tomorrow_price_not_available");
                return TickOutcome::NotYetAvailable;
            }
            Err(e) => {
                warn!(worker = %worker, error = %e, "tomorrow_price_check_failed");
                return TickOutcome::CheckFailed;
            }
        }

        match self.notifier.notify_price_ready(worker).await {
            Ok(()) => {
                state.mark_done(today);
                let next_start = self.window.next_start(&now, true);
                info!(worker = %worker, next_start = ?next_start, "tomorrow_price_announced");
                TickOutcome::Published { next_start }
            }
            Err(e) => {
                error!(worker = %worker, error = %e, "tomorrow_price_announce_failed");
                report(&self.errors, worker, e);
                TickOutcome::PublishFailed
            }
        }
    }
}
