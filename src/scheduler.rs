//! Poll timer
//!
//! A single repeating timer that exists only while the link is up. Stopping
//! drops the [`Interval`], so no tick can be delivered afterwards.
//!
//! Polls run inline in the engine task, so the next tick cannot be observed
//! while a poll is outstanding; [`MissedTickBehavior::Skip`] then drops the
//! ticks that elapsed during a slow poll instead of bursting them.

use std::future::pending;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug)]
pub struct PollingScheduler {
    period: Duration,
    interval: Option<Interval>,
}

impl PollingScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Arm the timer. The first tick fires one period from now.
    /// Restarting a running scheduler resets its phase.
    pub fn start(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        debug!("Polling started every {:?}", self.period);
    }

    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            debug!("Polling stopped");
        }
    }

    /// Change the period, restarting the timer if it is running
    pub fn set_period(&mut self, period: Duration) {
        if period == self.period {
            return;
        }
        self.period = period;
        if self.is_running() {
            self.start();
        }
    }

    /// Wait for the next tick. Never resolves while stopped.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => pending().await,
        }
    }
}
