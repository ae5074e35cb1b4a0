use std::time::Duration;

use tokio::time::Instant;

/// Tracks how long the pipeline has gone without storing anything.
///
/// The clock restarts on every effective flush. Messages that keep arriving
/// but never match a row do not count as progress; once the quiet period is
/// exceeded the pipeline forces a flush and gives up if that stores nothing
/// either.
pub struct QuietPeriodWatchdog {
    max_quiet_period: Duration,
    last_progress: Instant,
}

impl QuietPeriodWatchdog {
    pub fn new(max_quiet_period: Duration) -> Self {
        Self {
            max_quiet_period,
            last_progress: Instant::now(),
        }
    }

    pub fn mark_progress(&mut self) {
        self.last_progress = Instant::now();
    }

    pub fn quiet_for(&self) -> Duration {
        self.last_progress.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.quiet_for() > self.max_quiet_period
    }
}
