use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

const MAX_SAMPLES: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: DateTime<Utc>,
    success: bool,
}

/// Summary of the outcomes still inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityStats {
    pub successes: usize,
    pub failures: usize,
}

impl ActivityStats {
    pub fn total(&self) -> usize {
        self.successes + self.failures
    }

    pub fn error_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.failures as f64 / self.total() as f64
    }
}

/// Recent assessment outcomes, used by heartbeats to derive rates.
#[derive(Debug, Clone)]
pub struct ActivityWindow {
    outcomes: VecDeque<Outcome>,
    window: Duration,
}

impl ActivityWindow {
    /// Windows beyond chrono's range saturate to the largest representable span.
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            outcomes: VecDeque::new(),
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>, success: bool) {
        self.outcomes.push_back(Outcome { at, success });

        if self.outcomes.len() > MAX_SAMPLES {
            self.outcomes.pop_front();
        }
    }

    pub fn window_secs(&self) -> f64 {
        self.window.num_milliseconds() as f64 / 1000.0
    }

    /// Drops outcomes older than the window, then summarizes the rest.
    pub fn stats(&mut self, now: DateTime<Utc>) -> ActivityStats {
        // No cutoff when the window reaches past the earliest representable time.
        if let Some(cutoff) = now.checked_sub_signed(self.window) {
            while self.outcomes.front().map_or(false, |o| o.at < cutoff) {
                self.outcomes.pop_front();
            }
        }

        let successes = self.outcomes.iter().filter(|o| o.success).count();
        ActivityStats {
            successes,
            failures: self.outcomes.len() - successes,
        }
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
    }
}
