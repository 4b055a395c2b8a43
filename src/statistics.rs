//! Trailing-window blink statistics.
//!
//! Blink timestamps are kept in arrival order, so eviction only ever pops from
//! the front and each event is touched once on the way in and once on the way
//! out.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use eye_metrics::{BlinkEvent, EyeState};
use serde::Serialize;

use crate::constants::BASE_STATISTICS_WINDOW_SECS;

/// Read-only view handed to consumers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub blinks_last_minute: usize,
    pub blinks_per_minute: f64,
    /// None until the first blink of the session
    pub seconds_since_last_blink: Option<f64>,
    pub current_ear: Option<f64>,
    pub eye_state: EyeState,
    pub total_blinks: u64,
    pub session_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct RollingStatistics {
    blinks: VecDeque<Instant>,
    retention: Duration,
    last_blink_at: Option<Instant>,
    total_blinks: u64,
}

impl RollingStatistics {
    pub fn new(retention: Duration) -> Self {
        Self {
            blinks: VecDeque::with_capacity(64),
            retention,
            last_blink_at: None,
            total_blinks: 0,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// When the window shrinks, surplus events go on the next `evict`.
    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    pub fn record(&mut self, event: &BlinkEvent) {
        self.blinks.push_back(event.reopened_at);
        self.last_blink_at = Some(event.reopened_at);
        self.total_blinks += 1;
    }

    /// Drops every blink older than the retention window.
    pub fn evict(&mut self, now: Instant) {
        while let Some(front) = self.blinks.front() {
            if now.saturating_duration_since(*front) > self.retention {
                self.blinks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Blinks whose age is at most `window`.
    pub fn count_within(&self, window: Duration, now: Instant) -> usize {
        self.blinks
            .iter()
            .rev()
            .take_while(|ts| now.saturating_duration_since(**ts) <= window)
            .count()
    }

    /// Blinks per minute over `window`: count × 60 / window_seconds.
    pub fn rate_over(&self, window: Duration, now: Instant) -> f64 {
        let secs = window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.count_within(window, now) as f64 * 60.0 / secs
    }

    pub fn since_last_blink(&self, now: Instant) -> Option<Duration> {
        self.last_blink_at
            .map(|at| now.saturating_duration_since(at))
    }

    pub fn total_blinks(&self) -> u64 {
        self.total_blinks
    }

    pub fn retained(&self) -> usize {
        self.blinks.len()
    }

    pub fn snapshot(
        &self,
        now: Instant,
        current_ear: Option<f64>,
        eye_state: EyeState,
        observed_for: Duration,
    ) -> StatisticsSnapshot {
        let minute = Duration::from_secs(BASE_STATISTICS_WINDOW_SECS);
        StatisticsSnapshot {
            blinks_last_minute: self.count_within(minute, now),
            blinks_per_minute: self.rate_over(minute, now),
            seconds_since_last_blink: self.since_last_blink(now).map(|d| d.as_secs_f64()),
            current_ear,
            eye_state,
            total_blinks: self.total_blinks,
            session_seconds: observed_for.as_secs_f64(),
        }
    }
}

impl Default for RollingStatistics {
    fn default() -> Self {
        Self::new(Duration::from_secs(BASE_STATISTICS_WINDOW_SECS))
    }
}
