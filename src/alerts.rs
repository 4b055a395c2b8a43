//! Alert rule evaluation with a single outstanding alert and cooldown.
//!
//! State flow: Idle -> Active (rule fires or manual trigger) -> Cooldown
//! (manual clear) -> Idle (once the cooldown deadline passes). Triggers that
//! arrive while Active or in Cooldown are dropped, not queued.
//!
//! When several rules hold on the same tick the first one in configuration
//! order wins: LowRate, EyesOpenTooLong, SustainedLowRate.

use std::time::{Duration, Instant};

use chrono::NaiveTime;
use serde::Serialize;

use crate::config::{MonitorConfig, QuietHours};
use crate::statistics::RollingStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowRate,
    EyesOpenTooLong,
    SustainedLowRate,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertRule {
    /// Blinks per minute over `window` below the threshold.
    LowRate {
        threshold_per_minute: f64,
        window: Duration,
    },
    /// No blink for longer than `limit` (counted from session start before
    /// the first blink).
    EyesOpenTooLong { limit: Duration },
    /// The LowRate condition held without interruption for `duration`.
    SustainedLowRate {
        threshold_per_minute: f64,
        window: Duration,
        duration: Duration,
    },
}

impl AlertRule {
    pub fn kind(&self) -> AlertKind {
        match self {
            Self::LowRate { .. } => AlertKind::LowRate,
            Self::EyesOpenTooLong { .. } => AlertKind::EyesOpenTooLong,
            Self::SustainedLowRate { .. } => AlertKind::SustainedLowRate,
        }
    }

    /// Statistics window the rule reads from, if any.
    pub fn window(&self) -> Option<Duration> {
        match self {
            Self::LowRate { window, .. } | Self::SustainedLowRate { window, .. } => Some(*window),
            Self::EyesOpenTooLong { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Idle,
    Active { kind: AlertKind, triggered_at: Instant },
    Cooldown { until: Instant },
}

/// Everything a rule may look at on one tick.
#[derive(Debug, Clone, Copy)]
pub struct RuleInputs<'a> {
    pub now: Instant,
    pub statistics: &'a RollingStatistics,
    /// How long this session has been observed.
    pub observed_for: Duration,
    /// Confirmed closure length; `None` while the eyes are open.
    pub closed_for: Option<Duration>,
    pub local_time: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct AlertRuleEngine {
    rules: Vec<AlertRule>,
    cooldown: Duration,
    quiet_hours: QuietHours,
    state: AlertState,
    low_rate_since: Option<Instant>,
    pause: Option<Pause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pause {
    Until(Instant),
    Indefinite,
}

impl AlertRuleEngine {
    pub fn new(rules: Vec<AlertRule>, cooldown: Duration, quiet_hours: QuietHours) -> Self {
        Self {
            rules,
            cooldown,
            quiet_hours,
            state: AlertState::Idle,
            low_rate_since: None,
            pause: None,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.alert_rules(),
            config.alert_cooldown(),
            config.quiet_hours,
        )
    }

    /// Swaps rule parameters; alert state and the sustained-rate clock carry over.
    pub fn reconfigure(&mut self, config: &MonitorConfig) {
        self.rules = config.alert_rules();
        self.cooldown = config.alert_cooldown();
        self.quiet_hours = config.quiet_hours;
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn is_paused(&self, now: Instant) -> bool {
        match self.pause {
            Some(Pause::Until(until)) => now < until,
            Some(Pause::Indefinite) => true,
            None => false,
        }
    }

    /// Pauses rule triggers for `duration` from `now`. A deadline past what
    /// `Instant` can represent pauses until `resume`.
    pub fn pause_for(&mut self, now: Instant, duration: Duration) {
        self.pause = Some(match now.checked_add(duration) {
            Some(until) => Pause::Until(until),
            None => Pause::Indefinite,
        });
    }

    pub fn resume(&mut self) {
        self.pause = None;
    }

    /// Runs one evaluation tick. Returns the kind of a newly raised alert.
    pub fn evaluate(&mut self, inputs: &RuleInputs<'_>) -> Option<AlertKind> {
        self.track_sustained_low_rate(inputs);

        if let AlertState::Cooldown { until } = self.state {
            if inputs.now >= until {
                tracing::debug!("Alert cooldown elapsed");
                self.state = AlertState::Idle;
            }
        }
        if self.state != AlertState::Idle {
            return None;
        }
        if self.is_paused(inputs.now) || self.quiet_hours.contains(inputs.local_time) {
            return None;
        }

        let kind = self
            .rules
            .iter()
            .find(|rule| self.holds(rule, inputs))
            .map(AlertRule::kind)?;

        self.state = AlertState::Active {
            kind,
            triggered_at: inputs.now,
        };
        tracing::info!(?kind, "Alert triggered");
        Some(kind)
    }

    /// Forces an alert regardless of rule state. Does nothing while an alert
    /// is already active.
    pub fn trigger(&mut self, now: Instant) -> Option<AlertKind> {
        if matches!(self.state, AlertState::Active { .. }) {
            return None;
        }
        self.state = AlertState::Active {
            kind: AlertKind::Manual,
            triggered_at: now,
        };
        tracing::info!("Manual alert triggered");
        Some(AlertKind::Manual)
    }

    /// Active -> Cooldown(now + cooldown). Returns false when nothing was active.
    pub fn clear(&mut self, now: Instant) -> bool {
        if !matches!(self.state, AlertState::Active { .. }) {
            return false;
        }
        self.state = AlertState::Cooldown {
            until: now + self.cooldown,
        };
        tracing::info!(cooldown_secs = self.cooldown.as_secs(), "Alert cleared");
        true
    }

    fn holds(&self, rule: &AlertRule, inputs: &RuleInputs<'_>) -> bool {
        match *rule {
            AlertRule::LowRate {
                threshold_per_minute,
                window,
            } => low_rate_holds(threshold_per_minute, window, inputs),
            AlertRule::EyesOpenTooLong { limit } => {
                if inputs.closed_for.is_some() {
                    return false;
                }
                let open_for = inputs
                    .statistics
                    .since_last_blink(inputs.now)
                    .unwrap_or(inputs.observed_for);
                open_for > limit
            }
            AlertRule::SustainedLowRate { duration, .. } => self
                .low_rate_since
                .map(|since| inputs.now.saturating_duration_since(since) >= duration)
                .unwrap_or(false),
        }
    }

    fn track_sustained_low_rate(&mut self, inputs: &RuleInputs<'_>) {
        let sustained = self.rules.iter().find_map(|rule| match *rule {
            AlertRule::SustainedLowRate {
                threshold_per_minute,
                window,
                ..
            } => Some((threshold_per_minute, window)),
            _ => None,
        });

        self.low_rate_since = match sustained {
            Some((threshold, window)) if low_rate_holds(threshold, window, inputs) => {
                Some(self.low_rate_since.unwrap_or(inputs.now))
            }
            _ => None,
        };
    }
}

/// Rates are only judged once the session has covered the whole window.
fn low_rate_holds(threshold_per_minute: f64, window: Duration, inputs: &RuleInputs<'_>) -> bool {
    inputs.observed_for >= window
        && inputs.statistics.rate_over(window, inputs.now) < threshold_per_minute
}

#[cfg(test)]
mod tests {
    use eye_metrics::BlinkEvent;

    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn inputs(now: Instant, stats: &RollingStatistics, observed_for: Duration) -> RuleInputs<'_> {
        RuleInputs {
            now,
            statistics: stats,
            observed_for,
            closed_for: None,
            local_time: noon(),
        }
    }

    fn low_rate_only(cooldown: Duration) -> AlertRuleEngine {
        AlertRuleEngine::new(
            vec![AlertRule::LowRate {
                threshold_per_minute: 15.0,
                window: secs(60),
            }],
            cooldown,
            QuietHours::default(),
        )
    }

    #[test]
    fn low_rate_waits_for_full_window() {
        let t0 = Instant::now();
        let stats = RollingStatistics::default();
        let mut engine = low_rate_only(secs(30));

        assert_eq!(engine.evaluate(&inputs(t0 + secs(59), &stats, secs(59))), None);
        assert_eq!(
            engine.evaluate(&inputs(t0 + secs(60), &stats, secs(60))),
            Some(AlertKind::LowRate)
        );
    }

    #[test]
    fn cooldown_blocks_retrigger_until_deadline() {
        let t0 = Instant::now();
        let stats = RollingStatistics::default();
        let mut engine = low_rate_only(secs(30));

        let start = t0 + secs(60);
        assert_eq!(engine.evaluate(&inputs(start, &stats, secs(60))), Some(AlertKind::LowRate));
        assert!(engine.clear(start));
        assert_eq!(engine.state(), AlertState::Cooldown { until: start + secs(30) });

        for s in 1..30 {
            let now = start + secs(s);
            assert_eq!(engine.evaluate(&inputs(now, &stats, secs(60 + s))), None);
        }
        assert_eq!(
            engine.evaluate(&inputs(start + secs(30), &stats, secs(90))),
            Some(AlertKind::LowRate)
        );
    }

    #[test]
    fn active_alert_suppresses_other_rules() {
        let t0 = Instant::now();
        let stats = RollingStatistics::default();
        let mut engine = AlertRuleEngine::from_config(&MonitorConfig::default());

        assert_eq!(engine.evaluate(&inputs(t0, &stats, secs(61))), Some(AlertKind::LowRate));
        assert_eq!(engine.evaluate(&inputs(t0 + secs(600), &stats, secs(661))), None);
        assert!(matches!(
            engine.state(),
            AlertState::Active { kind: AlertKind::LowRate, .. }
        ));
    }

    #[test]
    fn first_matching_rule_wins() {
        let t0 = Instant::now();
        let mut stats = RollingStatistics::default();
        stats.record(&BlinkEvent {
            reopened_at: t0,
            duration: Duration::from_millis(120),
        });
        let mut engine = AlertRuleEngine::from_config(&MonitorConfig::default());

        // Both LowRate (1/min) and EyesOpenTooLong (30s > 20s) hold.
        let kind = engine.evaluate(&inputs(t0 + secs(30), &stats, secs(120)));
        assert_eq!(kind, Some(AlertKind::LowRate));
    }

    #[test]
    fn eyes_open_too_long_counts_from_session_start_before_first_blink() {
        let t0 = Instant::now();
        let stats = RollingStatistics::default();
        let mut engine = AlertRuleEngine::new(
            vec![AlertRule::EyesOpenTooLong { limit: secs(20) }],
            secs(30),
            QuietHours::default(),
        );

        assert_eq!(engine.evaluate(&inputs(t0, &stats, secs(20))), None);
        assert_eq!(
            engine.evaluate(&inputs(t0 + secs(1), &stats, secs(21))),
            Some(AlertKind::EyesOpenTooLong)
        );
    }

    #[test]
    fn eyes_open_too_long_ignores_closed_eyes() {
        let t0 = Instant::now();
        let stats = RollingStatistics::default();
        let mut engine = AlertRuleEngine::new(
            vec![AlertRule::EyesOpenTooLong { limit: secs(20) }],
            secs(30),
            QuietHours::default(),
        );
        let mut closed = inputs(t0, &stats, secs(40));
        closed.closed_for = Some(secs(2));
        assert_eq!(engine.evaluate(&closed), None);
    }

    #[test]
    fn sustained_low_rate_needs_continuous_condition() {
        let t0 = Instant::now();
        let mut stats = RollingStatistics::new(secs(60));
        let mut engine = AlertRuleEngine::new(
            vec![AlertRule::SustainedLowRate {
                threshold_per_minute: 10.0,
                window: secs(60),
                duration: secs(120),
            }],
            secs(30),
            QuietHours::default(),
        );

        // Low from t=60s on.
        assert_eq!(engine.evaluate(&inputs(t0 + secs(60), &stats, secs(60))), None);
        assert_eq!(engine.evaluate(&inputs(t0 + secs(150), &stats, secs(150))), None);

        // A burst of blinks at 170s interrupts the condition.
        for i in 0..12 {
            stats.record(&BlinkEvent {
                reopened_at: t0 + secs(170) + Duration::from_millis(i * 500),
                duration: Duration::from_millis(100),
            });
        }
        assert_eq!(engine.evaluate(&inputs(t0 + secs(176), &stats, secs(176))), None);

        // Burst leaves the window at ~236s, so the clock restarts there.
        assert_eq!(engine.evaluate(&inputs(t0 + secs(240), &stats, secs(240))), None);
        assert_eq!(engine.evaluate(&inputs(t0 + secs(359), &stats, secs(359))), None);
        assert_eq!(
            engine.evaluate(&inputs(t0 + secs(360), &stats, secs(360))),
            Some(AlertKind::SustainedLowRate)
        );
    }

    #[test]
    fn manual_trigger_and_clear() {
        let t0 = Instant::now();
        let mut engine = low_rate_only(secs(30));

        assert!(!engine.clear(t0));
        assert_eq!(engine.trigger(t0), Some(AlertKind::Manual));
        assert_eq!(engine.trigger(t0), None);
        assert!(engine.clear(t0 + secs(1)));
        // manual trigger still works during cooldown
        assert_eq!(engine.trigger(t0 + secs(2)), Some(AlertKind::Manual));
    }

    #[test]
    fn pause_and_quiet_hours_suppress_rule_triggers() {
        let t0 = Instant::now();
        let stats = RollingStatistics::default();
        let mut engine = low_rate_only(secs(30));

        engine.pause_for(t0, secs(100));
        assert_eq!(engine.evaluate(&inputs(t0 + secs(70), &stats, secs(70))), None);
        engine.resume();
        assert!(!engine.is_paused(t0 + secs(71)));

        let mut quiet = MonitorConfig {
            trigger_logic: crate::config::TriggerLogic::LowRate,
            ..MonitorConfig::default()
        };
        quiet.quiet_hours.enabled = true;
        quiet.quiet_hours.start = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        quiet.quiet_hours.end = NaiveTime::from_hms_opt(13, 0, 0).unwrap();
        engine.reconfigure(&quiet);
        assert_eq!(engine.evaluate(&inputs(t0 + secs(72), &stats, secs(72))), None);

        let mut afternoon = inputs(t0 + secs(73), &stats, secs(73));
        afternoon.local_time = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        assert_eq!(engine.evaluate(&afternoon), Some(AlertKind::LowRate));
    }

    #[test]
    fn unrepresentable_pause_deadline_pauses_until_resume() {
        let t0 = Instant::now();
        let stats = RollingStatistics::default();
        let mut engine = low_rate_only(secs(30));

        engine.pause_for(t0, Duration::MAX);
        assert!(engine.is_paused(t0 + secs(86_400 * 365)));
        assert_eq!(engine.evaluate(&inputs(t0 + secs(70), &stats, secs(70))), None);

        engine.resume();
        assert_eq!(
            engine.evaluate(&inputs(t0 + secs(71), &stats, secs(71))),
            Some(AlertKind::LowRate)
        );
    }
}
