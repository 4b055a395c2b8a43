//! Synchronous body of one analysis tick.
//!
//! Order per frame: extraction result -> EAR -> blink state machine ->
//! statistics -> calibration -> alert rules. Everything here is owned by the
//! analysis task; consumers only ever see the events and snapshots it returns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, NaiveTime};
use eye_metrics::{BlinkOutcome, BlinkStateMachine, EarCalculator, LandmarkSet};

use super::{Command, PipelineCounters};
use crate::alerts::{AlertRuleEngine, RuleInputs};
use crate::calibration::{CalibrationController, CalibrationOutcome};
use crate::config::MonitorConfig;
use crate::events::MonitorEvent;
use crate::statistics::{RollingStatistics, StatisticsSnapshot};

pub struct MonitorCore {
    config: Arc<MonitorConfig>,
    calculator: EarCalculator,
    blink: BlinkStateMachine,
    statistics: RollingStatistics,
    calibration: CalibrationController,
    alerts: AlertRuleEngine,
    counters: Arc<PipelineCounters>,
    session_started_at: Option<Instant>,
    camera_session: u64,
    face_detected: Option<bool>,
    current_ear: Option<f64>,
    last_statistics_at: Option<Instant>,
    auto_calibration_pending: bool,
}

impl MonitorCore {
    pub fn new(config: Arc<MonitorConfig>, counters: Arc<PipelineCounters>) -> Self {
        Self {
            calculator: EarCalculator::default(),
            blink: BlinkStateMachine::new(config.blink_config()),
            statistics: RollingStatistics::new(config.retention_window()),
            calibration: CalibrationController::new(
                config.calibration_duration(),
                config.calibration_min_samples,
            ),
            alerts: AlertRuleEngine::from_config(&config),
            counters,
            session_started_at: None,
            camera_session: 0,
            face_detected: None,
            current_ear: None,
            last_statistics_at: None,
            auto_calibration_pending: config.auto_calibrate,
            config,
        }
    }

    pub fn config(&self) -> &Arc<MonitorConfig> {
        &self.config
    }

    pub fn alerts(&self) -> &AlertRuleEngine {
        &self.alerts
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    /// Adopts a new configuration snapshot. Blink, statistics and alert state
    /// carry over; only parameters change.
    pub fn apply_config(&mut self, config: Arc<MonitorConfig>) {
        self.blink.set_config(config.blink_config());
        self.statistics.set_retention(config.retention_window());
        self.calibration
            .reconfigure(config.calibration_duration(), config.calibration_min_samples);
        self.alerts.reconfigure(&config);
        tracing::info!(
            ear_threshold = config.ear_threshold,
            target_fps = config.target_fps,
            "Configuration applied"
        );
        self.config = config;
    }

    pub fn observed_for(&self, now: Instant) -> Duration {
        self.session_started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    pub fn snapshot(&self, now: Instant) -> StatisticsSnapshot {
        self.statistics.snapshot(
            now,
            self.current_ear,
            self.blink.state(),
            self.observed_for(now),
        )
    }

    /// Frames from a new camera session make the next tick report
    /// `CameraStatus` again, whatever the last reported face state was.
    pub fn note_camera_session(&mut self, session: u64) {
        if self.camera_session != session {
            tracing::debug!(session, "New camera session");
            self.camera_session = session;
            self.face_detected = None;
        }
    }

    /// Processes one analysed frame. `landmarks` is None when the extractor
    /// found no face.
    pub fn tick(
        &mut self,
        captured_at: Instant,
        landmarks: Option<&LandmarkSet>,
        local_time: NaiveTime,
    ) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        self.session_started_at.get_or_insert(captured_at);
        self.counters.frames_analyzed.fetch_add(1, Ordering::Relaxed);

        let face = landmarks.is_some();
        if self.face_detected != Some(face) {
            tracing::info!(face_detected = face, "Face detection changed");
            self.face_detected = Some(face);
            events.push(MonitorEvent::CameraStatus {
                active: true,
                face_detected: face,
            });
        }

        let ear = self.measure(landmarks);
        self.current_ear = ear;

        let mut blinked = false;
        if let Some(ear) = ear {
            if let Some(outcome) = self.blink.update(ear, captured_at) {
                blinked = self.handle_outcome(outcome, &mut events);
            }
            if self.auto_calibration_pending {
                self.auto_calibration_pending = false;
                self.calibration.start(captured_at);
            }
            self.calibration.add_sample(ear);
        }

        self.statistics.evict(captured_at);
        self.poll_calibration(captured_at, &mut events);

        // no valid measurement, user is away: skip rule evaluation
        if ear.is_some() {
            let inputs = RuleInputs {
                now: captured_at,
                statistics: &self.statistics,
                observed_for: self.observed_for(captured_at),
                closed_for: self.blink.closed_duration(captured_at),
                local_time,
            };
            if let Some(kind) = self.alerts.evaluate(&inputs) {
                events.push(MonitorEvent::Alert { kind });
            }
        }

        let stats_due = self
            .last_statistics_at
            .map(|last| captured_at.saturating_duration_since(last) >= self.config.statistics_interval())
            .unwrap_or(true);
        if blinked || stats_due {
            self.last_statistics_at = Some(captured_at);
            events.push(MonitorEvent::Statistics(self.snapshot(captured_at)));
        }

        events
    }

    pub fn handle_command(
        &mut self,
        command: Command,
        now: Instant,
        local: NaiveDateTime,
    ) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        match command {
            Command::StartCalibration => {
                self.auto_calibration_pending = false;
                self.calibration.start(now);
                self.poll_calibration(now, &mut events);
            }
            Command::ClearAlert => {
                if self.alerts.clear(now) {
                    events.push(MonitorEvent::AlertCleared);
                }
            }
            Command::TriggerAlert => {
                if let Some(kind) = self.alerts.trigger(now) {
                    events.push(MonitorEvent::Alert { kind });
                }
            }
            Command::PauseFor(duration) => {
                tracing::info!(pause_secs = duration.as_secs(), "Alerts paused");
                self.alerts.pause_for(now, duration);
            }
            Command::PauseUntilTomorrow => {
                let remaining = until_next_midnight(local);
                tracing::info!(pause_secs = remaining.as_secs(), "Alerts paused until tomorrow");
                self.alerts.pause_for(now, remaining);
            }
            Command::Resume => {
                tracing::info!("Alerts resumed");
                self.alerts.resume();
            }
        }
        events
    }

    fn measure(&self, landmarks: Option<&LandmarkSet>) -> Option<f64> {
        let Some(set) = landmarks else {
            self.counters.extraction_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match self.calculator.compute(set) {
            Ok(ear) => Some(ear),
            Err(reason) => {
                self.counters
                    .degenerate_measurements
                    .fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%reason, "Measurement rejected");
                None
            }
        }
    }

    /// Returns true when a blink was recorded.
    fn handle_outcome(&mut self, outcome: BlinkOutcome, events: &mut Vec<MonitorEvent>) -> bool {
        match outcome {
            BlinkOutcome::Blink(event) => {
                self.statistics.record(&event);
                tracing::debug!(duration_ms = event.duration.as_millis() as u64, "Blink");
                events.push(MonitorEvent::Blink {
                    duration_ms: event.duration.as_millis() as u64,
                });
                return true;
            }
            BlinkOutcome::SustainedClosure { duration } => {
                self.counters.sustained_closures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(duration_ms = duration.as_millis() as u64, "Sustained closure");
            }
            BlinkOutcome::NoiseRejected { .. } => {
                self.counters.noise_closures.fetch_add(1, Ordering::Relaxed);
            }
            BlinkOutcome::HysteresisRejected => {
                self.counters
                    .hysteresis_rejections
                    .fetch_add(1, Ordering::Relaxed);
            }
            BlinkOutcome::StaleReset { .. } => {
                self.counters.stale_resets.fetch_add(1, Ordering::Relaxed);
            }
        }
        false
    }

    fn poll_calibration(&mut self, now: Instant, events: &mut Vec<MonitorEvent>) {
        let update = self.calibration.poll(now);
        if let Some(fraction) = update.progress {
            events.push(MonitorEvent::CalibrationProgress { fraction });
        }
        let Some(outcome) = update.outcome else {
            return;
        };
        if let CalibrationOutcome::Computed { threshold } = outcome {
            let mut next = (*self.config).clone();
            next.ear_threshold = threshold;
            self.apply_config(Arc::new(next));
        }
        events.push(MonitorEvent::CalibrationResult { outcome });
    }
}

/// Time left until the next local midnight.
pub fn until_next_midnight(local: NaiveDateTime) -> Duration {
    local
        .date()
        .succ_opt()
        .map(|tomorrow| tomorrow.and_time(NaiveTime::MIN))
        .and_then(|midnight| midnight.signed_duration_since(local).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use eye_metrics::EyeLandmarks;

    use super::*;
    use crate::alerts::{AlertKind, AlertState};
    use crate::calibration::CalibrationPhase;

    fn core_with(config: MonitorConfig) -> MonitorCore {
        MonitorCore::new(Arc::new(config), Arc::new(PipelineCounters::default()))
    }

    fn manual_config() -> MonitorConfig {
        MonitorConfig {
            auto_calibrate: false,
            ..MonitorConfig::default()
        }
    }

    fn eyes(ear: f64) -> LandmarkSet {
        LandmarkSet::binocular(EyeLandmarks::synthetic(ear))
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn blinks(events: &[MonitorEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Blink { duration_ms } => Some(*duration_ms),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn three_closed_frames_make_one_blink() {
        let t0 = Instant::now();
        let mut core = core_with(manual_config());
        let mut all = Vec::new();

        all.extend(core.tick(t0, Some(&eyes(0.3)), noon()));
        for step in [40, 80, 120] {
            all.extend(core.tick(t0 + ms(step), Some(&eyes(0.1)), noon()));
        }
        all.extend(core.tick(t0 + ms(160), Some(&eyes(0.3)), noon()));

        assert_eq!(blinks(&all), vec![120]);
        assert_eq!(core.snapshot(t0 + ms(160)).total_blinks, 1);
        assert_eq!(core.snapshot(t0 + ms(160)).blinks_last_minute, 1);
    }

    #[test]
    fn missing_face_is_reported_once_and_counted() {
        let t0 = Instant::now();
        let counters = Arc::new(PipelineCounters::default());
        let mut core = MonitorCore::new(Arc::new(manual_config()), counters.clone());

        let first = core.tick(t0, None, noon());
        assert!(first.contains(&MonitorEvent::CameraStatus {
            active: true,
            face_detected: false
        }));
        let second = core.tick(t0 + ms(66), None, noon());
        assert!(!second
            .iter()
            .any(|e| matches!(e, MonitorEvent::CameraStatus { .. })));

        let third = core.tick(t0 + ms(133), Some(&eyes(0.3)), noon());
        assert!(third.contains(&MonitorEvent::CameraStatus {
            active: true,
            face_detected: true
        }));
        assert_eq!(counters.extraction_misses.load(Ordering::Relaxed), 2);
        assert_eq!(counters.frames_analyzed.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn new_camera_session_reports_face_status_again() {
        let t0 = Instant::now();
        let mut core = core_with(manual_config());
        let status = |events: &[MonitorEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, MonitorEvent::CameraStatus { .. }))
                .cloned()
                .collect::<Vec<_>>()
        };
        let active_with_face = MonitorEvent::CameraStatus {
            active: true,
            face_detected: true,
        };

        core.note_camera_session(1);
        assert_eq!(
            status(&core.tick(t0, Some(&eyes(0.3)), noon())),
            vec![active_with_face.clone()]
        );
        core.note_camera_session(1);
        assert!(status(&core.tick(t0 + ms(33), Some(&eyes(0.3)), noon())).is_empty());

        // capture reported the camera inactive in between
        core.note_camera_session(2);
        assert_eq!(
            status(&core.tick(t0 + ms(600), Some(&eyes(0.3)), noon())),
            vec![active_with_face]
        );
    }

    #[test]
    fn degenerate_measurement_leaves_state_untouched() {
        let t0 = Instant::now();
        let counters = Arc::new(PipelineCounters::default());
        let mut core = MonitorCore::new(Arc::new(manual_config()), counters.clone());

        let flat = LandmarkSet::binocular(EyeLandmarks::new([eye_metrics::Point::new(0.5, 0.5); 6]));
        core.tick(t0, Some(&flat), noon());
        assert_eq!(counters.degenerate_measurements.load(Ordering::Relaxed), 1);
        assert_eq!(core.snapshot(t0).current_ear, None);
    }

    #[test]
    fn statistics_are_rate_limited_except_on_blink() {
        let t0 = Instant::now();
        let mut core = core_with(manual_config());
        let count_stats = |events: &[MonitorEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, MonitorEvent::Statistics(_)))
                .count()
        };

        assert_eq!(count_stats(&core.tick(t0, Some(&eyes(0.3)), noon())), 1);
        assert_eq!(count_stats(&core.tick(t0 + ms(66), Some(&eyes(0.1)), noon())), 0);
        assert_eq!(count_stats(&core.tick(t0 + ms(133), Some(&eyes(0.1)), noon())), 0);
        // reopen -> blink -> immediate snapshot
        assert_eq!(count_stats(&core.tick(t0 + ms(200), Some(&eyes(0.3)), noon())), 1);
        assert_eq!(count_stats(&core.tick(t0 + ms(1200), Some(&eyes(0.3)), noon())), 1);
    }

    #[test]
    fn auto_calibration_adopts_threshold() {
        let t0 = Instant::now();
        let mut core = core_with(MonitorConfig {
            calibration_seconds: 1,
            calibration_min_samples: 5,
            ..MonitorConfig::default()
        });

        let mut result = None;
        for i in 0..=15u64 {
            let events = core.tick(t0 + ms(i * 70), Some(&eyes(0.3)), noon());
            for event in events {
                if let MonitorEvent::CalibrationResult { outcome } = event {
                    result = Some(outcome);
                }
            }
        }

        match result {
            Some(CalibrationOutcome::Computed { threshold }) => {
                assert!((threshold - 0.3).abs() < 1e-9);
                assert!((core.config().ear_threshold - 0.3).abs() < 1e-9);
            }
            other => panic!("unexpected calibration result {other:?}"),
        }
    }

    #[test]
    fn failed_calibration_keeps_threshold() {
        let t0 = Instant::now();
        let mut core = core_with(manual_config());
        let local = NaiveDateTime::default();

        let events = core.handle_command(Command::StartCalibration, t0, local);
        assert_eq!(events, vec![MonitorEvent::CalibrationProgress { fraction: 0.0 }]);
        core.tick(t0 + ms(100), Some(&eyes(0.3)), noon());
        let events = core.tick(t0 + Duration::from_secs(5), None, noon());

        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::CalibrationResult {
                outcome: CalibrationOutcome::Failed { .. }
            }
        )));
        assert_eq!(core.calibration().phase(), CalibrationPhase::Failed);
        assert_eq!(core.config().ear_threshold, 0.21);
    }

    #[test]
    fn commands_drive_alert_state() {
        let t0 = Instant::now();
        let mut core = core_with(manual_config());
        let local = NaiveDateTime::default();

        assert!(core.handle_command(Command::ClearAlert, t0, local).is_empty());
        assert_eq!(
            core.handle_command(Command::TriggerAlert, t0, local),
            vec![MonitorEvent::Alert {
                kind: AlertKind::Manual
            }]
        );
        assert_eq!(
            core.handle_command(Command::ClearAlert, t0, local),
            vec![MonitorEvent::AlertCleared]
        );
        assert!(matches!(core.alerts().state(), AlertState::Cooldown { .. }));

        core.handle_command(Command::PauseFor(Duration::from_secs(60)), t0, local);
        assert!(core.alerts().is_paused(t0 + Duration::from_secs(59)));
        core.handle_command(Command::Resume, t0, local);
        assert!(!core.alerts().is_paused(t0));
    }

    #[test]
    fn huge_pause_does_not_overflow() {
        let t0 = Instant::now();
        let mut core = core_with(manual_config());
        let local = NaiveDateTime::default();

        let events = core.handle_command(Command::PauseFor(Duration::MAX), t0, local);
        assert!(events.is_empty());
        assert!(core.alerts().is_paused(t0 + Duration::from_secs(86_400 * 365)));

        core.handle_command(Command::Resume, t0, local);
        assert!(!core.alerts().is_paused(t0));
    }

    #[test]
    fn no_blink_alert_fires_after_limit() {
        let t0 = Instant::now();
        let mut core = core_with(MonitorConfig {
            trigger_logic: crate::config::TriggerLogic::NoBlink,
            ..manual_config()
        });

        let mut alerts = Vec::new();
        for s in 0..=21u64 {
            for event in core.tick(t0 + Duration::from_secs(s), Some(&eyes(0.3)), noon()) {
                if let MonitorEvent::Alert { kind } = event {
                    alerts.push((s, kind));
                }
            }
        }
        assert_eq!(alerts, vec![(21, AlertKind::EyesOpenTooLong)]);
    }

    #[test]
    fn midnight_distance() {
        let local = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(22, 30, 0)
            .unwrap();
        assert_eq!(until_next_midnight(local), Duration::from_secs(90 * 60));
    }
}
