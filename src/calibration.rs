//! Time-boxed EAR sampling that derives a per-user closure threshold.
//!
//! The controller lives inside the analysis tick, so sampling is always
//! serialized with state-machine updates.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::constants::{
    CALIBRATION_PROGRESS_INTERVAL, CALIBRATION_STDDEV_FACTOR, CALIBRATION_THRESHOLD_MAX,
    CALIBRATION_THRESHOLD_MIN, MAX_CALIBRATION_SAMPLES,
};
use crate::error::CalibrationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CalibrationOutcome {
    Computed { threshold: f64 },
    Failed { collected: usize, required: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationPhase {
    Idle,
    Collecting { started_at: Instant },
    Computed { threshold: f64 },
    Failed,
}

/// What one `poll` produced; both fields are usually None.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationUpdate {
    pub progress: Option<f64>,
    pub outcome: Option<CalibrationOutcome>,
}

#[derive(Debug, Clone)]
pub struct CalibrationController {
    duration: Duration,
    min_samples: usize,
    phase: CalibrationPhase,
    samples: Vec<f64>,
    last_progress_at: Option<Instant>,
}

impl CalibrationController {
    pub fn new(duration: Duration, min_samples: usize) -> Self {
        Self {
            duration,
            min_samples,
            phase: CalibrationPhase::Idle,
            samples: Vec::new(),
            last_progress_at: None,
        }
    }

    /// Applies from the next run; a run in progress keeps the duration it started with.
    pub fn reconfigure(&mut self, duration: Duration, min_samples: usize) {
        if !self.is_collecting() {
            self.duration = duration;
        }
        self.min_samples = min_samples;
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self.phase, CalibrationPhase::Collecting { .. })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Starts (or restarts) a collection window at `now`. Samples from an
    /// interrupted run are discarded.
    pub fn start(&mut self, now: Instant) {
        if self.is_collecting() {
            tracing::info!(discarded = self.samples.len(), "Restarting calibration");
        } else {
            tracing::info!(duration_secs = self.duration.as_secs(), "Calibration started");
        }
        self.samples.clear();
        self.last_progress_at = None;
        self.phase = CalibrationPhase::Collecting { started_at: now };
    }

    pub fn add_sample(&mut self, ear: f64) {
        if self.is_collecting() && ear.is_finite() && self.samples.len() < MAX_CALIBRATION_SAMPLES {
            self.samples.push(ear);
        }
    }

    /// Advances the collection clock. Progress fractions are rate-limited;
    /// the outcome is produced exactly once when the window expires.
    pub fn poll(&mut self, now: Instant) -> CalibrationUpdate {
        let CalibrationPhase::Collecting { started_at } = self.phase else {
            return CalibrationUpdate::default();
        };

        let elapsed = now.saturating_duration_since(started_at);
        if elapsed >= self.duration {
            let outcome = match threshold_from_samples(&self.samples, self.min_samples) {
                Ok(threshold) => {
                    tracing::info!(threshold, samples = self.samples.len(), "Calibration computed");
                    self.phase = CalibrationPhase::Computed { threshold };
                    CalibrationOutcome::Computed { threshold }
                }
                Err(CalibrationError::InsufficientSamples { collected, required }) => {
                    tracing::warn!(collected, required, "Calibration failed");
                    self.phase = CalibrationPhase::Failed;
                    CalibrationOutcome::Failed { collected, required }
                }
            };
            self.samples.clear();
            return CalibrationUpdate {
                progress: Some(1.0),
                outcome: Some(outcome),
            };
        }

        let due = self
            .last_progress_at
            .map(|last| now.saturating_duration_since(last) >= CALIBRATION_PROGRESS_INTERVAL)
            .unwrap_or(true);
        if !due {
            return CalibrationUpdate::default();
        }
        self.last_progress_at = Some(now);

        let fraction = if self.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
        };
        CalibrationUpdate {
            progress: Some(fraction),
            outcome: None,
        }
    }
}

/// mean - 1.5 * σ (population standard deviation), clamped to [0.1, 0.4].
pub fn threshold_from_samples(samples: &[f64], min_samples: usize) -> Result<f64, CalibrationError> {
    let required = min_samples.max(1);
    if samples.len() < required {
        return Err(CalibrationError::InsufficientSamples {
            collected: samples.len(),
            required,
        });
    }

    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let threshold = mean - CALIBRATION_STDDEV_FACTOR * variance.sqrt();
    Ok(threshold.clamp(CALIBRATION_THRESHOLD_MIN, CALIBRATION_THRESHOLD_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn threshold_is_mean_minus_one_and_a_half_sigma() {
        let samples: Vec<f64> = std::iter::repeat(0.26)
            .take(50)
            .chain(std::iter::repeat(0.34).take(50))
            .collect();
        let threshold = threshold_from_samples(&samples, 20).unwrap();
        assert!((threshold - 0.24).abs() < 1e-9, "got {threshold}");
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(threshold_from_samples(&[0.05; 30], 20).unwrap(), 0.1);
        assert_eq!(threshold_from_samples(&[0.45; 30], 20).unwrap(), 0.4);
    }

    #[test]
    fn too_few_samples_fail() {
        assert_eq!(
            threshold_from_samples(&[0.3; 5], 20),
            Err(CalibrationError::InsufficientSamples {
                collected: 5,
                required: 20
            })
        );
    }

    #[test]
    fn session_runs_to_computed() {
        let t0 = Instant::now();
        let mut calib = CalibrationController::new(Duration::from_secs(5), 20);
        calib.start(t0);
        for _ in 0..30 {
            calib.add_sample(0.3);
        }

        let first = calib.poll(t0);
        assert_eq!(first.progress, Some(0.0));
        assert_eq!(calib.poll(t0 + ms(100)), CalibrationUpdate::default());
        let mid = calib.poll(t0 + ms(2500));
        assert!((mid.progress.unwrap() - 0.5).abs() < 1e-9);

        let done = calib.poll(t0 + ms(5000));
        assert_eq!(done.progress, Some(1.0));
        match done.outcome {
            Some(CalibrationOutcome::Computed { threshold }) => {
                assert!((threshold - 0.3).abs() < 1e-9)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(calib.phase(), CalibrationPhase::Computed { .. }));
        assert_eq!(calib.poll(t0 + ms(6000)), CalibrationUpdate::default());
    }

    #[test]
    fn session_fails_with_sparse_samples() {
        let t0 = Instant::now();
        let mut calib = CalibrationController::new(Duration::from_secs(5), 20);
        calib.start(t0);
        calib.add_sample(0.3);

        let done = calib.poll(t0 + Duration::from_secs(5));
        assert_eq!(
            done.outcome,
            Some(CalibrationOutcome::Failed {
                collected: 1,
                required: 20
            })
        );
        assert_eq!(calib.phase(), CalibrationPhase::Failed);
    }

    #[test]
    fn samples_ignored_outside_collection_and_cleared_on_restart() {
        let t0 = Instant::now();
        let mut calib = CalibrationController::new(Duration::from_secs(5), 20);
        calib.add_sample(0.3);
        assert_eq!(calib.sample_count(), 0);

        calib.start(t0);
        calib.add_sample(0.3);
        calib.add_sample(f64::NAN);
        assert_eq!(calib.sample_count(), 1);

        calib.start(t0 + ms(1000));
        assert_eq!(calib.sample_count(), 0);
        assert!(calib.poll(t0 + ms(5500)).outcome.is_none());
    }
}
