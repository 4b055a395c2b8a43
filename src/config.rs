use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use eye_metrics::BlinkConfig;
use serde::{Deserialize, Serialize};

use crate::alerts::AlertRule;
use crate::constants::BASE_STATISTICS_WINDOW_SECS;
use crate::error::ConfigError;
use crate::logging::{LogConfig, LogFormat};

/// Camera resolution presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Eco,
    #[default]
    Standard,
}

impl Resolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Eco => (320, 240),
            Self::Standard => (640, 480),
        }
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eco" | "320x240" => Ok(Self::Eco),
            "standard" | "default" | "640x480" => Ok(Self::Standard),
            other => Err(ConfigError::Invalid(format!("unknown resolution '{other}'"))),
        }
    }
}

/// Which alert rules are enabled; `Both` enables all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerLogic {
    NoBlink,
    LowRate,
    SustainedLowRate,
    #[default]
    Both,
}

impl FromStr for TriggerLogic {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no_blink" => Ok(Self::NoBlink),
            "low_rate" => Ok(Self::LowRate),
            "sustained_low_rate" => Ok(Self::SustainedLowRate),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::Invalid(format!("unknown trigger logic '{other}'"))),
        }
    }
}

/// Local wall-clock window during which rule-driven alerts are suppressed.
/// `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl QuietHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if !self.enabled || self.start == self.end {
            return false;
        }
        if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Immutable tuning snapshot for the analysis pipeline. Updates replace the
/// whole value; the analysis task picks the new one up at its next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub ear_threshold: f64,
    pub hysteresis_frames: u32,
    pub min_blink_duration_ms: u64,
    pub max_blink_duration_ms: u64,
    /// The blink state machine resets when no valid frame arrives for this long.
    pub staleness_ms: u64,

    pub min_blinks_per_minute: f64,
    pub low_rate_window_minutes: u64,
    pub eyes_open_too_long_seconds: u64,
    pub sustained_low_rate_duration_minutes: u64,
    pub alert_cooldown_seconds: u64,
    pub trigger_logic: TriggerLogic,
    pub quiet_hours: QuietHours,

    pub target_fps: u32,
    pub resolution: Resolution,
    pub camera_device_id: u32,

    pub auto_calibrate: bool,
    pub calibration_seconds: u64,
    pub calibration_min_samples: usize,

    /// Statistics push interval; a blink pushes immediately.
    pub statistics_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.21,
            hysteresis_frames: 2,
            min_blink_duration_ms: 50,
            max_blink_duration_ms: 500,
            staleness_ms: 1000,
            min_blinks_per_minute: 15.0,
            low_rate_window_minutes: 1,
            eyes_open_too_long_seconds: 20,
            sustained_low_rate_duration_minutes: 3,
            alert_cooldown_seconds: 900,
            trigger_logic: TriggerLogic::Both,
            quiet_hours: QuietHours::default(),
            target_fps: 15,
            resolution: Resolution::Standard,
            camera_device_id: 0,
            auto_calibrate: true,
            calibration_seconds: 5,
            calibration_min_samples: 20,
            statistics_interval_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ear_threshold: env_or_parse("BLINK_EAR_THRESHOLD", d.ear_threshold),
            hysteresis_frames: env_or_parse("BLINK_HYSTERESIS_FRAMES", d.hysteresis_frames),
            min_blink_duration_ms: env_or_parse("BLINK_MIN_DURATION_MS", d.min_blink_duration_ms),
            max_blink_duration_ms: env_or_parse("BLINK_MAX_DURATION_MS", d.max_blink_duration_ms),
            staleness_ms: env_or_parse("BLINK_STALENESS_MS", d.staleness_ms),
            min_blinks_per_minute: env_or_parse("BLINK_MIN_PER_MINUTE", d.min_blinks_per_minute),
            low_rate_window_minutes: env_or_parse(
                "BLINK_LOW_RATE_WINDOW_MINUTES",
                d.low_rate_window_minutes,
            ),
            eyes_open_too_long_seconds: env_or_parse(
                "BLINK_EYES_OPEN_TOO_LONG_SECONDS",
                d.eyes_open_too_long_seconds,
            ),
            sustained_low_rate_duration_minutes: env_or_parse(
                "BLINK_SUSTAINED_LOW_RATE_MINUTES",
                d.sustained_low_rate_duration_minutes,
            ),
            alert_cooldown_seconds: env_or_parse("BLINK_ALERT_COOLDOWN_SECONDS", d.alert_cooldown_seconds),
            trigger_logic: env_or_parse("BLINK_TRIGGER_LOGIC", d.trigger_logic),
            quiet_hours: QuietHours {
                enabled: env_or_bool("BLINK_QUIET_HOURS", d.quiet_hours.enabled),
                start: env_or_parse("BLINK_QUIET_HOURS_START", d.quiet_hours.start),
                end: env_or_parse("BLINK_QUIET_HOURS_END", d.quiet_hours.end),
            },
            target_fps: env_or_parse("BLINK_TARGET_FPS", d.target_fps),
            resolution: env_or_parse("BLINK_RESOLUTION", d.resolution),
            camera_device_id: env_or_parse("BLINK_CAMERA_DEVICE", d.camera_device_id),
            auto_calibrate: env_or_bool("BLINK_AUTO_CALIBRATE", d.auto_calibrate),
            calibration_seconds: env_or_parse("BLINK_CALIBRATION_SECONDS", d.calibration_seconds),
            calibration_min_samples: env_or_parse(
                "BLINK_CALIBRATION_MIN_SAMPLES",
                d.calibration_min_samples,
            ),
            statistics_interval_ms: env_or_parse("BLINK_STATISTICS_INTERVAL_MS", d.statistics_interval_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("earThreshold", self.ear_threshold, 0.1, 0.4, "[0.1, 0.4]")?;
        check_range("hysteresisFrames", self.hysteresis_frames as f64, 1.0, 5.0, "[1, 5]")?;
        check_range("minBlinkDurationMs", self.min_blink_duration_ms as f64, 20.0, 200.0, "[20, 200]")?;
        check_range("maxBlinkDurationMs", self.max_blink_duration_ms as f64, 200.0, 1000.0, "[200, 1000]")?;
        if self.max_blink_duration_ms <= self.min_blink_duration_ms {
            return Err(ConfigError::Invalid(
                "maxBlinkDurationMs must exceed minBlinkDurationMs".to_string(),
            ));
        }
        if self.staleness_ms <= self.max_blink_duration_ms {
            return Err(ConfigError::Invalid(
                "stalenessMs must exceed maxBlinkDurationMs".to_string(),
            ));
        }
        check_range("minBlinksPerMinute", self.min_blinks_per_minute, 5.0, 30.0, "[5, 30]")?;
        check_range("lowRateWindowMinutes", self.low_rate_window_minutes as f64, 1.0, 15.0, "[1, 15]")?;
        check_range("eyesOpenTooLongSeconds", self.eyes_open_too_long_seconds as f64, 5.0, 120.0, "[5, 120]")?;
        check_range(
            "sustainedLowRateDurationMinutes",
            self.sustained_low_rate_duration_minutes as f64,
            1.0,
            15.0,
            "[1, 15]",
        )?;
        check_range("alertCooldownSeconds", self.alert_cooldown_seconds as f64, 1.0, 3600.0, "[1, 3600]")?;
        check_range("targetFps", self.target_fps as f64, 5.0, 30.0, "[5, 30]")?;
        check_range("cameraDeviceId", self.camera_device_id as f64, 0.0, 9.0, "[0, 9]")?;
        check_range("calibrationSeconds", self.calibration_seconds as f64, 1.0, 60.0, "[1, 60]")?;
        if self.calibration_min_samples == 0 {
            return Err(ConfigError::Invalid(
                "calibrationMinSamples must be > 0".to_string(),
            ));
        }
        if self.statistics_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "statisticsIntervalMs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn blink_config(&self) -> BlinkConfig {
        BlinkConfig {
            ear_threshold: self.ear_threshold,
            hysteresis_frames: self.hysteresis_frames,
            min_blink: Duration::from_millis(self.min_blink_duration_ms),
            max_blink: Duration::from_millis(self.max_blink_duration_ms),
            staleness: Duration::from_millis(self.staleness_ms),
        }
    }

    /// Active rules in fixed evaluation order: LowRate, EyesOpenTooLong,
    /// SustainedLowRate. The first rule that holds names the alert.
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        let threshold_per_minute = self.min_blinks_per_minute;
        let window = minutes(self.low_rate_window_minutes);
        let logic = self.trigger_logic;

        let mut rules = Vec::with_capacity(3);
        if matches!(logic, TriggerLogic::LowRate | TriggerLogic::Both) {
            rules.push(AlertRule::LowRate {
                threshold_per_minute,
                window,
            });
        }
        if matches!(logic, TriggerLogic::NoBlink | TriggerLogic::Both) {
            rules.push(AlertRule::EyesOpenTooLong {
                limit: Duration::from_secs(self.eyes_open_too_long_seconds),
            });
        }
        if matches!(logic, TriggerLogic::SustainedLowRate | TriggerLogic::Both) {
            rules.push(AlertRule::SustainedLowRate {
                threshold_per_minute,
                window,
                duration: minutes(self.sustained_low_rate_duration_minutes),
            });
        }
        rules
    }

    /// Longest window statistics must keep: at least 60 s and every rule window.
    pub fn retention_window(&self) -> Duration {
        self.alert_rules()
            .iter()
            .filter_map(AlertRule::window)
            .fold(Duration::from_secs(BASE_STATISTICS_WINDOW_SECS), Duration::max)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_seconds)
    }

    pub fn calibration_duration(&self) -> Duration {
        Duration::from_secs(self.calibration_seconds)
    }

    pub fn statistics_interval(&self) -> Duration {
        Duration::from_millis(self.statistics_interval_ms)
    }
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log: LogConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            log: LogConfig {
                level: env_or("RUST_LOG", "info"),
                stdout_format: env_or("LOG_FORMAT", "pretty")
                    .parse::<LogFormat>()
                    .unwrap_or_default(),
                file_dir: env_or_bool("ENABLE_FILE_LOGS", false)
                    .then(|| PathBuf::from(env_or("LOG_DIR", "./logs"))),
            },
            monitor: MonitorConfig::from_env(),
        }
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        });
    }
    Ok(())
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
