use std::time::Duration;

/// Frame queue capacity between capture and analysis.
pub const FRAME_QUEUE_CAPACITY: usize = 3;

/// Minimum statistics window in seconds; blinks-per-minute always uses 60 s.
pub const BASE_STATISTICS_WINDOW_SECS: u64 = 60;

/// Standard deviation factor in the calibrated threshold.
pub const CALIBRATION_STDDEV_FACTOR: f64 = 1.5;

/// Allowed range of a calibrated threshold.
pub const CALIBRATION_THRESHOLD_MIN: f64 = 0.1;
pub const CALIBRATION_THRESHOLD_MAX: f64 = 0.4;

/// Sample cap for one calibration run (30 fps for 60 s).
pub const MAX_CALIBRATION_SAMPLES: usize = 1800;

/// Minimum interval between calibration progress events.
pub const CALIBRATION_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Camera reconnect backoff.
pub const CAMERA_RETRY_INITIAL: Duration = Duration::from_millis(500);
pub const CAMERA_RETRY_MAX: Duration = Duration::from_secs(8);

/// Event channel capacity; slow consumers lose the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
