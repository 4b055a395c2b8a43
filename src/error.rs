#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("camera device busy")]
    DeviceBusy,
    #[error("camera device not found: {0}")]
    NotFound(u32),
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera i/o error: {0}")]
    Io(String),
}

impl CameraError {
    /// Busy devices and transient read failures usually clear up quickly;
    /// a missing device or denied permission needs user action first.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DeviceBusy | Self::Io(_))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} = {value} is outside {expected}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalibrationError {
    #[error("calibration collected {collected} samples, {required} required")]
    InsufficientSamples { collected: usize, required: usize },
}
