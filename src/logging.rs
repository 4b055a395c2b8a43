//! Process-wide tracing setup for the monitor binary and tests.

use std::path::PathBuf;
use std::str::FromStr;

use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Daily log files are kept for two weeks.
const LOG_FILES_RETAINED: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset.
    pub level: String,
    pub stdout_format: LogFormat,
    /// Daily-rotated JSON files are written here when set.
    pub file_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stdout_format: LogFormat::Pretty,
            file_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot open log directory: {0}")]
    FileAppender(#[from] InitError),
}

/// Installs the global subscriber. A subscriber that is already installed
/// (tests sharing one process) is left in place.
pub fn init_tracing(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (pretty, json) = match config.stdout_format {
        LogFormat::Pretty => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(false))),
    };

    // file logs carry structured fields only, never image data
    let file = match &config.file_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("blink-monitor")
                .filename_suffix("log")
                .max_log_files(LOG_FILES_RETAINED)
                .build(dir)?;
            Some(fmt::layer().with_writer(appender).with_ansi(false).json())
        }
        None => None,
    };

    let installed = Registry::default()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(file)
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
    Ok(())
}
