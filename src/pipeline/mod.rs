//! Capture and analysis tasks wired together.
//!
//! ```text
//! camera -> capture task -> BoundedFrameQueue -> analysis task -> EventSink
//!                                                      ^
//!                          MonitorHandle commands -----+  (mpsc)
//!                          MonitorHandle config   -----+  (watch)
//! ```
//!
//! Shutdown stops capture first, then closes the queue so the analysis task
//! drains and exits at a frame boundary.

pub mod analysis;
pub mod capture;
pub mod engine;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::camera::{Camera, LandmarkExtractor};
use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::events::{EventSink, MonitorEvent};
use crate::queue::BoundedFrameQueue;
use crate::statistics::StatisticsSnapshot;

pub use engine::MonitorCore;

/// Requests posted to the analysis task; applied between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartCalibration,
    ClearAlert,
    TriggerAlert,
    PauseFor(Duration),
    PauseUntilTomorrow,
    Resume,
}

/// Observability counters. None of these are errors.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub frames_captured: AtomicU64,
    pub frames_analyzed: AtomicU64,
    pub extraction_misses: AtomicU64,
    pub degenerate_measurements: AtomicU64,
    pub noise_closures: AtomicU64,
    pub hysteresis_rejections: AtomicU64,
    pub sustained_closures: AtomicU64,
    pub stale_resets: AtomicU64,
    pub camera_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub frames_captured: u64,
    pub frames_analyzed: u64,
    pub frames_dropped: u64,
    pub extraction_misses: u64,
    pub degenerate_measurements: u64,
    pub noise_closures: u64,
    pub hysteresis_rejections: u64,
    pub sustained_closures: u64,
    pub stale_resets: u64,
    pub camera_errors: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self, frames_dropped: u64) -> CountersSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            frames_captured: load(&self.frames_captured),
            frames_analyzed: load(&self.frames_analyzed),
            frames_dropped,
            extraction_misses: load(&self.extraction_misses),
            degenerate_measurements: load(&self.degenerate_measurements),
            noise_closures: load(&self.noise_closures),
            hysteresis_rejections: load(&self.hysteresis_rejections),
            sustained_closures: load(&self.sustained_closures),
            stale_resets: load(&self.stale_resets),
            camera_errors: load(&self.camera_errors),
        }
    }
}

pub struct Monitor;

impl Monitor {
    /// Validates `config` and starts both tasks on the current tokio runtime.
    pub fn spawn<C, E>(config: MonitorConfig, camera: C, extractor: E) -> Result<MonitorHandle, ConfigError>
    where
        C: Camera,
        E: LandmarkExtractor,
    {
        config.validate()?;
        let config = Arc::new(config);

        let queue = Arc::new(BoundedFrameQueue::default());
        let events = EventSink::new();
        let counters = Arc::new(PipelineCounters::default());
        let (config_tx, config_rx) = watch::channel(config.clone());
        let config_tx = Arc::new(config_tx);
        let (snapshot_tx, snapshot_rx) = watch::channel(StatisticsSnapshot::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        tracing::info!(
            device_id = config.camera_device_id,
            target_fps = config.target_fps,
            resolution = ?config.resolution,
            "Starting blink monitor"
        );

        let capture = tokio::spawn(capture::run_capture(capture::CaptureContext {
            camera,
            queue: queue.clone(),
            config: config_rx.clone(),
            events: events.clone(),
            counters: counters.clone(),
            shutdown_rx: shutdown_tx.subscribe(),
        }));

        let analysis = tokio::spawn(analysis::run_analysis(analysis::AnalysisContext {
            extractor,
            core: MonitorCore::new(config, counters.clone()),
            queue: queue.clone(),
            config_rx,
            config_tx: config_tx.clone(),
            commands: command_rx,
            events: events.clone(),
            snapshot_tx,
        }));

        Ok(MonitorHandle {
            queue,
            events,
            counters,
            config_tx,
            snapshot_rx,
            command_tx,
            shutdown_tx,
            capture,
            analysis,
        })
    }
}

/// Consumer-facing side of a running monitor.
pub struct MonitorHandle {
    queue: Arc<BoundedFrameQueue>,
    events: EventSink,
    counters: Arc<PipelineCounters>,
    config_tx: Arc<watch::Sender<Arc<MonitorConfig>>>,
    snapshot_rx: watch::Receiver<StatisticsSnapshot>,
    command_tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: broadcast::Sender<()>,
    capture: JoinHandle<()>,
    analysis: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Latest snapshot published by the analysis task.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Current configuration, including a threshold adopted from calibration.
    pub fn config(&self) -> Arc<MonitorConfig> {
        self.config_tx.borrow().clone()
    }

    /// Rejects out-of-range values; accepted values take effect at the next
    /// analysis tick.
    pub fn update_config(&self, config: MonitorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config_tx.send_replace(Arc::new(config));
        Ok(())
    }

    pub fn start_calibration(&self) {
        self.send(Command::StartCalibration);
    }

    pub fn clear_alert(&self) {
        self.send(Command::ClearAlert);
    }

    pub fn trigger_alert(&self) {
        self.send(Command::TriggerAlert);
    }

    pub fn pause_for(&self, duration: Duration) {
        self.send(Command::PauseFor(duration));
    }

    pub fn pause_until_tomorrow(&self) {
        self.send(Command::PauseUntilTomorrow);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped_frame_count()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot(self.queue.dropped_frame_count())
    }

    /// Waits for both tasks to finish on their own (finite frame sources).
    pub async fn join(self) {
        log_join("capture", self.capture.await);
        log_join("analysis", self.analysis.await);
    }

    /// Stops capture, closes the queue, then waits for analysis to drain.
    pub async fn shutdown(self) {
        tracing::info!("Stopping blink monitor");
        let _ = self.shutdown_tx.send(());
        log_join("capture", self.capture.await);
        self.queue.close();
        log_join("analysis", self.analysis.await);
        tracing::info!("Blink monitor stopped");
    }

    fn send(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            tracing::warn!(?command, "Analysis task has exited, command dropped");
        }
    }
}

fn log_join(task: &'static str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(task, error = %e, "Pipeline task panicked");
    }
}
