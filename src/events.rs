//! Outbound notifications for the presentation layer.
//!
//! Delivery is a bounded broadcast: publishing never waits, and a receiver
//! that falls behind sees `Lagged` and skips ahead.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::alerts::AlertKind;
use crate::calibration::CalibrationOutcome;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::statistics::StatisticsSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MonitorEvent {
    Statistics(StatisticsSnapshot),
    #[serde(rename_all = "camelCase")]
    Blink { duration_ms: u64 },
    Alert { kind: AlertKind },
    AlertCleared,
    CalibrationProgress { fraction: f64 },
    CalibrationResult { outcome: CalibrationOutcome },
    #[serde(rename_all = "camelCase")]
    CameraStatus { active: bool, face_detected: bool },
    CameraError { message: String },
}

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Events are dropped when nobody is subscribed.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = MonitorEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
