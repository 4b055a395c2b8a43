use std::time::Duration;

use chrono::NaiveTime;
use tokio::sync::broadcast;

use blink_monitor::config::MonitorConfig;
use blink_monitor::eye_metrics::{EyeLandmarks, LandmarkSet};
use blink_monitor::events::MonitorEvent;

pub const OPEN_EAR: f64 = 0.30;
pub const CLOSED_EAR: f64 = 0.10;

pub fn eyes(ear: f64) -> LandmarkSet {
    LandmarkSet::binocular(EyeLandmarks::synthetic(ear))
}

pub fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).expect("valid time")
}

/// Manual-calibration config at 30 fps, suitable for short scripted runs.
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        auto_calibrate: false,
        target_fps: 30,
        ..MonitorConfig::default()
    }
}

/// `open` open frames, `closed` closed frames, then `open` open frames again.
pub fn blink_script(open: usize, closed: usize) -> Vec<Option<f64>> {
    std::iter::repeat(Some(OPEN_EAR))
        .take(open)
        .chain(std::iter::repeat(Some(CLOSED_EAR)).take(closed))
        .chain(std::iter::repeat(Some(OPEN_EAR)).take(open))
        .collect()
}

/// Everything already buffered on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

/// Waits until an event matching `pred` arrives, or panics after `timeout`.
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<MonitorEvent>,
    timeout: Duration,
    mut pred: F,
) -> MonitorEvent
where
    F: FnMut(&MonitorEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

pub fn blink_durations(events: &[MonitorEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            MonitorEvent::Blink { duration_ms } => Some(*duration_ms),
            _ => None,
        })
        .collect()
}
