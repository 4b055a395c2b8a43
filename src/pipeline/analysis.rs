use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tokio::sync::{mpsc, watch};

use super::{Command, MonitorCore};
use crate::camera::LandmarkExtractor;
use crate::config::MonitorConfig;
use crate::events::EventSink;
use crate::queue::BoundedFrameQueue;
use crate::statistics::StatisticsSnapshot;

pub struct AnalysisContext<E> {
    pub extractor: E,
    pub core: MonitorCore,
    pub queue: Arc<BoundedFrameQueue>,
    pub config_rx: watch::Receiver<Arc<MonitorConfig>>,
    /// Written back when calibration adopts a new threshold.
    pub config_tx: Arc<watch::Sender<Arc<MonitorConfig>>>,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub events: EventSink,
    pub snapshot_tx: watch::Sender<StatisticsSnapshot>,
}

/// Consumer loop. Blocks only on the queue and on landmark extraction;
/// exits when the queue reports end of stream.
pub async fn run_analysis<E: LandmarkExtractor>(ctx: AnalysisContext<E>) {
    let AnalysisContext {
        extractor,
        mut core,
        queue,
        mut config_rx,
        config_tx,
        mut commands,
        events,
        snapshot_tx,
    } = ctx;

    let mut extractor = Some(extractor);
    let mut commands_open = true;

    loop {
        tokio::select! {
            biased;

            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    tracing::debug!(?command, "Command received");
                    let produced = core.handle_command(command, Instant::now(), Local::now().naive_local());
                    events.publish_all(produced);
                }
                None => commands_open = false,
            },

            frame = queue.pop() => {
                let Some(frame) = frame else {
                    break;
                };

                if config_rx.has_changed().unwrap_or(false) {
                    let next = config_rx.borrow_and_update().clone();
                    if !Arc::ptr_eq(&next, core.config()) {
                        core.apply_config(next);
                    }
                }

                let Some(mut ex) = extractor.take() else {
                    break;
                };
                let detected = tokio::task::spawn_blocking(move || {
                    let landmarks = ex.detect(&frame);
                    (ex, frame, landmarks)
                })
                .await;
                let (ex, frame, landmarks) = match detected {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(error = %e, "Landmark extraction panicked");
                        break;
                    }
                };
                extractor = Some(ex);

                let before = core.config().clone();
                core.note_camera_session(frame.session);
                let produced = core.tick(frame.captured_at, landmarks.as_ref(), Local::now().time());
                if !Arc::ptr_eq(&before, core.config()) {
                    publish_adopted_config(&config_tx, &before, core.config());
                }

                snapshot_tx.send_replace(core.snapshot(frame.captured_at));
                events.publish_all(produced);
            }
        }
    }

    tracing::info!("Analysis stopped");
}

/// Publishes a threshold adopted by calibration, unless the shared config moved
/// on since `before` was read. A concurrent `update_config` wins; the core picks
/// it up from `config_rx` on the next frame. Returns whether it was published.
fn publish_adopted_config(
    config_tx: &watch::Sender<Arc<MonitorConfig>>,
    before: &Arc<MonitorConfig>,
    adopted: &Arc<MonitorConfig>,
) -> bool {
    let published = config_tx.send_if_modified(|current| {
        if Arc::ptr_eq(current, before) {
            *current = adopted.clone();
            true
        } else {
            false
        }
    });
    if !published {
        tracing::info!("Calibrated threshold superseded by a newer configuration");
    }
    published
}
