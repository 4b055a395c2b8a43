use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinError;

use super::PipelineCounters;
use crate::camera::{Camera, Frame, FrameSource, RawImage};
use crate::config::MonitorConfig;
use crate::constants::{CAMERA_RETRY_INITIAL, CAMERA_RETRY_MAX};
use crate::error::CameraError;
use crate::events::{EventSink, MonitorEvent};
use crate::queue::BoundedFrameQueue;

pub struct CaptureContext<C> {
    pub camera: C,
    pub queue: Arc<BoundedFrameQueue>,
    pub config: watch::Receiver<Arc<MonitorConfig>>,
    pub events: EventSink,
    pub counters: Arc<PipelineCounters>,
    pub shutdown_rx: broadcast::Receiver<()>,
}

enum SessionEnd {
    Shutdown,
    EndOfStream,
    Failed(CameraError),
    Lost,
}

/// Producer loop: open, read, timestamp, push, throttle. Camera failures are
/// retried with backoff; the loop only ends on shutdown or end of stream.
/// Device and resolution changes take effect on the next (re)open.
pub async fn run_capture<C: Camera>(ctx: CaptureContext<C>) {
    let CaptureContext {
        camera,
        queue,
        config,
        events,
        counters,
        mut shutdown_rx,
    } = ctx;

    let mut camera = Some(camera);
    let mut backoff = CAMERA_RETRY_INITIAL;
    let mut sequence = 0u64;
    let mut session = 0u64;

    while let Some(mut cam) = camera.take() {
        if shutdown_requested(&mut shutdown_rx) {
            break;
        }

        let snapshot = config.borrow().clone();
        let (device_id, resolution) = (snapshot.camera_device_id, snapshot.resolution);
        let opened = tokio::task::spawn_blocking(move || {
            let result = cam.open(device_id, resolution);
            (cam, result)
        })
        .await;
        let (cam, result) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "Camera open task panicked");
                break;
            }
        };
        camera = Some(cam);

        let source = match result {
            Ok(source) => source,
            Err(err) => {
                let delay = if err.is_transient() {
                    backoff
                } else {
                    CAMERA_RETRY_MAX
                };
                report_failure(&events, &counters, &err, delay);
                backoff = (backoff * 2).min(CAMERA_RETRY_MAX);
                if wait_or_shutdown(delay, &mut shutdown_rx).await {
                    break;
                }
                continue;
            }
        };

        backoff = CAMERA_RETRY_INITIAL;
        session += 1;
        // the active status is reported by analysis with the first frame
        tracing::info!(device_id, ?resolution, session, "Camera opened");

        let end = read_frames(
            source,
            &queue,
            &config,
            &counters,
            &mut shutdown_rx,
            session,
            &mut sequence,
        )
        .await;
        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::EndOfStream => {
                tracing::info!(frames = sequence, "Camera stream ended");
                break;
            }
            SessionEnd::Lost => break,
            SessionEnd::Failed(err) => {
                report_failure(&events, &counters, &err, backoff);
                let delay = backoff;
                backoff = (backoff * 2).min(CAMERA_RETRY_MAX);
                if wait_or_shutdown(delay, &mut shutdown_rx).await {
                    break;
                }
            }
        }
    }

    queue.close();
    events.publish(MonitorEvent::CameraStatus {
        active: false,
        face_detected: false,
    });
    tracing::info!("Capture stopped");
}

async fn read_frames<S: FrameSource>(
    mut source: S,
    queue: &BoundedFrameQueue,
    config: &watch::Receiver<Arc<MonitorConfig>>,
    counters: &PipelineCounters,
    shutdown_rx: &mut broadcast::Receiver<()>,
    session: u64,
    sequence: &mut u64,
) -> SessionEnd {
    let end = loop {
        if shutdown_requested(shutdown_rx) {
            break SessionEnd::Shutdown;
        }

        let started = Instant::now();
        let (result, captured_at) = match read_stamped(source).await {
            Ok((returned, result, captured_at)) => {
                source = returned;
                (result, captured_at)
            }
            Err(e) => {
                tracing::error!(error = %e, "Camera read task panicked");
                return SessionEnd::Lost;
            }
        };

        match result {
            Ok(Some(image)) => {
                let frame = Frame {
                    captured_at,
                    sequence: *sequence,
                    session,
                    image,
                };
                *sequence += 1;
                counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                if !queue.push(frame) {
                    break SessionEnd::Shutdown;
                }
            }
            Ok(None) => break SessionEnd::EndOfStream,
            Err(err) => break SessionEnd::Failed(err),
        }

        let interval = config.borrow().frame_interval();
        if wait_or_shutdown(interval.saturating_sub(started.elapsed()), shutdown_rx).await {
            break SessionEnd::Shutdown;
        }
    };

    source.close();
    end
}

/// One blocking read. The timestamp is taken on the reading thread, so time
/// spent waiting for this task to be polled again is not part of it.
async fn read_stamped<S: FrameSource>(
    mut source: S,
) -> Result<(S, Result<Option<RawImage>, CameraError>, Instant), JoinError> {
    tokio::task::spawn_blocking(move || {
        let result = source.read();
        let captured_at = Instant::now();
        (source, result, captured_at)
    })
    .await
}

fn report_failure(events: &EventSink, counters: &PipelineCounters, err: &CameraError, retry_in: Duration) {
    counters.camera_errors.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(error = %err, retry_ms = retry_in.as_millis() as u64, "Camera unavailable, retrying");
    events.publish(MonitorEvent::CameraError {
        message: err.to_string(),
    });
    events.publish(MonitorEvent::CameraStatus {
        active: false,
        face_detected: false,
    });
}

/// A dropped sender counts as shutdown.
fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty))
}

async fn wait_or_shutdown(delay: Duration, rx: &mut broadcast::Receiver<()>) -> bool {
    if delay.is_zero() {
        return shutdown_requested(rx);
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = rx.recv() => true,
    }
}
