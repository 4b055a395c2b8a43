//! Synthetic camera and landmark sources.
//!
//! `Scripted*` replay a fixed EAR sequence (tests and reproducible runs);
//! `Demo*` produce a random but plausible blink pattern so the binary runs
//! without a real device.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eye_metrics::{EyeLandmarks, LandmarkSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::camera::{Camera, Frame, FrameSource, LandmarkExtractor, RawImage};
use crate::config::Resolution;
use crate::error::CameraError;

fn blank_image(resolution: Resolution) -> RawImage {
    let (width, height) = resolution.dimensions();
    RawImage {
        width,
        height,
        data: Vec::new(),
    }
}

/// Camera that fails its first `failing_opens` opens, then serves `frames`
/// blank frames and ends the stream. With `disconnect_after` the first opened
/// source errors after that many frames, and the reopened one runs normally.
#[derive(Debug, Clone)]
pub struct ScriptedCamera {
    frames: usize,
    failing_opens: u32,
    open_error: CameraError,
    disconnect_after: Option<usize>,
    opens: Arc<AtomicU32>,
}

impl ScriptedCamera {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            failing_opens: 0,
            open_error: CameraError::DeviceBusy,
            disconnect_after: None,
            opens: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn disconnect_after(mut self, frames: usize) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    pub fn failing_first(mut self, failing_opens: u32, error: CameraError) -> Self {
        self.failing_opens = failing_opens;
        self.open_error = error;
        self
    }

    /// Shared counter of open attempts, readable after the camera is moved.
    pub fn open_attempts(&self) -> Arc<AtomicU32> {
        self.opens.clone()
    }
}

impl Camera for ScriptedCamera {
    type Source = ScriptedSource;

    fn open(&mut self, _device_id: u32, resolution: Resolution) -> Result<ScriptedSource, CameraError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_opens {
            return Err(self.open_error.clone());
        }
        Ok(ScriptedSource {
            remaining: self.frames,
            fail_after: self.disconnect_after.take(),
            resolution,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedSource {
    remaining: usize,
    fail_after: Option<usize>,
    resolution: Resolution,
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<Option<RawImage>, CameraError> {
        match self.fail_after {
            Some(0) => return Err(CameraError::Io("scripted disconnect".to_string())),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(blank_image(self.resolution)))
    }

    fn close(&mut self) {
        self.remaining = 0;
    }
}

/// Maps frame sequence numbers to EAR values; `None` entries (and frames past
/// the end of the script) have no face.
#[derive(Debug, Clone)]
pub struct ScriptedExtractor {
    ears: Vec<Option<f64>>,
}

impl ScriptedExtractor {
    pub fn new(ears: Vec<Option<f64>>) -> Self {
        Self { ears }
    }
}

impl LandmarkExtractor for ScriptedExtractor {
    fn detect(&mut self, frame: &Frame) -> Option<LandmarkSet> {
        let ear = self.ears.get(frame.sequence as usize).copied().flatten()?;
        Some(LandmarkSet::binocular(EyeLandmarks::synthetic(ear)))
    }
}

/// Endless blank-frame camera for the demo binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoCamera;

#[derive(Debug)]
pub struct DemoSource {
    resolution: Resolution,
    open: bool,
}

impl Camera for DemoCamera {
    type Source = DemoSource;

    fn open(&mut self, device_id: u32, resolution: Resolution) -> Result<DemoSource, CameraError> {
        tracing::info!(device_id, "Opening demo camera");
        Ok(DemoSource {
            resolution,
            open: true,
        })
    }
}

impl FrameSource for DemoSource {
    fn read(&mut self) -> Result<Option<RawImage>, CameraError> {
        if !self.open {
            return Err(CameraError::Io("demo source closed".to_string()));
        }
        Ok(Some(blank_image(self.resolution)))
    }

    fn close(&mut self) {
        self.open = false;
    }
}

const DEMO_OPEN_EAR: f64 = 0.29;
const DEMO_CLOSED_EAR: f64 = 0.12;
/// Chance that a frame starts a blink (about 12 per minute at 15 fps).
const DEMO_BLINK_PROBABILITY: f64 = 0.0135;
const DEMO_FACE_LOSS_PROBABILITY: f64 = 0.002;

/// Random blink pattern: open eyes with jitter, short closures, and the
/// occasional stretch with no face.
#[derive(Debug)]
pub struct DemoExtractor {
    rng: StdRng,
    closed_frames_left: u32,
    absent_frames_left: u32,
}

impl DemoExtractor {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            closed_frames_left: 0,
            absent_frames_left: 0,
        }
    }
}

impl Default for DemoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkExtractor for DemoExtractor {
    fn detect(&mut self, _frame: &Frame) -> Option<LandmarkSet> {
        if self.absent_frames_left > 0 {
            self.absent_frames_left -= 1;
            return None;
        }
        if self.rng.gen_bool(DEMO_FACE_LOSS_PROBABILITY) {
            self.absent_frames_left = self.rng.gen_range(10..45);
            return None;
        }

        if self.closed_frames_left == 0 && self.rng.gen_bool(DEMO_BLINK_PROBABILITY) {
            self.closed_frames_left = self.rng.gen_range(2..5);
        }
        let ear = if self.closed_frames_left > 0 {
            self.closed_frames_left -= 1;
            DEMO_CLOSED_EAR + self.rng.gen_range(-0.02..0.02)
        } else {
            DEMO_OPEN_EAR + self.rng.gen_range(-0.03..0.03)
        };
        Some(LandmarkSet::binocular(EyeLandmarks::synthetic(ear)))
    }
}
