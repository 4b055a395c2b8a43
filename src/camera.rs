//! Seams to the camera driver and the face-landmark model.
//!
//! Both are blocking collaborators; the pipeline calls them through
//! `spawn_blocking` so they never stall the runtime.

use std::time::Instant;

use eye_metrics::LandmarkSet;

use crate::config::Resolution;
use crate::error::CameraError;

/// Opaque pixel buffer, never inspected by the analysis core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One captured frame. `captured_at` is taken on the reading thread as soon
/// as the driver hands the image over, and is the only clock the blink timing
/// uses. `session` counts successful camera opens, starting at 1.
#[derive(Debug, Clone)]
pub struct Frame {
    pub captured_at: Instant,
    pub sequence: u64,
    pub session: u64,
    pub image: RawImage,
}

pub trait Camera: Send + 'static {
    type Source: FrameSource;

    fn open(&mut self, device_id: u32, resolution: Resolution) -> Result<Self::Source, CameraError>;
}

pub trait FrameSource: Send + 'static {
    /// `Ok(None)` marks the end of the stream.
    fn read(&mut self) -> Result<Option<RawImage>, CameraError>;

    fn close(&mut self);
}

/// Returns the largest face's eye landmarks, or None when no face is found.
pub trait LandmarkExtractor: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> Option<LandmarkSet>;
}
