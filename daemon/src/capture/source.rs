//! Frame sources
//!
//! The live camera belongs to whoever owns the capture surface. Sessions
//! only read the current frame through [`FrameSource`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::{debug, info};

use super::frame::{Frame, FrameError, BYTES_PER_PIXEL};

/// Anything that can hand out the frame currently on the capture surface
pub trait FrameSource: Send + Sync {
    /// Snapshot the live feed at its current dimensions
    fn current_frame(&self) -> Result<Frame, SourceError>;
}

/// Errors produced by a frame source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("capture surface is not available")]
    Unavailable,

    #[error("capture surface produced an invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),
}

/// Synthetic source drawing a diagonal gradient that shifts on every frame
///
/// Stands in for a webcam when the daemon runs without one.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    available: AtomicBool,
    frames_served: AtomicU32,
}

impl TestPatternSource {
    /// Create a new test pattern source of the given resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            available: AtomicBool::new(true),
            frames_served: AtomicU32::new(0),
        }
    }

    /// Simulate the camera being revoked or restored
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        info!(available, "test pattern availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of frames handed out so far
    pub fn frames_served(&self) -> u32 {
        self.frames_served.load(Ordering::SeqCst)
    }
}

impl FrameSource for TestPatternSource {
    fn current_frame(&self) -> Result<Frame, SourceError> {
        if !self.is_available() {
            return Err(SourceError::Unavailable);
        }

        let tick = self.frames_served.fetch_add(1, Ordering::SeqCst);
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = Vec::with_capacity(w * h * BYTES_PER_PIXEL);

        for y in 0..h {
            for x in 0..w {
                let r = ((x * 255) / w.max(1)) as u8;
                let g = ((y * 255) / h.max(1)) as u8;
                let b = ((x + y) as u32).wrapping_add(tick.wrapping_mul(16)) as u8;
                pixels.extend_from_slice(&[r, g, b, 255]);
            }
        }

        debug!(tick, width = self.width, height = self.height, "test pattern frame");
        Ok(Frame::new(self.width, self.height, pixels)?)
    }
}
