//! Captured frame handle
//!
//! Frames are RGBA8 buffers shared behind an `Arc`, so handing the same
//! frame to the session, the store and event consumers never copies pixels.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Bytes per RGBA8 pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// One captured image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Create a frame, checking that the buffer matches the dimensions
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 pixel data, row-major
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA value at (x, y)
    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Horizontally mirrored copy, as seen in a selfie preview
    pub fn mirrored(&self) -> Frame {
        let row_len = self.width as usize * BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(self.pixels.len());

        if row_len > 0 {
            for row in self.pixels.chunks_exact(row_len) {
                for px in row.chunks_exact(BYTES_PER_PIXEL).rev() {
                    out.extend_from_slice(px);
                }
            }
        }

        Frame {
            width: self.width,
            height: self.height,
            pixels: out.into(),
        }
    }

    /// Apply a per-pixel transform, producing a new frame
    pub fn map_pixels(&self, mut f: impl FnMut([u8; 4]) -> [u8; 4]) -> Frame {
        let mut out = Vec::with_capacity(self.pixels.len());
        for px in self.pixels.chunks_exact(BYTES_PER_PIXEL) {
            out.extend_from_slice(&f([px[0], px[1], px[2], px[3]]));
        }

        Frame {
            width: self.width,
            height: self.height,
            pixels: out.into(),
        }
    }

    /// Serializable summary of this frame at position `index`
    pub fn info(&self, index: usize) -> FrameInfo {
        FrameInfo {
            index,
            width: self.width,
            height: self.height,
        }
    }
}

/// Frame metadata exposed over events and IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Position in capture order, starting at 0
    pub index: usize,
    pub width: u32,
    pub height: u32,
}

/// Errors building a frame
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("pixel buffer for {width}x{height} frame must be {expected} bytes, got {actual}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}
