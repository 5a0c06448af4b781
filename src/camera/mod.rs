// Camera pipeline
//
// Provides:
// - Raw frame sources (stream/FIFO, spawned command, test pattern)
// - Single-slot handoff between the capture and processing threads
// - Orientation fix + JPEG encoding
// - The shared "latest frame" slot read by request handlers

mod encode;
mod handoff;
mod pipeline;
mod slot;
pub mod source;

use std::time::Instant;

pub use encode::FrameEncoder;
pub use handoff::Handoff;
pub use pipeline::CameraPipeline;
pub use slot::FrameSlot;
pub use source::{CommandSource, FrameSource, PollReader, StreamSource, TestPattern};

/// Bytes per pixel of raw frames (packed RGB24)
pub const BYTES_PER_PIXEL: usize = 3;

/// Error types for frame capture and encoding
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera stream ended")]
    EndOfStream,

    #[error("Frame buffer holds {len} bytes, {width}x{height} needs {expected}")]
    BadDimensions {
        width: u32,
        height: u32,
        len: usize,
        expected: usize,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Fixed geometric correction applied before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Orientation {
    None,
    FlipHorizontal,
    FlipVertical,
    /// Camera mounted upside down (flip both axes)
    #[default]
    Rotate180,
}

/// Camera settings fixed at startup
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    /// Target capture rate in frames per second
    pub frame_rate: u32,
    /// JPEG quality, 1 (small) to 100 (best)
    pub jpeg_quality: u8,
    pub orientation: Orientation,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 240,
            height: 192,
            frame_rate: 30,
            jpeg_quality: 80,
            orientation: Orientation::Rotate180,
        }
    }
}

/// Raw RGB24 pixels straight from the camera
///
/// Owned by exactly one thread at a time; the buffer is recycled between
/// captures instead of reallocated.
#[derive(Debug)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub captured_at: Instant,
}

impl RawFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; Self::expected_len(width, height)],
            captured_at: Instant::now(),
        }
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }
}

/// An encoded, published frame. Immutable once in the slot.
#[derive(Debug)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Increases by one per published frame
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn bytes(&self) -> &[u8] {
        &self.jpeg
    }
}
