use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use super::source::FrameSource;
use crate::error::CaptureError;

/// One captured image as handed out by a [`FrameSource`].
pub struct RawFrame {
    /// Frame bytes in `meta.format`
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats a camera can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Jpeg,
    /// 16 bit, high byte first
    Rgb565,
    Rgb888,
    /// YUYV ordering
    Yuv422,
    Grayscale,
}

impl PixelFormat {
    pub fn is_jpeg(&self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }

    /// Bytes per pixel of the raw format, `None` for compressed frames.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb565 | PixelFormat::Yuv422 => Some(2),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Grayscale => Some(1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Rgb888 => "rgb888",
            PixelFormat::Yuv422 => "yuv422",
            PixelFormat::Grayscale => "grayscale",
        }
    }
}

/// Exclusive hold on a frame buffer.
///
/// Dropping the lease hands the buffer back to the source it came from, so
/// every path through the pipeline returns each frame exactly once.
pub struct FrameLease {
    frame: Option<RawFrame>,
    source: Arc<dyn FrameSource>,
}

impl FrameLease {
    /// Acquire one frame from `source`.
    pub fn acquire(source: &Arc<dyn FrameSource>) -> Result<Self, CaptureError> {
        let frame = source.acquire()?;
        Ok(Self {
            frame: Some(frame),
            source: Arc::clone(source),
        })
    }

    pub fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }
}

impl Deref for FrameLease {
    type Target = RawFrame;

    fn deref(&self) -> &RawFrame {
        // Only None while dropping
        self.frame.as_ref().expect("lease holds a frame until dropped")
    }
}

impl fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FrameLease").field(&self.frame).finish()
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.source.release(frame);
        }
    }
}
