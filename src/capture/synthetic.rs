//! Test-pattern camera for running the pipeline without sensor hardware

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info};

use super::frame::{FrameMetadata, PixelFormat, RawFrame};
use super::jpeg;
use super::source::FrameSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

/// Buffer accounting of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStats {
    pub acquired: u64,
    pub released: u64,
}

impl SourceStats {
    pub fn outstanding(&self) -> u64 {
        self.acquired - self.released
    }
}

/// Camera that renders a moving gradient in the configured pixel format
pub struct SyntheticCamera {
    config: CaptureConfig,
    /// Frames handed out so far
    sequence: AtomicU64,
    released: AtomicU64,
    fault_after: Option<u64>,
}

impl SyntheticCamera {
    pub fn new(config: CaptureConfig) -> Self {
        let (width, height) = config.frame_size.dimensions();
        info!(
            "Synthetic camera: {}x{} {}",
            width,
            height,
            config.format.name()
        );
        Self {
            config,
            sequence: AtomicU64::new(0),
            released: AtomicU64::new(0),
            fault_after: None,
        }
    }

    /// Simulate a sensor that stops delivering after `frames` frames.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fault_after = Some(frames);
        self
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            acquired: self.sequence.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
        }
    }

    fn render(&self, sequence: u64, format: PixelFormat) -> Vec<u8> {
        let (width, height) = self.config.frame_size.dimensions();
        let shift = (sequence * 8) as u32;
        let bpp = format.bytes_per_pixel().unwrap_or(3);
        let mut buf = Vec::with_capacity(width as usize * height as usize * bpp);

        for y in 0..height {
            for x in 0..width {
                let r = (x.wrapping_add(shift) & 0xff) as u8;
                let g = (y.wrapping_add(shift / 2) & 0xff) as u8;
                let b = (shift & 0xff) as u8;
                match format {
                    PixelFormat::Rgb888 | PixelFormat::Jpeg => buf.extend_from_slice(&[r, g, b]),
                    PixelFormat::Grayscale => {
                        buf.push(((r as u16 * 77 + g as u16 * 150 + b as u16 * 29) >> 8) as u8)
                    }
                    PixelFormat::Rgb565 => {
                        let v = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
                        buf.extend_from_slice(&v.to_be_bytes());
                    }
                    PixelFormat::Yuv422 => {
                        // luma per pixel, chroma shared by the pair
                        let luma = 16 + ((r as u16 + g as u16) * 219 / 510) as u8;
                        let chroma = if x % 2 == 0 { 128 } else { b.wrapping_add(64) };
                        buf.extend_from_slice(&[luma, chroma]);
                    }
                }
            }
        }
        buf
    }
}

impl SyntheticCamera {
    fn capture(&self, sequence: u64) -> Result<RawFrame, CaptureError> {
        let timestamp = Instant::now();
        if self.fault_after.is_some_and(|frames| sequence > frames) {
            return Err(CaptureError::Acquire("sensor stopped responding".into()));
        }
        let (width, height) = self.config.frame_size.dimensions();

        let data = match self.config.format {
            PixelFormat::Jpeg => {
                let raw = RawFrame {
                    data: Bytes::from(self.render(sequence, PixelFormat::Rgb888)),
                    meta: FrameMetadata {
                        sequence,
                        width,
                        height,
                        format: PixelFormat::Rgb888,
                    },
                    timestamp,
                };
                jpeg::encode(&raw, self.config.jpeg_quality)
                    .map_err(|e| CaptureError::Acquire(e.to_string()))?
            }
            format => self.render(sequence, format),
        };

        debug!("Synthetic frame {} ({} bytes)", sequence, data.len());

        Ok(RawFrame {
            data: Bytes::from(data),
            meta: FrameMetadata {
                sequence,
                width,
                height,
                format: self.config.format,
            },
            timestamp,
        })
    }
}

impl FrameSource for SyntheticCamera {
    fn acquire(&self) -> Result<RawFrame, CaptureError> {
        let sequence = self.sequence.load(Ordering::Acquire) + 1;
        let frame = self.capture(sequence)?;
        self.sequence.fetch_add(1, Ordering::AcqRel);
        Ok(frame)
    }

    fn release(&self, _frame: RawFrame) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        self.config.frame_size.dimensions()
    }
}
