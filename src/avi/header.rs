//! AVI header records (`avih`, `strh`, `strf`) and their exact byte layout.

use super::riff::ids;
use crate::error::{AviError, AviResult};

/// `avih` flag: the file carries an `idx1` chunk.
pub const AVIF_HASINDEX: u32 = 0x0000_0010;

/// Bits per pixel announced for decoded MJPEG frames.
const BIT_COUNT: u16 = 24;

struct Fields {
    buf: Vec<u8>,
}

impl Fields {
    fn with_capacity(size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(size),
        }
    }

    fn u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn u16(mut self, value: u16) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn expect_len(bytes: &[u8], size: usize, what: &str) -> AviResult<()> {
    if bytes.len() < size {
        return Err(AviError::Malformed {
            offset: 0,
            reason: format!("{} record is {} bytes, expected {}", what, bytes.len(), size),
        });
    }
    Ok(())
}

/// Main AVI header (`avih`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MainHeader {
    pub micro_sec_per_frame: u32,
    pub max_bytes_per_sec: u32,
    pub padding_granularity: u32,
    pub flags: u32,
    pub total_frames: u32,
    pub initial_frames: u32,
    pub streams: u32,
    pub suggested_buffer_size: u32,
    pub width: u32,
    pub height: u32,
}

impl MainHeader {
    pub const SIZE: usize = 56;

    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            micro_sec_per_frame: 1_000_000 / fps.max(1),
            flags: AVIF_HASINDEX,
            streams: 1,
            width,
            height,
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Fields::with_capacity(Self::SIZE)
            .u32(self.micro_sec_per_frame)
            .u32(self.max_bytes_per_sec)
            .u32(self.padding_granularity)
            .u32(self.flags)
            .u32(self.total_frames)
            .u32(self.initial_frames)
            .u32(self.streams)
            .u32(self.suggested_buffer_size)
            .u32(self.width)
            .u32(self.height)
            // reserved[4]
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(0)
            .finish()
    }

    pub fn parse(bytes: &[u8]) -> AviResult<Self> {
        expect_len(bytes, Self::SIZE, "avih")?;
        Ok(Self {
            micro_sec_per_frame: le_u32(bytes, 0),
            max_bytes_per_sec: le_u32(bytes, 4),
            padding_granularity: le_u32(bytes, 8),
            flags: le_u32(bytes, 12),
            total_frames: le_u32(bytes, 16),
            initial_frames: le_u32(bytes, 20),
            streams: le_u32(bytes, 24),
            suggested_buffer_size: le_u32(bytes, 28),
            width: le_u32(bytes, 32),
            height: le_u32(bytes, 36),
        })
    }

    pub fn has_index(&self) -> bool {
        self.flags & AVIF_HASINDEX != 0
    }
}

/// Stream header (`strh`) for the single MJPEG video stream.
///
/// The record stops after `sample_size`; the optional `rcFrame` rectangle is
/// not written, which keeps `strf` at offset 164 and `movi` data at 216.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub fcc_type: u32,
    pub fcc_handler: u32,
    pub flags: u32,
    pub priority: u16,
    pub language: u16,
    pub initial_frames: u32,
    pub scale: u32,
    pub rate: u32,
    pub start: u32,
    pub length: u32,
    pub suggested_buffer_size: u32,
    pub quality: u32,
    pub sample_size: u32,
}

impl StreamHeader {
    pub const SIZE: usize = 48;

    pub fn new(fps: u32) -> Self {
        Self {
            fcc_type: ids::VIDS.as_u32(),
            fcc_handler: ids::MJPG.as_u32(),
            flags: 0,
            priority: 0,
            language: 0,
            initial_frames: 0,
            scale: 1,
            rate: fps.max(1),
            start: 0,
            length: 0,
            suggested_buffer_size: 0,
            quality: 0,
            sample_size: 0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Fields::with_capacity(Self::SIZE)
            .u32(self.fcc_type)
            .u32(self.fcc_handler)
            .u32(self.flags)
            .u16(self.priority)
            .u16(self.language)
            .u32(self.initial_frames)
            .u32(self.scale)
            .u32(self.rate)
            .u32(self.start)
            .u32(self.length)
            .u32(self.suggested_buffer_size)
            .u32(self.quality)
            .u32(self.sample_size)
            .finish()
    }

    pub fn parse(bytes: &[u8]) -> AviResult<Self> {
        expect_len(bytes, Self::SIZE, "strh")?;
        Ok(Self {
            fcc_type: le_u32(bytes, 0),
            fcc_handler: le_u32(bytes, 4),
            flags: le_u32(bytes, 8),
            priority: le_u16(bytes, 12),
            language: le_u16(bytes, 14),
            initial_frames: le_u32(bytes, 16),
            scale: le_u32(bytes, 20),
            rate: le_u32(bytes, 24),
            start: le_u32(bytes, 28),
            length: le_u32(bytes, 32),
            suggested_buffer_size: le_u32(bytes, 36),
            quality: le_u32(bytes, 40),
            sample_size: le_u32(bytes, 44),
        })
    }

    /// Frames per second as announced by `rate / scale`.
    pub fn fps(&self) -> f64 {
        if self.scale == 0 {
            return 0.0;
        }
        self.rate as f64 / self.scale as f64
    }
}

/// Bitmap-info style stream format (`strf`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub size_image: u32,
}

impl StreamFormat {
    pub const SIZE: usize = 40;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            planes: 1,
            bit_count: BIT_COUNT,
            compression: ids::MJPG.as_u32(),
            size_image: width.saturating_mul(height).saturating_mul(3),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Fields::with_capacity(Self::SIZE)
            .u32(Self::SIZE as u32)
            .u32(self.width)
            .u32(self.height)
            .u16(self.planes)
            .u16(self.bit_count)
            .u32(self.compression)
            .u32(self.size_image)
            // x/y pels per meter, colors used, colors important
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(0)
            .finish()
    }

    pub fn parse(bytes: &[u8]) -> AviResult<Self> {
        expect_len(bytes, Self::SIZE, "strf")?;
        Ok(Self {
            width: le_u32(bytes, 4),
            height: le_u32(bytes, 8),
            planes: le_u16(bytes, 12),
            bit_count: le_u16(bytes, 14),
            compression: le_u32(bytes, 16),
            size_image: le_u32(bytes, 20),
        })
    }
}
