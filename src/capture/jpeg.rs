//! JPEG conversion for frames that do not arrive compressed

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use jpeg_decoder::Decoder;

use super::frame::{PixelFormat, RawFrame};
use crate::error::CaptureError;

/// Default quality used when re-encoding raw frames.
pub const DEFAULT_QUALITY: u8 = 80;

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xff, 0xd8];

pub fn is_jpeg(data: &[u8]) -> bool {
    data.starts_with(&SOI)
}

/// Compress `frame` to a freshly allocated JPEG buffer.
pub fn encode(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let width = frame.meta.width;
    let height = frame.meta.height;
    let format = frame.meta.format;

    if format.is_jpeg() {
        return Ok(frame.data.to_vec());
    }

    let pixels = width as usize * height as usize;
    let needed = pixels * format.bytes_per_pixel().unwrap_or(0);
    if frame.data.len() < needed || pixels == 0 {
        return Err(CaptureError::ShortBuffer {
            width,
            height,
            format: format.name(),
            actual: frame.data.len(),
        });
    }
    let data = &frame.data[..needed];

    let mut out = Vec::with_capacity(needed / 8);
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        match format {
            PixelFormat::Grayscale => encoder.encode(data, width, height, ExtendedColorType::L8)?,
            PixelFormat::Rgb888 => encoder.encode(data, width, height, ExtendedColorType::Rgb8)?,
            PixelFormat::Rgb565 => {
                encoder.encode(&rgb565_to_rgb(data), width, height, ExtendedColorType::Rgb8)?
            }
            PixelFormat::Yuv422 => {
                encoder.encode(&yuyv_to_rgb(data), width, height, ExtendedColorType::Rgb8)?
            }
            PixelFormat::Jpeg => unreachable!("handled above"),
        }
    }
    Ok(out)
}

/// Read the dimensions out of a JPEG header without decoding the image.
pub fn probe(data: &[u8]) -> Result<(u16, u16), CaptureError> {
    let mut decoder = Decoder::new(data);
    decoder.read_info()?;
    let info = decoder.info().ok_or(jpeg_decoder::Error::Format(
        "missing frame header".to_string(),
    ))?;
    Ok((info.width, info.height))
}

fn rgb565_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for px in data.chunks_exact(2) {
        let v = u16::from_be_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    // BT.601, integer approximation
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for px in data.chunks_exact(4) {
        let (y0, u, y1, v) = (px[0], px[1], px[2], px[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}
