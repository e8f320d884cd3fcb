//! Camera abstraction consumed by the timelapse pipeline

use super::frame::RawFrame;
use super::jpeg;
use crate::error::CaptureError;

/// A camera driver handing out frame buffers.
///
/// `acquire` and `release` are called from different pipeline threads, so
/// implementations keep their bookkeeping behind interior mutability.
pub trait FrameSource: Send + Sync {
    /// Grab the next frame. An error means the camera is wedged.
    fn acquire(&self) -> Result<RawFrame, CaptureError>;

    /// Hand a frame buffer back to the driver.
    fn release(&self, frame: RawFrame);

    /// Dimensions of the frames the sensor currently produces.
    fn frame_dimensions(&self) -> (u32, u32);

    /// Compress a non-JPEG frame.
    fn to_jpeg(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, CaptureError> {
        jpeg::encode(frame, quality)
    }
}
