//! Encode/mux stage: JPEG frames from the queue into the AVI container

use std::borrow::Cow;
use std::io::{Read, Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::queue::{Dequeue, FrameConsumer};
use super::stats::SessionStats;
use crate::avi::{AviMuxer, Truncate};
use crate::capture::FrameLease;
use crate::error::LapseError;

pub struct MuxStage<F, I> {
    queue: FrameConsumer,
    muxer: AviMuxer<F, I>,
    stats: Arc<SessionStats>,
    stop: Arc<AtomicBool>,
    jpeg_quality: u8,
    safety_timeout: Duration,
}

impl<F, I> MuxStage<F, I>
where
    F: Write + Seek + Truncate,
    I: Read + Write + Seek,
{
    pub fn new(
        queue: FrameConsumer,
        muxer: AviMuxer<F, I>,
        stats: Arc<SessionStats>,
        stop: Arc<AtomicBool>,
        jpeg_quality: u8,
        safety_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            muxer,
            stats,
            stop,
            jpeg_quality,
            safety_timeout,
        }
    }

    /// Drain the queue until stopped or the producer is gone, then hand the
    /// muxer back for finalizing.
    pub fn run(mut self) -> AviMuxer<F, I> {
        info!("Encode/mux stage running");
        loop {
            match self.queue.pop(self.safety_timeout) {
                Dequeue::Frame(frame) => match self.process(frame) {
                    Ok(bytes) => debug!("Frame written ({} bytes)", bytes),
                    Err(LapseError::Encode(err)) => {
                        warn!("JPEG compression failed, frame skipped: {}", err);
                        self.stats.encode_failed();
                    }
                    Err(err) => {
                        error!("Failed to write frame: {}", err);
                        self.stats.write_failed();
                    }
                },
                Dequeue::Empty => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                Dequeue::Disconnected => break,
            }
        }
        info!(
            "Encode/mux stage exited after {} frames",
            self.muxer.frames()
        );
        self.muxer
    }

    /// Write one frame. The lease is released when this returns, whatever the outcome.
    pub fn process(&mut self, frame: FrameLease) -> Result<usize, LapseError> {
        let jpeg: Cow<'_, [u8]> = if frame.meta.format.is_jpeg() {
            Cow::Borrowed(&frame.data[..])
        } else {
            Cow::Owned(
                frame
                    .source()
                    .to_jpeg(&frame, self.jpeg_quality)
                    .map_err(LapseError::Encode)?,
            )
        };

        self.stats.observe_frame_size(jpeg.len());
        let entry = self.muxer.append_frame(&jpeg)?;
        self.stats.frame_written(entry.cursor);
        Ok(jpeg.len())
    }

    pub fn muxer(&self) -> &AviMuxer<F, I> {
        &self.muxer
    }
}
