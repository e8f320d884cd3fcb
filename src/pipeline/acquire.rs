//! Acquisition stage: one frame per trigger tick into the bounded queue

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::queue::FrameProducer;
use super::signal::{TickListener, TickWait};
use super::stats::SessionStats;
use crate::capture::{FrameLease, FrameSource};
use crate::error::{CaptureError, LapseError};

/// Why the acquisition loop returned
#[derive(Debug)]
pub enum AcquisitionExit {
    /// Stop requested by the orchestrator
    Stopped,
    /// The trigger went away
    TriggerClosed,
    /// The camera failed to deliver a frame
    CameraFault(CaptureError),
}

pub struct AcquisitionStage {
    source: Arc<dyn FrameSource>,
    ticks: TickListener,
    queue: FrameProducer,
    stats: Arc<SessionStats>,
    stop: Arc<AtomicBool>,
    safety_timeout: Duration,
}

impl AcquisitionStage {
    pub fn new(
        source: Arc<dyn FrameSource>,
        ticks: TickListener,
        queue: FrameProducer,
        stats: Arc<SessionStats>,
        stop: Arc<AtomicBool>,
        safety_timeout: Duration,
    ) -> Self {
        Self {
            source,
            ticks,
            queue,
            stats,
            stop,
            safety_timeout,
        }
    }

    pub fn run(self) -> AcquisitionExit {
        info!("Acquisition stage running");
        let exit = loop {
            if self.stop.load(Ordering::Acquire) {
                break AcquisitionExit::Stopped;
            }
            match self.ticks.wait(self.safety_timeout) {
                TickWait::Tick => {}
                TickWait::TimedOut => {
                    debug!("No trigger tick within {:?}", self.safety_timeout);
                    continue;
                }
                TickWait::Closed => break AcquisitionExit::TriggerClosed,
            }
            // A tick that raced with the stop request does not capture
            if self.stop.load(Ordering::Acquire) {
                break AcquisitionExit::Stopped;
            }

            match self.capture_one() {
                Ok(()) => {}
                Err(LapseError::QueueBackpressure) => {
                    warn!("Frame queue is full, frame dropped");
                    self.stats.frame_dropped();
                }
                Err(LapseError::Acquisition(err)) => {
                    error!("Camera capture failed, acquisition stopped: {}", err);
                    self.stats.camera_fault();
                    break AcquisitionExit::CameraFault(err);
                }
                Err(err) => warn!("Acquisition error: {}", err),
            }
        };
        info!("Acquisition stage exited: {:?}", exit);
        exit
    }

    /// Take one picture and offer it to the queue.
    pub fn capture_one(&self) -> Result<(), LapseError> {
        let frame = FrameLease::acquire(&self.source).map_err(LapseError::Acquisition)?;
        let sequence = frame.meta.sequence;

        match self.queue.push(frame, self.safety_timeout / 2) {
            Ok(()) => {
                self.stats.frame_taken();
                debug!("Frame {} queued", sequence);
                Ok(())
            }
            Err(frame) => {
                // Hand the buffer straight back to the camera
                drop(frame);
                Err(LapseError::QueueBackpressure)
            }
        }
    }
}
