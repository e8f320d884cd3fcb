//! Stage threads of one recording

use std::io::{Read, Seek, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::avi::{AviMuxer, Truncate};
use crate::capture::FrameSource;
use crate::error::{LapseError, Result};
use crate::pipeline::{
    frame_queue, AcquisitionExit, AcquisitionStage, FrameProducer, MuxStage, QueueProbe,
    SessionStats, TickListener,
};
use crate::utils::spawn_stage;
use crate::PipelineConfig;

/// A recording in progress: both stage threads and the files they write.
pub(super) struct Session<F> {
    pub avi_path: PathBuf,
    pub index_path: PathBuf,
    producer: Option<FrameProducer>,
    probe: QueueProbe,
    acquisition: Option<JoinHandle<AcquisitionExit>>,
    acquisition_stop: Arc<AtomicBool>,
    mux: JoinHandle<AviMuxer<F, F>>,
    mux_stop: Arc<AtomicBool>,
}

impl<F> Session<F>
where
    F: Read + Write + Seek + Truncate + Send + 'static,
{
    /// Spawn the encode/mux stage around `muxer`.
    pub fn launch(
        avi_path: PathBuf,
        index_path: PathBuf,
        muxer: AviMuxer<F, F>,
        stats: Arc<SessionStats>,
        pipeline: &PipelineConfig,
        jpeg_quality: u8,
    ) -> Result<Self> {
        let (producer, consumer, probe) = frame_queue(pipeline.queue_capacity);
        let mux_stop = Arc::new(AtomicBool::new(false));
        let stage = MuxStage::new(
            consumer,
            muxer,
            stats,
            Arc::clone(&mux_stop),
            jpeg_quality,
            pipeline.safety_timeout(),
        );
        let mux = spawn_stage("lapse-mux", pipeline.mux_core, move || stage.run())
            .map_err(|source| LapseError::Spawn { name: "encode/mux", source })?;

        Ok(Self {
            avi_path,
            index_path,
            producer: Some(producer),
            probe,
            acquisition: None,
            acquisition_stop: Arc::new(AtomicBool::new(false)),
            mux,
            mux_stop,
        })
    }

    /// Spawn the acquisition stage feeding the queue.
    ///
    /// On failure the producer is gone and the session only needs winding down.
    pub fn start_acquisition(
        &mut self,
        source: Arc<dyn FrameSource>,
        ticks: TickListener,
        stats: Arc<SessionStats>,
        pipeline: &PipelineConfig,
    ) -> Result<()> {
        let Some(producer) = self.producer.take() else {
            return Ok(());
        };
        let stage = AcquisitionStage::new(
            source,
            ticks,
            producer,
            stats,
            Arc::clone(&self.acquisition_stop),
            pipeline.safety_timeout(),
        );
        let handle = spawn_stage("lapse-acquire", pipeline.acquisition_core, move || stage.run())
            .map_err(|source| LapseError::Spawn { name: "acquisition", source })?;
        self.acquisition = Some(handle);
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.probe.len()
    }

    /// Stop acquisition, drain the queue and take the muxer back.
    ///
    /// The trigger must already be stopped.
    pub async fn wind_down(mut self, drain_poll: Duration) -> Result<AviMuxer<F, F>> {
        self.acquisition_stop.store(true, Ordering::Release);
        self.producer = None;
        if let Some(handle) = self.acquisition.take() {
            let exit = join_stage(handle, "acquisition").await?;
            debug!("Acquisition stage joined: {:?}", exit);
        }

        while !self.probe.is_empty() {
            if self.mux.is_finished() {
                warn!(
                    "Encode/mux stage gone with {} frames queued",
                    self.probe.len()
                );
                break;
            }
            debug!("Draining queue, {} frames left", self.probe.len());
            tokio::time::sleep(drain_poll).await;
        }

        self.mux_stop.store(true, Ordering::Release);
        let muxer = join_stage(self.mux, "encode/mux").await?;
        info!("Stages stopped after {} frames", muxer.frames());
        Ok(muxer)
    }
}

async fn join_stage<T: Send + 'static>(handle: JoinHandle<T>, name: &'static str) -> Result<T> {
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(value)) => Ok(value),
        _ => Err(LapseError::StagePanicked(name)),
    }
}
