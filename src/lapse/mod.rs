//! Timelapse controller: Idle/Recording state machine over the pipeline

mod session;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use self::session::Session;
use crate::avi::{AviMuxer, FinalizeReport, MuxerConfig};
use crate::capture::FrameSource;
use crate::error::{LapseError, Result, StorageOp};
use crate::pipeline::{tick_channel, HardwareTimer, PeriodicTrigger, SessionStats, StatsSnapshot};
use crate::storage::Storage;
use crate::utils::unix_timestamp;
use crate::{Config, LapseConfig, PipelineConfig};

/// Outcome of a successful [`Timelapse::request_recording`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Stopped,
}

/// What the control surface reports.
#[derive(Debug, Clone, Serialize)]
pub struct LapseStatus {
    pub recording: bool,
    pub video_fps: u32,
    pub frame_delay_ms: u64,
    /// File of the current recording, or of the last one
    pub output: Option<PathBuf>,
    /// Frames waiting between the stages
    pub queued: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub last_recording: Option<FinalizeReport>,
}

enum State<F> {
    Idle,
    Recording(Session<F>),
}

struct Inner<F> {
    state: State<F>,
    /// Stopping joins the timer thread, so it runs on the blocking pool
    trigger: Arc<StdMutex<PeriodicTrigger>>,
    video_fps: u32,
    frame_delay_ms: u64,
    output: Option<PathBuf>,
    last_recording: Option<FinalizeReport>,
}

impl<F> Inner<F> {
    fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording(_))
    }
}

/// Recording controller. Cheap handle over state shared with in-flight
/// transitions.
pub struct Timelapse<S: Storage> {
    shared: Arc<Shared<S>>,
}

struct Shared<S: Storage> {
    inner: Mutex<Inner<S::File>>,
    source: Arc<dyn FrameSource>,
    storage: Arc<S>,
    stats: Arc<SessionStats>,
    lapse: LapseConfig,
    pipeline: PipelineConfig,
    jpeg_quality: u8,
}

/// Attempts at finding a free file name within one second
const MAX_NAME_SUFFIX: u32 = 1000;

impl<S: Storage> Timelapse<S> {
    pub fn new(
        config: &Config,
        source: Arc<dyn FrameSource>,
        storage: Arc<S>,
        timer: Box<dyn HardwareTimer>,
    ) -> Self {
        let trigger = PeriodicTrigger::new(timer, config.timer.clone());
        let shared = Shared {
            inner: Mutex::new(Inner {
                state: State::Idle,
                trigger: Arc::new(StdMutex::new(trigger)),
                video_fps: config.lapse.video_fps,
                frame_delay_ms: config.lapse.frame_delay_ms,
                output: None,
                last_recording: None,
            }),
            source,
            storage,
            stats: Arc::new(SessionStats::new()),
            lapse: config.lapse.clone(),
            pipeline: config.pipeline.clone(),
            jpeg_quality: config.capture.jpeg_quality,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Move to the requested state.
    ///
    /// Asking for the state already in effect fails with
    /// [`LapseError::StateDesync`] and changes nothing. The transition runs
    /// on its own task and completes even if the caller stops waiting.
    pub async fn request_recording(&self, want: bool) -> Result<Transition> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.transition(want).await })
            .await
            .unwrap_or(Err(LapseError::StagePanicked("controller")))
    }

    pub async fn set_video_fps(&self, fps: u32) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.is_recording() {
            return Err(LapseError::Busy);
        }
        if fps == 0 {
            return Err(LapseError::InvalidSetting {
                name: "video_fps",
                reason: "must be at least 1",
            });
        }
        inner.video_fps = fps;
        info!("Video fps set to {}", fps);
        Ok(())
    }

    pub async fn set_frame_delay(&self, delay: Duration) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.is_recording() {
            return Err(LapseError::Busy);
        }
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return Err(LapseError::InvalidSetting {
                name: "frame_delay",
                reason: "must be at least 1 ms",
            });
        }
        inner.frame_delay_ms = millis;
        info!("Frame delay set to {} ms", millis);
        Ok(())
    }

    /// Waits while a start or stop is in progress.
    pub async fn status(&self) -> LapseStatus {
        let inner = self.shared.inner.lock().await;
        let queued = match &inner.state {
            State::Recording(session) => session.queued(),
            State::Idle => 0,
        };
        LapseStatus {
            recording: inner.is_recording(),
            video_fps: inner.video_fps,
            frame_delay_ms: inner.frame_delay_ms,
            output: inner.output.clone(),
            queued,
            stats: self.shared.stats.snapshot(),
            last_recording: inner.last_recording,
        }
    }

    /// Counters of the current or last recording, without waiting on the controller.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<S: Storage> Shared<S> {
    async fn transition(&self, want: bool) -> Result<Transition> {
        let mut inner = self.inner.lock().await;
        match (std::mem::replace(&mut inner.state, State::Idle), want) {
            (State::Idle, true) => {
                self.start(&mut inner).await?;
                Ok(Transition::Started)
            }
            (State::Recording(session), false) => {
                self.stop(&mut inner, session).await?;
                Ok(Transition::Stopped)
            }
            (state, _) => {
                inner.state = state;
                warn!(
                    "Recording request {} ignored, state already matches",
                    if want { "start" } else { "stop" }
                );
                Err(LapseError::StateDesync { recording: want })
            }
        }
    }

    #[instrument(skip_all, fields(fps = inner.video_fps, delay_ms = inner.frame_delay_ms))]
    async fn start(&self, inner: &mut Inner<S::File>) -> Result<()> {
        let (width, height) = self.source.frame_dimensions();
        let (avi_path, file) = self.create_output()?;
        let index_path = self.lapse.index_path();

        let index = match self.storage.create(&index_path) {
            Ok(index) => index,
            Err(err) => {
                if let Err(close) = self.storage.close(file) {
                    warn!("Failed to close {}: {}", avi_path.display(), close);
                }
                self.remove_quietly(&index_path);
                return Err(LapseError::storage(StorageOp::Create, &index_path, err));
            }
        };

        let config = MuxerConfig {
            width,
            height,
            fps: inner.video_fps,
        };
        let muxer = match AviMuxer::create(file, index, config) {
            Ok(muxer) => muxer,
            Err(err) => {
                self.remove_quietly(&index_path);
                return Err(err.into());
            }
        };
        self.stats.reset(muxer.cursor());

        let mut session = match Session::launch(
            avi_path.clone(),
            index_path.clone(),
            muxer,
            Arc::clone(&self.stats),
            &self.pipeline,
            self.jpeg_quality,
        ) {
            Ok(session) => session,
            Err(err) => {
                self.remove_quietly(&index_path);
                return Err(err);
            }
        };

        let (notifier, listener) = tick_channel();
        let mut started = session.start_acquisition(
            Arc::clone(&self.source),
            listener,
            Arc::clone(&self.stats),
            &self.pipeline,
        );
        if started.is_ok() {
            let delay = Duration::from_millis(inner.frame_delay_ms);
            started = lock_trigger(&inner.trigger)
                .start(delay, notifier)
                .map_err(LapseError::from);
        }
        if let Err(err) = started {
            error!("Recording start aborted: {}", err);
            stop_trigger(&inner.trigger).await;
            if let Err(cleanup) = self.finish(session).await {
                warn!("Cleanup after aborted start failed: {}", cleanup);
            }
            return Err(err);
        }

        info!(
            "Recording {}x{} @ {} fps, one frame every {} ms into {}",
            width,
            height,
            inner.video_fps,
            inner.frame_delay_ms,
            avi_path.display()
        );
        inner.output = Some(avi_path);
        inner.state = State::Recording(session);
        Ok(())
    }

    async fn stop(&self, inner: &mut Inner<S::File>, session: Session<S::File>) -> Result<()> {
        info!("Stopping recording");
        stop_trigger(&inner.trigger).await;
        let report = self.finish(session).await?;
        inner.last_recording = Some(report);
        Ok(())
    }

    /// Wind the stages down, finalize the container and drop the side index.
    async fn finish(&self, session: Session<S::File>) -> Result<FinalizeReport> {
        let avi_path = session.avi_path.clone();
        let index_path = session.index_path.clone();

        let finalized = match session.wind_down(self.pipeline.drain_poll()).await {
            Ok(muxer) => {
                let storage = Arc::clone(&self.storage);
                let index_path = index_path.clone();
                tokio::task::spawn_blocking(move || {
                    close_container(&*storage, muxer, &avi_path, &index_path)
                })
                    .await
                    .unwrap_or(Err(LapseError::StagePanicked("finalize")))
            }
            Err(err) => Err(err),
        };
        let removed = self
            .storage
            .remove(&index_path)
            .map_err(|err| LapseError::storage(StorageOp::Remove, &index_path, err));

        let report = finalized?;
        removed?;
        Ok(report)
    }

    /// Open `<prefix>_<unix seconds>.avi`, adding `_1`, `_2`, ... when a
    /// recording from the same second already holds the name.
    fn create_output(&self) -> Result<(PathBuf, S::File)> {
        let stem = format!("{}_{}", self.lapse.file_prefix, unix_timestamp());
        for suffix in 0..MAX_NAME_SUFFIX {
            let name = match suffix {
                0 => format!("{}.avi", stem),
                n => format!("{}_{}.avi", stem, n),
            };
            let path = self.lapse.output_dir.join(name);
            match self.storage.create_new(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(LapseError::storage(StorageOp::Create, &path, err)),
            }
        }
        let path = self.lapse.output_dir.join(format!("{}.avi", stem));
        Err(LapseError::storage(
            StorageOp::Create,
            &path,
            io::ErrorKind::AlreadyExists.into(),
        ))
    }

    fn remove_quietly(&self, path: &Path) {
        if let Err(err) = self.storage.remove(path) {
            warn!("Failed to remove {}: {}", path.display(), err);
        }
    }
}

fn lock_trigger(trigger: &StdMutex<PeriodicTrigger>) -> MutexGuard<'_, PeriodicTrigger> {
    trigger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disarm the timer and join its thread off the async workers.
async fn stop_trigger(trigger: &Arc<StdMutex<PeriodicTrigger>>) {
    let trigger = Arc::clone(trigger);
    if tokio::task::spawn_blocking(move || lock_trigger(&trigger).stop())
        .await
        .is_err()
    {
        warn!("Timer stop panicked");
    }
}

fn close_container<S: Storage>(
    storage: &S,
    muxer: AviMuxer<S::File, S::File>,
    avi_path: &Path,
    index_path: &Path,
) -> Result<FinalizeReport> {
    let (report, file, index) = muxer.finalize()?;
    storage
        .close(file)
        .map_err(|err| LapseError::storage(StorageOp::Close, avi_path, err))?;
    storage
        .close(index)
        .map_err(|err| LapseError::storage(StorageOp::Close, index_path, err))?;
    info!(
        "{} closed: {} frames, {} bytes",
        avi_path.display(),
        report.frames,
        report.file_size
    );
    Ok(report)
}
