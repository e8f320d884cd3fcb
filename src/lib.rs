pub mod avi;
pub mod capture;
pub mod error;
pub mod lapse;
pub mod pipeline;
pub mod storage;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use capture::{FrameSize, PixelFormat};
use serde::{Deserialize, Serialize};

pub use error::{LapseError, Result};
pub use lapse::{LapseStatus, Timelapse, Transition};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub lapse: LapseConfig,
    pub pipeline: PipelineConfig,
    pub timer: TimerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub frame_size: FrameSize,
    pub format: PixelFormat,
    /// Used when the sensor does not deliver JPEG itself
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LapseConfig {
    /// Playback rate written into the container
    pub video_fps: u32,
    /// Wall-clock time between two captures
    pub frame_delay_ms: u64,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    /// Side index, relative to `output_dir` unless absolute
    pub index_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// Upper bound on any single wait inside a stage
    pub safety_timeout_ms: u64,
    pub drain_poll_ms: u64,
    pub acquisition_core: Option<usize>,
    pub mux_core: Option<usize>,
}

/// Hardware timer clocking, ESP32 APB defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub base_clock_hz: u64,
    pub divider: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::Vga,
            format: PixelFormat::Jpeg,
            jpeg_quality: capture::jpeg::DEFAULT_QUALITY,
        }
    }
}

impl Default for LapseConfig {
    fn default() -> Self {
        Self {
            video_fps: 2,
            frame_delay_ms: 1000,
            output_dir: PathBuf::from("."),
            file_prefix: "lapse".into(),
            index_file: PathBuf::from(".tmpavi.idx"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: pipeline::queue::DEFAULT_CAPACITY,
            safety_timeout_ms: 20_000,
            drain_poll_ms: 500,
            acquisition_core: None,
            mux_core: None,
        }
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            base_clock_hz: pipeline::timer::DEFAULT_BASE_CLOCK_HZ,
            divider: pipeline::timer::DEFAULT_DIVIDER,
        }
    }
}

impl LapseConfig {
    pub fn index_path(&self) -> PathBuf {
        self.output_dir.join(&self.index_file)
    }
}

impl PipelineConfig {
    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_timeout_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by `LAPSE__*`
    /// environment variables (`LAPSE__PIPELINE__QUEUE_CAPACITY=4`).
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("LAPSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Publish as the process-wide configuration.
    pub fn install(self) {
        CONFIG.store(Arc::new(self));
    }

    /// The configuration last installed, or the defaults.
    pub fn current() -> Arc<Config> {
        CONFIG.load_full()
    }
}
