//! Error types for every layer of the timelapse pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while writing or reading an AVI container.
#[derive(Debug, Error)]
pub enum AviError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame payload is empty")]
    EmptyFrame,

    #[error("{what} of {size} bytes does not fit a 32-bit RIFF size field")]
    TooLarge { what: &'static str, size: u64 },

    #[error("side index holds {found} bytes, expected {expected} for {records} records")]
    CorruptIndex {
        records: u32,
        expected: u64,
        found: u64,
    },

    #[error("malformed container at byte {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
}

pub type AviResult<T> = std::result::Result<T, AviError>;

/// Errors produced by a frame source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera capture failed: {0}")]
    Acquire(String),

    #[error("JPEG encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("frame buffer of {actual} bytes too small for {width}x{height} {format}")]
    ShortBuffer {
        width: u32,
        height: u32,
        format: &'static str,
        actual: usize,
    },

    #[error("JPEG probe failed: {0}")]
    Probe(#[from] jpeg_decoder::Error),
}

/// Errors produced by the hardware timer abstraction.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer is not configured")]
    NotConfigured,

    #[error("no interrupt handler registered")]
    NoIsr,

    #[error("timer is already running")]
    AlreadyRunning,

    #[error("invalid timer divider {0}, must be within 2..=65536")]
    InvalidDivider(u32),

    #[error("failed to spawn timer thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Which storage operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Create,
    Close,
    Remove,
}

impl std::fmt::Display for StorageOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            StorageOp::Create => "create",
            StorageOp::Close => "close",
            StorageOp::Remove => "remove",
        };
        f.write_str(op)
    }
}

/// Errors surfaced by the timelapse orchestration layer.
#[derive(Debug, Error)]
pub enum LapseError {
    #[error("camera hardware fault: {0}")]
    Acquisition(#[source] CaptureError),

    #[error("frame queue is full, frame dropped")]
    QueueBackpressure,

    #[error("frame skipped: {0}")]
    Encode(#[source] CaptureError),

    #[error("storage {op} failed for {}: {source}", path.display())]
    Storage {
        op: StorageOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timelapse state out of sync: recording is already {recording}")]
    StateDesync { recording: bool },

    #[error("setting cannot change while a timelapse is recording")]
    Busy,

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting {
        name: &'static str,
        reason: &'static str,
    },

    #[error("container error: {0}")]
    Mux(#[from] AviError),

    #[error("trigger error: {0}")]
    Timer(#[from] TimerError),

    #[error("failed to spawn {name} stage: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0} stage panicked")]
    StagePanicked(&'static str),
}

impl LapseError {
    pub(crate) fn storage(op: StorageOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        LapseError::Storage {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LapseError>;
