//! Running statistics of a recording session

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use metrics::{counter, gauge};
use serde::Serialize;

/// Counters shared by the stages and read by the control layer.
///
/// The acquisition stage only touches `frames_taken` and `frames_dropped`;
/// everything else belongs to the encode/mux stage.
#[derive(Default)]
pub struct SessionStats {
    frames_taken: CachePadded<AtomicU64>,
    frames_dropped: AtomicU64,
    camera_fault: AtomicBool,
    frames_written: CachePadded<AtomicU64>,
    encode_failures: AtomicU64,
    write_failures: AtomicU64,
    max_frame_bytes: AtomicU64,
    write_cursor: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub frames_taken: u64,
    pub frames_dropped: u64,
    pub camera_fault: bool,
    pub frames_written: u64,
    pub encode_failures: u64,
    pub write_failures: u64,
    pub max_frame_bytes: u64,
    pub write_cursor: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only called while both stages are stopped.
    pub fn reset(&self, write_cursor: u64) {
        self.frames_taken.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.camera_fault.store(false, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.encode_failures.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
        self.max_frame_bytes.store(0, Ordering::Relaxed);
        self.write_cursor.store(write_cursor, Ordering::Release);
        gauge!("lapse_max_frame_bytes").set(0.0);
    }

    pub fn frame_taken(&self) {
        self.frames_taken.fetch_add(1, Ordering::Relaxed);
        counter!("lapse_frames_taken").increment(1);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("lapse_frames_dropped").increment(1);
    }

    pub fn camera_fault(&self) {
        self.camera_fault.store(true, Ordering::Release);
    }

    pub fn observe_frame_size(&self, bytes: usize) {
        let previous = self.max_frame_bytes.fetch_max(bytes as u64, Ordering::Relaxed);
        if bytes as u64 > previous {
            gauge!("lapse_max_frame_bytes").set(bytes as f64);
        }
    }

    pub fn frame_written(&self, write_cursor: u64) {
        self.write_cursor.store(write_cursor, Ordering::Release);
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        counter!("lapse_frames_written").increment(1);
    }

    pub fn encode_failed(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
        counter!("lapse_encode_failures").increment(1);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        counter!("lapse_write_failures").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_taken: self.frames_taken.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            camera_fault: self.camera_fault.load(Ordering::Acquire),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            max_frame_bytes: self.max_frame_bytes.load(Ordering::Relaxed),
            write_cursor: self.write_cursor.load(Ordering::Acquire),
        }
    }
}
