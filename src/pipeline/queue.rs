//! Bounded frame handoff between the acquisition and encode/mux stages

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{RecvTimeoutError, SendTimeoutError};

use crate::capture::FrameLease;

/// Frames buffered between the stages by default
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Default)]
struct Stats {
    in_flight: AtomicUsize,
    frames_enqueued: AtomicUsize,
    frames_dequeued: AtomicUsize,
    frames_rejected: AtomicUsize,
}

struct Shared {
    capacity: usize,
    stats: CachePadded<Stats>,
}

/// Producer half, owned by the acquisition stage
pub struct FrameProducer {
    tx: flume::Sender<FrameLease>,
    shared: Arc<Shared>,
}

/// Consumer half, owned by the encode/mux stage
pub struct FrameConsumer {
    rx: flume::Receiver<FrameLease>,
    shared: Arc<Shared>,
}

/// Read-only view for the orchestrator
#[derive(Clone)]
pub struct QueueProbe {
    shared: Arc<Shared>,
}

#[derive(Debug)]
pub enum Dequeue {
    Frame(FrameLease),
    Empty,
    /// Producer gone and nothing left to drain
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub in_flight: usize,
    pub enqueued: usize,
    pub dequeued: usize,
    pub rejected: usize,
}

pub fn frame_queue(capacity: usize) -> (FrameProducer, FrameConsumer, QueueProbe) {
    let capacity = capacity.max(1);
    let (tx, rx) = flume::bounded(capacity);
    let shared = Arc::new(Shared {
        capacity,
        stats: CachePadded::new(Stats::default()),
    });
    (
        FrameProducer {
            tx,
            shared: Arc::clone(&shared),
        },
        FrameConsumer {
            rx,
            shared: Arc::clone(&shared),
        },
        QueueProbe { shared },
    )
}

impl FrameProducer {
    /// Enqueue, waiting at most `timeout` for room. On failure the lease is
    /// handed back so the caller decides how to dispose of it.
    pub fn push(&self, frame: FrameLease, timeout: Duration) -> Result<(), FrameLease> {
        // Count before the consumer can see the frame
        self.shared.stats.in_flight.fetch_add(1, Ordering::AcqRel);
        match self.tx.send_timeout(frame, timeout) {
            Ok(()) => {
                self.shared
                    .stats
                    .frames_enqueued
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(frame)) | Err(SendTimeoutError::Disconnected(frame)) => {
                self.shared.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
                self.shared
                    .stats
                    .frames_rejected
                    .fetch_add(1, Ordering::Relaxed);
                Err(frame)
            }
        }
    }
}

impl FrameConsumer {
    pub fn pop(&self, timeout: Duration) -> Dequeue {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => {
                self.shared.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
                self.shared
                    .stats
                    .frames_dequeued
                    .fetch_add(1, Ordering::Relaxed);
                Dequeue::Frame(frame)
            }
            Err(RecvTimeoutError::Timeout) => Dequeue::Empty,
            Err(RecvTimeoutError::Disconnected) => Dequeue::Disconnected,
        }
    }
}

impl QueueProbe {
    /// Frames enqueued and not yet taken by the consumer.
    pub fn len(&self) -> usize {
        self.shared.stats.in_flight.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn stats(&self) -> QueueStats {
        let stats = &self.shared.stats;
        QueueStats {
            in_flight: stats.in_flight.load(Ordering::Acquire),
            enqueued: stats.frames_enqueued.load(Ordering::Relaxed),
            dequeued: stats.frames_dequeued.load(Ordering::Relaxed),
            rejected: stats.frames_rejected.load(Ordering::Relaxed),
        }
    }
}
