//! Timelapse capture pipeline
//!
//! ```text
//! timer ISR ──tick──▶ acquisition ──FrameLease──▶ queue(10) ──▶ encode/mux ──▶ AVI + side index
//! ```

pub mod acquire;
pub mod mux;
pub mod queue;
pub mod signal;
pub mod stats;
pub mod timer;
pub mod trigger;


pub use acquire::{AcquisitionExit, AcquisitionStage};
pub use mux::MuxStage;
pub use queue::{frame_queue, Dequeue, FrameConsumer, FrameProducer, QueueProbe, QueueStats};
pub use signal::{tick_channel, TickListener, TickNotifier, TickWait};
pub use stats::{SessionStats, StatsSnapshot};
pub use timer::{HardwareTimer, IsrContext, Isr, SoftTimer, TimerConfig};
pub use trigger::PeriodicTrigger;
