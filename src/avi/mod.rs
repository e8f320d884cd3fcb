//! MJPEG AVI container writing and verification

pub mod header;
pub mod index;
pub mod muxer;
pub mod reader;
pub mod riff;

pub use index::IndexRecord;
pub use muxer::{AviMuxer, FinalizeReport, FrameEntry, MuxState, MuxerConfig};
pub use reader::{AviSummary, IndexEntry};
pub use riff::{FourCC, Truncate};
