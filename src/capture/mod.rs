pub mod frame;
pub mod jpeg;
pub mod resolution;
pub mod source;
pub mod synthetic;

pub use frame::{FrameLease, FrameMetadata, PixelFormat, RawFrame};
pub use resolution::FrameSize;
pub use source::FrameSource;
pub use synthetic::{SourceStats, SyntheticCamera};
