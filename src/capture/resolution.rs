use serde::{Deserialize, Serialize};

/// Sensor output sizes supported by the camera module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    Qqvga,
    Hqvga,
    Qvga,
    Cif,
    Vga,
    Svga,
    Xga,
    Sxga,
    Uxga,
    Qxga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 10] = [
        FrameSize::Qqvga,
        FrameSize::Hqvga,
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Sxga,
        FrameSize::Uxga,
        FrameSize::Qxga,
    ];

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Hqvga => (240, 176),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
            FrameSize::Qxga => (2048, 1536),
        }
    }

    pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|size| size.dimensions() == (width, height))
    }
}
