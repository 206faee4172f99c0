pub mod beats;
pub mod peaks;

pub use beats::{detect_beats, BeatDetection, DetectionConfig};
