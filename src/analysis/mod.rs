// src/analysis/mod.rs
// Frame analysis and temporal aggregation.

use thiserror::Error;

pub mod classifier;
pub mod frame;
pub mod registry;
pub mod types;
pub mod window;

pub use classifier::{EmotionClassifier, FixedClassifier, HttpEmotionClassifier};
pub use frame::{FaceDetector, FaceRegion, FrameAnalyzer, SkinToneDetector};
pub use registry::WindowRegistry;
pub use types::{EmotionLabel, EmotionSample};
pub use window::{RollingWindow, SeriesStats};

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No face in the frame. A normal skip, never reported to anyone.
    #[error("no face detected")]
    NoFace,

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("classifier error: {0}")]
    Classifier(String),
}

impl AnalysisError {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NoFace)
    }
}
