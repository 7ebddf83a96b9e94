// src/analysis/types.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fixed label set of the external emotion classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Angry => "angry",
            Self::Disgust => "disgust",
            Self::Fear => "fear",
            Self::Happy => "happy",
            Self::Neutral => "neutral",
            Self::Sad => "sad",
            Self::Surprise => "surprise",
        }
    }

    /// Contribution to the valence scalar, in [-1, 1].
    pub fn valence_weight(&self) -> f32 {
        match self {
            Self::Happy => 0.9,
            Self::Surprise => 0.3,
            Self::Neutral => 0.0,
            Self::Sad => -0.7,
            Self::Angry => -0.8,
            Self::Fear => -0.6,
            Self::Disgust => -0.6,
        }
    }

    /// Contribution to the engagement scalar, in [0, 1] before the x100 scale.
    pub fn engagement_weight(&self) -> f32 {
        match self {
            Self::Happy => 0.9,
            Self::Surprise => 1.0,
            Self::Angry => 0.8,
            Self::Fear => 0.7,
            Self::Disgust => 0.6,
            Self::Sad => 0.5,
            Self::Neutral => 0.3,
        }
    }
}

/// One analyzed frame. Ephemeral: owned by the session's rolling window and
/// FIFO-evicted at capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSample {
    /// Seconds since the session went live.
    pub timestamp: f64,
    /// Per-label probabilities, each clamped to [0, 1]. The map need not sum
    /// to exactly 1.
    pub probabilities: HashMap<EmotionLabel, f32>,
    pub dominant: EmotionLabel,
    /// Probability of the dominant label.
    pub confidence: f32,
    /// Weighted valence, [-1, 1].
    pub valence: f32,
    /// Weighted engagement, [0, 100].
    pub engagement: f32,
}

impl EmotionSample {
    pub fn from_probabilities(timestamp: f64, raw: HashMap<EmotionLabel, f32>) -> Self {
        let probabilities: HashMap<EmotionLabel, f32> = EmotionLabel::ALL
            .iter()
            .map(|label| (*label, raw.get(label).copied().unwrap_or(0.0).clamp(0.0, 1.0)))
            .collect();

        let (dominant, confidence) = probabilities
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(label, p)| (*label, *p))
            .unwrap_or((EmotionLabel::Neutral, 0.0));

        let valence: f32 = probabilities
            .iter()
            .map(|(label, p)| p * label.valence_weight())
            .sum::<f32>()
            .clamp(-1.0, 1.0);

        let engagement: f32 = (probabilities
            .iter()
            .map(|(label, p)| p * label.engagement_weight())
            .sum::<f32>()
            * 100.0)
            .clamp(0.0, 100.0);

        Self { timestamp, probabilities, dominant, confidence, valence, engagement }
    }

    pub fn probability(&self, label: EmotionLabel) -> f32 {
        self.probabilities.get(&label).copied().unwrap_or(0.0)
    }
}
