// src/insight/mod.rs
//! Trend classification and therapist-facing suggestions. Everything here is
//! a deterministic mapping over aggregator output; the same window always
//! produces the same snapshot, suggestions and narrative.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::analysis::types::EmotionLabel;
use crate::analysis::window::{RollingWindow, SeriesStats};
use crate::config::CONFIG;

/// Regression slope magnitude below which the valence trend counts as flat.
const SLOPE_STABLE_BAND: f32 = 0.005;
/// Mean-valence band around zero that reads as a neutral mood.
const MOOD_NEUTRAL_BAND: f32 = 0.15;
/// Mean-engagement cut points.
const ENGAGEMENT_LOW_CEILING: f32 = 35.0;
const ENGAGEMENT_MODERATE_CEILING: f32 = 65.0;
/// How many top emotions a snapshot reports.
const DOMINANT_TOP_K: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValenceTrend {
    Improving,
    Deteriorating,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodProgression {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DominantEmotion {
    pub label: EmotionLabel,
    pub mean_probability: f32,
}

/// Derived view over the current window. Recomputed on demand, persisted only
/// when folded into the final session summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub dominant_emotions: Vec<DominantEmotion>,
    pub stability: f32,
    pub shift_count: usize,
    pub valence_trend: ValenceTrend,
    pub mood_progression: MoodProgression,
    pub engagement_level: EngagementLevel,
    pub mean_valence: f32,
    pub mean_engagement: f32,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub technique: String,
    pub priority: Priority,
}

impl Suggestion {
    fn high(technique: &str) -> Self {
        Self { technique: technique.to_string(), priority: Priority::High }
    }

    fn medium(technique: &str) -> Self {
        Self { technique: technique.to_string(), priority: Priority::Medium }
    }
}

pub fn classify_trend(slope: f32) -> ValenceTrend {
    if slope > SLOPE_STABLE_BAND {
        ValenceTrend::Improving
    } else if slope < -SLOPE_STABLE_BAND {
        ValenceTrend::Deteriorating
    } else {
        ValenceTrend::Stable
    }
}

pub fn classify_mood(mean_valence: f32) -> MoodProgression {
    if mean_valence > MOOD_NEUTRAL_BAND {
        MoodProgression::Positive
    } else if mean_valence < -MOOD_NEUTRAL_BAND {
        MoodProgression::Negative
    } else {
        MoodProgression::Neutral
    }
}

pub fn classify_engagement(mean_engagement: f32) -> EngagementLevel {
    if mean_engagement < ENGAGEMENT_LOW_CEILING {
        EngagementLevel::Low
    } else if mean_engagement < ENGAGEMENT_MODERATE_CEILING {
        EngagementLevel::Moderate
    } else {
        EngagementLevel::High
    }
}

pub fn summarize(window: &RollingWindow) -> TrendSnapshot {
    let mut ranked: Vec<DominantEmotion> = EmotionLabel::ALL
        .iter()
        .map(|label| DominantEmotion {
            label: *label,
            mean_probability: window.mean_probability(*label),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.mean_probability
            .partial_cmp(&a.mean_probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(DOMINANT_TOP_K);

    let mean_valence = window.mean_valence();
    let mean_engagement = window.mean_engagement();

    TrendSnapshot {
        dominant_emotions: ranked,
        stability: window.stability(),
        shift_count: window.shift_count(CONFIG.valence_shift_threshold),
        valence_trend: classify_trend(window.valence_slope()),
        mood_progression: classify_mood(mean_valence),
        engagement_level: classify_engagement(mean_engagement),
        mean_valence,
        mean_engagement,
        sample_count: window.len(),
    }
}

/// Curated technique table keyed on (dominant emotion, engagement, trend).
/// A pure lookup: reproducible by construction.
pub fn suggest(snapshot: &TrendSnapshot) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if snapshot.valence_trend == ValenceTrend::Deteriorating {
        suggestions.push(Suggestion::high(
            "Pause and try a grounding exercise (5-4-3-2-1 sensory check-in)",
        ));
    }

    let dominant = snapshot.dominant_emotions.first().map(|d| d.label);
    match dominant {
        Some(EmotionLabel::Sad) => {
            suggestions.push(Suggestion::high(
                "Explore behavioral activation: identify one small achievable activity",
            ));
        }
        Some(EmotionLabel::Angry) => {
            suggestions.push(Suggestion::high(
                "Slow the pace; reflect the frustration before problem-solving",
            ));
        }
        Some(EmotionLabel::Fear) => {
            suggestions.push(Suggestion::high(
                "Guide paced breathing (4-7-8) and name the feared outcome",
            ));
        }
        Some(EmotionLabel::Disgust) => {
            suggestions.push(Suggestion::medium(
                "Probe for avoidance; gently examine the triggering topic",
            ));
        }
        Some(EmotionLabel::Surprise) => {
            suggestions.push(Suggestion::medium(
                "Give space to process; summarize what was just discussed",
            ));
        }
        Some(EmotionLabel::Happy) | Some(EmotionLabel::Neutral) | None => {}
    }

    match snapshot.engagement_level {
        EngagementLevel::Low => suggestions.push(Suggestion::medium(
            "Switch to open-ended questions to re-engage the client",
        )),
        EngagementLevel::Moderate | EngagementLevel::High => {}
    }

    if snapshot.mood_progression == MoodProgression::Positive
        && snapshot.valence_trend == ValenceTrend::Improving
    {
        suggestions.push(Suggestion::medium(
            "Reinforce progress: reflect the positive shift back to the client",
        ));
    }

    suggestions
}

/// Per-emotion min/avg/max/current ranges for the persisted summary.
pub type EmotionRanges = HashMap<EmotionLabel, SeriesStats>;

/// Written once at session end; immutable after write. Regeneration always
/// overwrites wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub duration_minutes: i64,
    pub narrative: String,
    pub trend: TrendSnapshot,
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub emotion_ranges: HashMap<String, SeriesStatsRecord>,
}

/// Serializable mirror of SeriesStats for the summary JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeriesStatsRecord {
    pub min: f32,
    pub avg: f32,
    pub max: f32,
    pub current: f32,
}

impl From<SeriesStats> for SeriesStatsRecord {
    fn from(s: SeriesStats) -> Self {
        Self { min: s.min, avg: s.avg, max: s.max, current: s.current }
    }
}

fn narrative(snapshot: &TrendSnapshot, duration_minutes: i64) -> String {
    let dominant = snapshot
        .dominant_emotions
        .first()
        .map(|d| d.label.as_str())
        .unwrap_or("neutral");
    let trend = match snapshot.valence_trend {
        ValenceTrend::Improving => "improved over the session",
        ValenceTrend::Deteriorating => "declined over the session",
        ValenceTrend::Stable => "remained steady",
    };
    let engagement = match snapshot.engagement_level {
        EngagementLevel::Low => "low",
        EngagementLevel::Moderate => "moderate",
        EngagementLevel::High => "high",
    };
    format!(
        "Over {duration_minutes} minutes the client's predominant emotion was {dominant}. \
         Emotional valence {trend} with {count} notable shift(s); engagement was {engagement} \
         and stability measured {stability:.2}.",
        count = snapshot.shift_count,
        stability = snapshot.stability,
    )
}

pub fn build_summary(window: &RollingWindow, duration_minutes: i64) -> SessionSummary {
    let trend = summarize(window);
    let suggestions = suggest(&trend);
    let emotion_ranges = EmotionLabel::ALL
        .iter()
        .filter_map(|label| {
            window
                .probability_stats(*label)
                .map(|stats| (label.as_str().to_string(), stats.into()))
        })
        .collect();

    SessionSummary {
        duration_minutes,
        narrative: narrative(&trend, duration_minutes),
        trend,
        suggestions,
        emotion_ranges,
    }
}
