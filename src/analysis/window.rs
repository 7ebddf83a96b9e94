// src/analysis/window.rs
//! Fixed-capacity rolling window of emotion samples per session. All metrics
//! are pure recomputations over the current window; the only state is the
//! ring buffer itself.

use std::collections::VecDeque;

use serde::Serialize;

use crate::analysis::types::{EmotionLabel, EmotionSample};

/// Min/avg/max/current over one scalar series.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SeriesStats {
    pub min: f32,
    pub avg: f32,
    pub max: f32,
    pub current: f32,
}

impl SeriesStats {
    fn over(values: impl Iterator<Item = f32> + Clone) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0f32;
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut current = 0.0f32;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
            current = v;
        }
        if count == 0 {
            return None;
        }
        Some(Self { min, avg: sum / count as f32, max, current })
    }
}

#[derive(Debug)]
pub struct RollingWindow {
    capacity: usize,
    samples: VecDeque<EmotionSample>,
    /// Total samples ever pushed, for cadence decisions.
    total_pushed: u64,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self { capacity, samples: VecDeque::with_capacity(capacity), total_pushed: 0 }
    }

    /// Append a sample, evicting the oldest once at capacity. Returns the
    /// total number of samples ever pushed.
    pub fn push(&mut self, sample: EmotionSample) -> u64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total_pushed += 1;
        self.total_pushed
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    pub fn samples(&self) -> impl Iterator<Item = &EmotionSample> {
        self.samples.iter()
    }

    fn valences(&self) -> impl Iterator<Item = f32> + Clone + '_ {
        self.samples.iter().map(|s| s.valence)
    }

    pub fn mean_valence(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.valences().sum::<f32>() / self.samples.len() as f32
    }

    pub fn mean_engagement(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.engagement).sum::<f32>() / self.samples.len() as f32
    }

    pub fn mean_probability(&self, label: EmotionLabel) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.probability(label)).sum::<f32>() / self.samples.len() as f32
    }

    /// Emotional stability: `clamp(1 - 2*stddev(valence), 0, 1)`. Population
    /// stddev, so a single-sample window is perfectly stable and an empty one
    /// never divides by zero.
    pub fn stability(&self) -> f32 {
        let n = self.samples.len();
        if n == 0 {
            return 1.0;
        }
        let mean = self.mean_valence();
        let variance =
            self.valences().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;
        (1.0 - 2.0 * variance.sqrt()).clamp(0.0, 1.0)
    }

    /// Count of adjacent valence deltas whose magnitude exceeds `threshold`.
    pub fn shift_count(&self, threshold: f32) -> usize {
        self.valences()
            .zip(self.valences().skip(1))
            .filter(|(a, b)| (b - a).abs() > threshold)
            .count()
    }

    /// Least-squares slope of valence against sample timestamps (valence
    /// units per second). Zero when the window is degenerate.
    pub fn valence_slope(&self) -> f32 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let xs: Vec<f64> = self.samples.iter().map(|s| s.timestamp).collect();
        let ys: Vec<f64> = self.samples.iter().map(|s| s.valence as f64).collect();
        let mean_x = xs.iter().sum::<f64>() / n as f64;
        let mean_y = ys.iter().sum::<f64>() / n as f64;
        let sxx: f64 = xs.iter().map(|x| (x - mean_x) * (x - mean_x)).sum();
        if sxx == 0.0 {
            return 0.0;
        }
        let sxy: f64 =
            xs.iter().zip(ys.iter()).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
        (sxy / sxx) as f32
    }

    pub fn valence_stats(&self) -> Option<SeriesStats> {
        SeriesStats::over(self.valences())
    }

    pub fn engagement_stats(&self) -> Option<SeriesStats> {
        SeriesStats::over(self.samples.iter().map(|s| s.engagement))
    }

    pub fn probability_stats(&self, label: EmotionLabel) -> Option<SeriesStats> {
        SeriesStats::over(self.samples.iter().map(move |s| s.probability(label)))
    }
}
