// src/analysis/registry.rs
// Per-session rolling windows. The registry's accessor methods are the only
// way tasks touch the shared windows.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::analysis::types::EmotionSample;
use crate::analysis::window::RollingWindow;
use crate::insight::{self, SessionSummary, TrendSnapshot};

pub struct WindowRegistry {
    capacity: usize,
    windows: Mutex<HashMap<String, RollingWindow>>,
}

impl WindowRegistry {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, windows: Mutex::new(HashMap::new()) }
    }

    /// Append a sample to the session's window, creating it on first use.
    /// Returns the running count of samples ever pushed for this session.
    pub async fn push(&self, session_id: &str, sample: EmotionSample) -> u64 {
        let mut windows = self.windows.lock().await;
        windows
            .entry(session_id.to_string())
            .or_insert_with(|| RollingWindow::new(self.capacity))
            .push(sample)
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<TrendSnapshot> {
        let windows = self.windows.lock().await;
        windows.get(session_id).map(insight::summarize)
    }

    pub async fn summary(&self, session_id: &str, duration_minutes: i64) -> Option<SessionSummary> {
        let windows = self.windows.lock().await;
        windows
            .get(session_id)
            .filter(|w| !w.is_empty())
            .map(|w| insight::build_summary(w, duration_minutes))
    }

    /// Drop the session's window (called after the last participant leaves).
    /// Safe to call for unknown sessions.
    pub async fn remove(&self, session_id: &str) {
        self.windows.lock().await.remove(session_id);
    }

    pub async fn sample_count(&self, session_id: &str) -> usize {
        self.windows.lock().await.get(session_id).map(|w| w.len()).unwrap_or(0)
    }
}
