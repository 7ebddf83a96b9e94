// src/state.rs

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{
    analysis::{EmotionClassifier, FrameAnalyzer, WindowRegistry},
    api::ws::hub::SessionHub,
    chat::MessageStore,
    config::CONFIG,
    identity::TherapistDirectory,
    session::SqliteSessionStore,
};

pub struct AppState {
    // -------- Storage --------
    pub sessions: Arc<SqliteSessionStore>,
    pub messages: Arc<MessageStore>,
    pub therapists: Arc<TherapistDirectory>,

    // -------- Real-time --------
    pub hub: Arc<SessionHub>,
    pub windows: Arc<WindowRegistry>,
    pub analyzer: Arc<FrameAnalyzer>,
}

impl AppState {
    pub fn new(pool: SqlitePool, classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self {
            sessions: Arc::new(SqliteSessionStore::new(pool.clone())),
            messages: Arc::new(MessageStore::new(pool.clone())),
            therapists: Arc::new(TherapistDirectory::new(pool)),
            hub: Arc::new(SessionHub::new()),
            windows: Arc::new(WindowRegistry::new(CONFIG.window_capacity)),
            analyzer: Arc::new(FrameAnalyzer::new(classifier)),
        }
    }
}
