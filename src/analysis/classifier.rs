// src/analysis/classifier.rs
// The emotion model is an external service: a pretrained CNN behind an HTTP
// endpoint taking a normalized face crop and returning per-label
// probabilities. Everything here treats it as a black box.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::analysis::AnalysisError;
use crate::analysis::types::EmotionLabel;
use crate::config::CONFIG;

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Classify a normalized face crop (PNG bytes) into per-label
    /// probabilities.
    async fn classify(&self, face_png: &[u8]) -> Result<HashMap<EmotionLabel, f32>, AnalysisError>;
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    probabilities: HashMap<EmotionLabel, f32>,
}

/// Production classifier speaking JSON to the inference service.
pub struct HttpEmotionClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEmotionClassifier {
    pub fn new() -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CONFIG.classifier_timeout))
            .build()
            .map_err(|e| AnalysisError::Classifier(format!("client build failed: {e}")))?;
        Ok(Self { client, endpoint: CONFIG.classifier_url.clone() })
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, AnalysisError> {
        let mut classifier = Self::new()?;
        classifier.endpoint = endpoint.into();
        Ok(classifier)
    }
}

#[async_trait]
impl EmotionClassifier for HttpEmotionClassifier {
    async fn classify(&self, face_png: &[u8]) -> Result<HashMap<EmotionLabel, f32>, AnalysisError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(face_png);
        debug!("Classifying face crop ({} bytes)", face_png.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "image": encoded }))
            .send()
            .await
            .map_err(|e| AnalysisError::Classifier(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AnalysisError::Classifier(format!(
                "classifier returned {}",
                response.status()
            )));
        }

        let body: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Classifier(format!("bad response body: {e}")))?;
        Ok(body.probabilities)
    }
}

/// Deterministic classifier for tests: always returns the configured
/// distribution.
pub struct FixedClassifier {
    pub probabilities: HashMap<EmotionLabel, f32>,
}

impl FixedClassifier {
    pub fn new(probabilities: HashMap<EmotionLabel, f32>) -> Self {
        Self { probabilities }
    }
}

#[async_trait]
impl EmotionClassifier for FixedClassifier {
    async fn classify(
        &self,
        _face_png: &[u8],
    ) -> Result<HashMap<EmotionLabel, f32>, AnalysisError> {
        Ok(self.probabilities.clone())
    }
}
