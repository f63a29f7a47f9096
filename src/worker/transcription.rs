//! Transcription job processor.
//!
//! Audio acquisition and segmentation happen upstream; a job points at an
//! already-prepared audio file. Each file costs exactly one request slot.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::transcription::TranscriptionProvider;
use crate::provider::ProviderError;

use super::MessageProcessor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub id: String,
    pub file_name: String,
    /// Path to the prepared audio file on local storage.
    pub audio_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJobResult {
    pub id: String,
    pub text: String,
    pub processed_at: String,
}

pub struct TranscriptionJobProcessor {
    provider: Arc<TranscriptionProvider>,
    max_attempts: u32,
}

impl TranscriptionJobProcessor {
    pub fn new(provider: Arc<TranscriptionProvider>, max_attempts: u32) -> Self {
        Self {
            provider,
            max_attempts,
        }
    }
}

#[async_trait]
impl MessageProcessor for TranscriptionJobProcessor {
    async fn process(&self, body: &str) -> Result<String, ProviderError> {
        let job: TranscriptionJob = serde_json::from_str(body).map_err(|e| {
            ProviderError::InvalidRequest(format!("malformed transcription job: {e}"))
        })?;

        let audio = tokio::fs::read(&job.audio_path).await.map_err(|e| {
            ProviderError::InvalidRequest(format!("cannot read {}: {e}", job.audio_path))
        })?;

        let text = self
            .provider
            .transcribe_with_retry(&job.file_name, &audio, self.max_attempts)
            .await?;

        let result = TranscriptionJobResult {
            id: job.id,
            text,
            processed_at: chrono::Utc::now().to_rfc3339(),
        };
        serde_json::to_string(&result).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}
