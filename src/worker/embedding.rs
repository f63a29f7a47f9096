//! Embedding job processor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::embedding::EmbeddingProvider;
use crate::provider::ProviderError;

use super::MessageProcessor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub id: String,
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingJobResult {
    pub id: String,
    pub embeddings: Vec<Vec<f32>>,
    pub processed_at: String,
}

pub struct EmbeddingJobProcessor {
    provider: Arc<EmbeddingProvider>,
    max_attempts: u32,
}

impl EmbeddingJobProcessor {
    pub fn new(provider: Arc<EmbeddingProvider>, max_attempts: u32) -> Self {
        Self {
            provider,
            max_attempts,
        }
    }
}

#[async_trait]
impl MessageProcessor for EmbeddingJobProcessor {
    async fn process(&self, body: &str) -> Result<String, ProviderError> {
        let job: EmbeddingJob = serde_json::from_str(body)
            .map_err(|e| ProviderError::InvalidRequest(format!("malformed embedding job: {e}")))?;
        if job.texts.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "embedding job has no texts".to_string(),
            ));
        }

        let embeddings = self
            .provider
            .create_embeddings_batch(&job.texts, self.max_attempts)
            .await?;

        let result = EmbeddingJobResult {
            id: job.id,
            embeddings,
            processed_at: chrono::Utc::now().to_rfc3339(),
        };
        serde_json::to_string(&result).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}
