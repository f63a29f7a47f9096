//! Chat completion job processor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::chat::{ChatOptions, ChatProvider};
use crate::provider::ProviderError;

use super::MessageProcessor;

/// Inbound job body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatJob {
    pub id: String,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Outbound result body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatJobResult {
    pub id: String,
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub processed_at: String,
}

pub struct ChatJobProcessor {
    provider: Arc<ChatProvider>,
    max_attempts: u32,
}

impl ChatJobProcessor {
    pub fn new(provider: Arc<ChatProvider>, max_attempts: u32) -> Self {
        Self {
            provider,
            max_attempts,
        }
    }
}

#[async_trait]
impl MessageProcessor for ChatJobProcessor {
    async fn process(&self, body: &str) -> Result<String, ProviderError> {
        let job: ChatJob = serde_json::from_str(body)
            .map_err(|e| ProviderError::InvalidRequest(format!("malformed chat job: {e}")))?;

        let options = ChatOptions {
            temperature: job.temperature,
            max_tokens: job.max_tokens,
            stop: None,
        };
        let outcome = self
            .provider
            .send_prompt(
                &job.system_prompt,
                &job.user_prompt,
                &job.variables,
                &options,
                self.max_attempts,
            )
            .await?;

        let usage = outcome.usage.unwrap_or_default();
        let result = ChatJobResult {
            id: job.id,
            content: outcome.content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            processed_at: chrono::Utc::now().to_rfc3339(),
        };
        serde_json::to_string(&result).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}
