//! Embedding provider wrapper.
//!
//! Same reservation contract as chat, with two differences: the estimate
//! is exact (inputs only, no output dimension) and the usage report
//! carries prompt tokens alone.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::client::CounterClient;
use crate::config::EmbeddingSettings;
use crate::coordinator::{self, QuotaGroup};
use crate::counter::LeaseHandle;
use crate::retry::{retry_transient, RetryPolicy};
use crate::token::TokenEstimator;

use super::{ProviderError, ProviderResult};

pub struct EmbeddingProvider {
    http: reqwest::Client,
    url: String,
    api_key: String,
    batch_size: usize,
    counter: Arc<CounterClient>,
    estimator: Arc<TokenEstimator>,
    retry_policy: RetryPolicy,
}

impl EmbeddingProvider {
    pub fn new(settings: &EmbeddingSettings, counter: Arc<CounterClient>) -> ProviderResult<Self> {
        if settings.endpoint.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "embedding endpoint must be configured".to_string(),
            ));
        }
        let api_key = env::var(&settings.api_key_env).map_err(|_| {
            ProviderError::Authentication(format!(
                "environment variable {} not set",
                settings.api_key_env
            ))
        })?;
        let estimator = TokenEstimator::for_model(&settings.deployment)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            url: format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                settings.endpoint.trim_end_matches('/'),
                settings.deployment,
                settings.api_version
            ),
            api_key,
            batch_size: settings.batch_size.max(1),
            counter,
            estimator: Arc::new(estimator),
            retry_policy: RetryPolicy::default(),
        })
    }

    async fn acquire_lease(&self, estimated: u32) -> ProviderResult<LeaseHandle> {
        Ok(self.counter.lock_embedding(i64::from(estimated)).await?)
    }

    /// Embed a list of texts under one reservation.
    pub async fn create_embeddings(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let estimated = self.estimator.estimate_embedding(texts);
        debug!("estimated {estimated} tokens for {} embedding inputs", texts.len());

        let lease = retry_transient(
            &self.retry_policy,
            "embedding lock",
            ProviderError::is_transient,
            || self.acquire_lease(estimated),
        )
        .await?;

        let invoked = retry_transient(
            &self.retry_policy,
            "embedding request",
            ProviderError::is_transient,
            || self.invoke(texts),
        )
        .await;

        match invoked {
            Ok((embeddings, prompt_tokens)) => {
                if let Err(err) = self
                    .counter
                    .report_embedding(&lease, i64::from(prompt_tokens))
                    .await
                {
                    warn!("failed to report embedding usage for {lease}: {err}");
                }
                Ok(embeddings)
            }
            Err(err) => {
                if let Err(release_err) = self.counter.release_embedding(&lease).await {
                    warn!("failed to release {lease} after provider error: {release_err}");
                }
                Err(err)
            }
        }
    }

    /// Embed with the backoff coordinator around each provider call.
    pub async fn create_embeddings_with_retry(
        &self,
        texts: &[String],
        max_attempts: u32,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        coordinator::run(&self.counter, QuotaGroup::Embedding, max_attempts, || {
            self.create_embeddings(texts)
        })
        .await
    }

    /// Embed a large list in provider-sized chunks, preserving input order.
    pub async fn create_embeddings_batch(
        &self,
        texts: &[String],
        max_attempts: u32,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        let batches = texts.len().div_ceil(self.batch_size);
        for (i, chunk) in texts.chunks(self.batch_size).enumerate() {
            info!("embedding batch {}/{batches} ({} texts)", i + 1, chunk.len());
            let embeddings = self.create_embeddings_with_retry(chunk, max_attempts).await?;
            all.extend(embeddings);
        }
        Ok(all)
    }

    async fn invoke(&self, texts: &[String]) -> ProviderResult<(Vec<Vec<f32>>, u32)> {
        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&json!({ "input": texts }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::Authentication(message),
                code => ProviderError::Api {
                    status: code,
                    message,
                },
            });
        }

        let parsed: ApiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        // The provider does not guarantee data order; sort by index.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        let prompt_tokens = parsed.usage.map(|u| u.prompt_tokens).unwrap_or(0);
        Ok((data.into_iter().map(|d| d.embedding).collect(), prompt_tokens))
    }
}

#[derive(Debug, Deserialize)]
struct ApiEmbeddingResponse {
    data: Vec<ApiEmbeddingDatum>,
    usage: Option<ApiEmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbeddingUsage {
    prompt_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_data_is_reordered_by_index() {
        let parsed: ApiEmbeddingResponse = serde_json::from_str(
            r#"{
                "data": [
                    {"index": 1, "embedding": [2.0]},
                    {"index": 0, "embedding": [1.0]}
                ],
                "usage": {"prompt_tokens": 7}
            }"#,
        )
        .unwrap();
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        assert_eq!(data[0].embedding, vec![1.0]);
        assert_eq!(data[1].embedding, vec![2.0]);
    }
}
