//! Transcription provider wrapper.
//!
//! Speech-to-text calls are metered per request, not per token: each file
//! is one slot against the transcription budget, locked before the upload
//! and settled after the provider answers.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::CounterClient;
use crate::config::TranscriptionSettings;
use crate::coordinator::{self, QuotaGroup};
use crate::counter::LeaseHandle;
use crate::retry::{retry_transient, RetryPolicy};

use super::{ProviderError, ProviderResult};

pub struct TranscriptionProvider {
    http: reqwest::Client,
    url: String,
    api_key: String,
    counter: Arc<CounterClient>,
    retry_policy: RetryPolicy,
}

impl TranscriptionProvider {
    pub fn new(
        settings: &TranscriptionSettings,
        counter: Arc<CounterClient>,
    ) -> ProviderResult<Self> {
        if settings.endpoint.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "transcription endpoint must be configured".to_string(),
            ));
        }
        let api_key = env::var(&settings.api_key_env).map_err(|_| {
            ProviderError::Authentication(format!(
                "environment variable {} not set",
                settings.api_key_env
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            url: format!(
                "{}/openai/deployments/{}/audio/transcriptions?api-version={}",
                settings.endpoint.trim_end_matches('/'),
                settings.deployment,
                settings.api_version
            ),
            api_key,
            counter,
            retry_policy: RetryPolicy::default(),
        })
    }

    async fn acquire_lease(&self) -> ProviderResult<LeaseHandle> {
        Ok(self.counter.lock_transcription().await?)
    }

    /// Transcribe one audio file under a request-slot reservation.
    pub async fn transcribe(&self, file_name: &str, audio: Vec<u8>) -> ProviderResult<String> {
        let lease = retry_transient(
            &self.retry_policy,
            "transcription lock",
            ProviderError::is_transient,
            || self.acquire_lease(),
        )
        .await?;
        debug!("transcribing {file_name} ({} bytes)", audio.len());

        let invoked = retry_transient(
            &self.retry_policy,
            "transcription request",
            ProviderError::is_transient,
            || self.invoke(file_name, &audio),
        )
        .await;

        match invoked {
            Ok(text) => {
                if let Err(err) = self.counter.report_transcription(&lease).await {
                    warn!("failed to report transcription slot {lease}: {err}");
                }
                Ok(text)
            }
            Err(err) => {
                if let Err(release_err) = self.counter.release_transcription(&lease).await {
                    warn!("failed to release {lease} after provider error: {release_err}");
                }
                Err(err)
            }
        }
    }

    /// Transcribe with the backoff coordinator around the slot acquisition.
    pub async fn transcribe_with_retry(
        &self,
        file_name: &str,
        audio: &[u8],
        max_attempts: u32,
    ) -> ProviderResult<String> {
        coordinator::run(&self.counter, QuotaGroup::Transcription, max_attempts, || {
            self.transcribe(file_name, audio.to_vec())
        })
        .await
    }

    async fn invoke(&self, file_name: &str, audio: &[u8]) -> ProviderResult<String> {
        let form = Form::new()
            .part(
                "file",
                Part::bytes(audio.to_vec()).file_name(file_name.to_string()),
            )
            .text("response_format", "json");

        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .multipart(form)
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

        let parsed: ApiTranscription = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.text)
    }
}

#[derive(Debug, Deserialize)]
struct ApiTranscription {
    text: String,
}
