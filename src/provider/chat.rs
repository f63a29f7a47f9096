//! Chat-completion provider wrapper.
//!
//! Speaks the Azure-hosted OpenAI dialect: the deployment is part of the
//! URL path and the API key travels in the `api-key` header. Every call
//! runs the reservation contract: estimate, lock, invoke, then report
//! actual usage or release the hold.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::client::CounterClient;
use crate::config::ChatSettings;
use crate::coordinator::{self, QuotaGroup};
use crate::counter::LeaseHandle;
use crate::retry::{retry_transient, RetryPolicy};
use crate::token::TokenEstimator;

use super::{ChatMessage, ProviderError, ProviderResult, TokenUsage};

/// Tunables for a single completion call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

/// A completed chat call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

pub struct ChatProvider {
    http: reqwest::Client,
    url: String,
    api_key: String,
    default_max_tokens: u32,
    counter: Arc<CounterClient>,
    estimator: Arc<TokenEstimator>,
    retry_policy: RetryPolicy,
}

impl ChatProvider {
    pub fn new(settings: &ChatSettings, counter: Arc<CounterClient>) -> ProviderResult<Self> {
        if settings.endpoint.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "chat endpoint must be configured".to_string(),
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
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                settings.endpoint.trim_end_matches('/'),
                settings.deployment,
                settings.api_version
            ),
            api_key,
            default_max_tokens: settings.default_max_tokens,
            counter,
            estimator: Arc::new(estimator),
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Lock at the counter, retrying while the counter is unreachable. A
    /// quota denial is not transient and comes back on the first attempt.
    async fn acquire_lease(&self, estimated: u32) -> ProviderResult<LeaseHandle> {
        Ok(self.counter.lock(i64::from(estimated)).await?)
    }

    /// One reservation-guarded completion call. A refused reservation is
    /// returned as [`ProviderError::QuotaDenied`]; the provider is never
    /// contacted without a lock (fail closed).
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> ProviderResult<ChatOutcome> {
        let max_tokens = options.max_tokens.unwrap_or(self.default_max_tokens);
        let estimated = self.estimator.estimate_chat(messages, max_tokens);
        debug!("estimated {estimated} tokens for chat completion");

        let lease = retry_transient(
            &self.retry_policy,
            "completion lock",
            ProviderError::is_transient,
            || self.acquire_lease(estimated),
        )
        .await?;

        let invoked = retry_transient(
            &self.retry_policy,
            "chat completion request",
            ProviderError::is_transient,
            || self.invoke(messages, options, max_tokens),
        )
        .await;

        match invoked {
            Ok(outcome) => {
                if let Some(usage) = outcome.usage {
                    if let Err(err) = self
                        .counter
                        .report(
                            &lease,
                            i64::from(usage.prompt_tokens),
                            i64::from(usage.completion_tokens),
                        )
                        .await
                    {
                        warn!("failed to report usage for {lease}: {err}");
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(release_err) = self.counter.release(&lease).await {
                    warn!("failed to release {lease} after provider error: {release_err}");
                }
                Err(err)
            }
        }
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        max_tokens: u32,
    ) -> ProviderResult<ChatOutcome> {
        let mut body = json!({
            "messages": messages,
            "max_tokens": max_tokens,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(stop) = &options.stop {
            body["stop"] = json!(stop);
        }

        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
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

        let parsed: ApiChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))?;

        Ok(ChatOutcome {
            content: choice.message.content.unwrap_or_default(),
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    /// Format, send, and retry across window rolls. This is the entry point
    /// workers use: the backoff coordinator swallows quota denials up to
    /// `max_attempts` and propagates everything else.
    pub async fn send_prompt(
        &self,
        system_prompt: &str,
        user_template: &str,
        variables: &HashMap<String, String>,
        options: &ChatOptions,
        max_attempts: u32,
    ) -> ProviderResult<ChatOutcome> {
        let messages = format_prompt(system_prompt, user_template, variables, &[])?;
        coordinator::run(&self.counter, QuotaGroup::Completion, max_attempts, || {
            self.chat_completion(&messages, options)
        })
        .await
    }
}

/// Assemble a chat transcript: system message, optional few-shot examples,
/// then the user prompt with `{variable}` substitution.
pub fn format_prompt(
    system_prompt: &str,
    user_template: &str,
    variables: &HashMap<String, String>,
    examples: &[ChatMessage],
) -> ProviderResult<Vec<ChatMessage>> {
    let mut messages = Vec::with_capacity(examples.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend_from_slice(examples);
    messages.push(ChatMessage::user(render_template(user_template, variables)?));
    Ok(messages)
}

fn render_template(template: &str, variables: &HashMap<String, String>) -> ProviderResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(ProviderError::InvalidRequest(
                "unclosed placeholder in prompt template".to_string(),
            ));
        };
        let key = &after[..end];
        match variables.get(key) {
            Some(value) => out.push_str(value),
            None => {
                return Err(ProviderError::InvalidRequest(format!(
                    "missing template variable: {key}"
                )))
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
