//! Reservation client: the in-worker library that talks to the counter.
//!
//! One instance per worker process. All methods forward amounts verbatim
//! (zero included) and let the counter do the validating; transport and
//! decode failures come back as structured errors with no retries at this
//! layer. Reports and releases on stale handles succeed, mirroring the
//! counter's no-op policy.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::counter::schemas::{
    AckResponse, EmbeddingReportRequest, LockRequest, LockResponse, PairedStatusResponse,
    ReleaseRequest, ReportRequest, SlotLockRequest, SlotReportRequest, SlotStatusResponse,
};
use crate::counter::LeaseHandle;

/// Errors surfaced by the reservation client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The counter answered `allowed = false`. Not a transport failure:
    /// the caller is expected to wait for the window to roll and retry.
    #[error("quota denied: {message}")]
    QuotaDenied {
        message: String,
        seconds_until_reset: Option<u64>,
    },

    /// The counter was unreachable or the connection failed mid-flight.
    #[error("counter request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The counter answered with a non-2xx status.
    #[error("counter returned HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// The response body did not match the expected shape.
    #[error("failed to decode counter response: {0}")]
    Decode(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// HTTP client for the counter service, fixed to one `app_id`.
#[derive(Debug, Clone)]
pub struct CounterClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
}

impl CounterClient {
    pub fn new(base_url: impl Into<String>, app_id: impl Into<String>) -> ClientResult<Self> {
        Self::with_timeout(base_url, app_id, Duration::from_secs(10))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        timeout: Duration,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_id: app_id.into(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        decode(response).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> ClientResult<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        decode(response).await
    }

    async fn lock_group(&self, path: &str, token_count: i64) -> ClientResult<LeaseHandle> {
        let response: LockResponse = self
            .post(
                path,
                &LockRequest {
                    app_id: self.app_id.clone(),
                    token_count,
                },
            )
            .await?;
        lease_from(response)
    }

    /// Reserve completion tokens plus one request slot.
    pub async fn lock(&self, token_count: i64) -> ClientResult<LeaseHandle> {
        self.lock_group("/lock", token_count).await
    }

    /// Reserve embedding tokens plus one request slot.
    pub async fn lock_embedding(&self, token_count: i64) -> ClientResult<LeaseHandle> {
        self.lock_group("/embedding/lock", token_count).await
    }

    /// Reserve one transcription request slot.
    pub async fn lock_transcription(&self) -> ClientResult<LeaseHandle> {
        let response: LockResponse = self
            .post(
                "/transcription/lock",
                &SlotLockRequest {
                    app_id: self.app_id.clone(),
                },
            )
            .await?;
        lease_from(response)
    }

    /// Report actual completion usage. Splits the compound handle into the
    /// wire fields; the compound form itself never changes hands otherwise.
    pub async fn report(
        &self,
        handle: &LeaseHandle,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> ClientResult<()> {
        let _: AckResponse = self
            .post(
                "/report",
                &ReportRequest {
                    app_id: self.app_id.clone(),
                    request_id: handle.token.clone(),
                    prompt_tokens,
                    completion_tokens,
                    rate_request_id: handle.rate.clone(),
                },
            )
            .await?;
        debug!(
            "reported usage for {}: prompt={}, completion={}",
            handle, prompt_tokens, completion_tokens
        );
        Ok(())
    }

    pub async fn report_embedding(
        &self,
        handle: &LeaseHandle,
        prompt_tokens: i64,
    ) -> ClientResult<()> {
        let _: AckResponse = self
            .post(
                "/embedding/report",
                &EmbeddingReportRequest {
                    app_id: self.app_id.clone(),
                    request_id: handle.token.clone(),
                    prompt_tokens,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn report_transcription(&self, handle: &LeaseHandle) -> ClientResult<()> {
        let _: AckResponse = self
            .post(
                "/transcription/report",
                &SlotReportRequest {
                    app_id: self.app_id.clone(),
                    request_id: handle.token.clone(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn release(&self, handle: &LeaseHandle) -> ClientResult<()> {
        self.release_group("/release", handle).await
    }

    pub async fn release_embedding(&self, handle: &LeaseHandle) -> ClientResult<()> {
        self.release_group("/embedding/release", handle).await
    }

    pub async fn release_transcription(&self, handle: &LeaseHandle) -> ClientResult<()> {
        self.release_group("/transcription/release", handle).await
    }

    async fn release_group(&self, path: &str, handle: &LeaseHandle) -> ClientResult<()> {
        let _: AckResponse = self
            .post(
                path,
                &ReleaseRequest {
                    app_id: self.app_id.clone(),
                    request_id: handle.token.clone(),
                    rate_request_id: handle.rate.clone(),
                },
            )
            .await?;
        debug!("released reservation {}", handle);
        Ok(())
    }

    pub async fn status(&self) -> ClientResult<PairedStatusResponse> {
        self.get("/status").await
    }

    pub async fn status_embedding(&self) -> ClientResult<PairedStatusResponse> {
        self.get("/embedding/status").await
    }

    pub async fn status_transcription(&self) -> ClientResult<SlotStatusResponse> {
        self.get("/transcription/status").await
    }
}

fn lease_from(response: LockResponse) -> ClientResult<LeaseHandle> {
    if response.allowed {
        let compound = response.request_id.ok_or_else(|| {
            ClientError::Decode("allowed lock response without request_id".to_string())
        })?;
        Ok(LeaseHandle::parse(&compound))
    } else {
        Err(ClientError::QuotaDenied {
            message: response
                .error
                .unwrap_or_else(|| "quota denied".to_string()),
            seconds_until_reset: response.seconds_until_reset,
        })
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> ClientResult<R> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ClientError::Http { status, body });
    }
    serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_response_parses_into_a_compound_lease() {
        let lease = lease_from(LockResponse {
            allowed: true,
            request_id: Some("tok-1:rate-1".to_string()),
            rate_request_id: Some("rate-1".to_string()),
            seconds_until_reset: None,
            error: None,
        })
        .unwrap();
        assert_eq!(lease.token, "tok-1");
        assert_eq!(lease.rate.as_deref(), Some("rate-1"));
    }

    #[test]
    fn denial_becomes_a_typed_error() {
        let err = lease_from(LockResponse {
            allowed: false,
            request_id: None,
            rate_request_id: None,
            seconds_until_reset: Some(42),
            error: Some("Token limit would be exceeded. Available: 1, Requested: 2".to_string()),
        })
        .unwrap_err();
        match err {
            ClientError::QuotaDenied {
                seconds_until_reset,
                message,
            } => {
                assert_eq!(seconds_until_reset, Some(42));
                assert!(message.starts_with("Token limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allowed_without_handle_is_a_decode_error() {
        let err = lease_from(LockResponse {
            allowed: true,
            request_id: None,
            rate_request_id: None,
            seconds_until_reset: None,
            error: None,
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
