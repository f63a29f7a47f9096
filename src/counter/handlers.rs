//! HTTP handlers for the counter service.
//!
//! Three URL groups share one router: the completion pair at the root,
//! the embedding pair under `/embedding`, and the requests-only
//! transcription budget under `/transcription`. Quota denials are 2xx
//! `allowed = false` bodies; HTTP errors are reserved for transport and
//! serialisation problems.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::config::LimitSettings;

use super::budget::WindowBudget;
use super::handle::LeaseHandle;
use super::paired::PairedBudget;
use super::schemas::{
    AckResponse, EmbeddingReportRequest, LockRequest, LockResponse, PairedStatusResponse,
    ReleaseRequest, ReportRequest, SlotLockRequest, SlotReportRequest, SlotStatusResponse,
};

/// Shared state of the counter process: five budgets, three groups.
pub struct CounterState {
    pub completion: PairedBudget,
    pub embedding: PairedBudget,
    pub transcription: WindowBudget,
    limits: LimitSettings,
}

impl CounterState {
    pub fn new(limits: LimitSettings) -> Self {
        info!(
            "counter budgets: completion {}tok/{}req, embedding {}tok/{}req, transcription {}req per minute",
            limits.completion_tokens_per_minute,
            limits.completion_requests_per_minute,
            limits.embedding_tokens_per_minute,
            limits.embedding_requests_per_minute,
            limits.transcription_requests_per_minute,
        );
        Self {
            completion: PairedBudget::new(
                WindowBudget::new("completion-tokens", limits.completion_tokens_per_minute),
                WindowBudget::new("completion-requests", limits.completion_requests_per_minute),
            ),
            embedding: PairedBudget::new(
                WindowBudget::new("embedding-tokens", limits.embedding_tokens_per_minute),
                WindowBudget::new("embedding-requests", limits.embedding_requests_per_minute),
            ),
            transcription: WindowBudget::new(
                "transcription-requests",
                limits.transcription_requests_per_minute,
            ),
            limits,
        }
    }
}

/// Reassemble a lease handle from the two wire fields. Clients either send
/// the compound form in `request_id` or pre-split halves; both work.
fn handle_from_wire(request_id: &str, rate_request_id: Option<String>) -> LeaseHandle {
    let mut handle = LeaseHandle::parse(request_id);
    if handle.rate.is_none() {
        handle.rate = rate_request_id;
    }
    handle
}

/// Rewrap non-2xx plain-text bodies (extractor rejections and the like)
/// into the `{"error": "…"}` shape every client of this service expects.
pub async fn error_body_middleware(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status().is_success() {
        return response;
    }
    let already_json = response
        .headers()
        .get(CONTENT_TYPE)
        .map(|v| v.as_bytes().starts_with(b"application/json"))
        .unwrap_or(false);
    if already_json {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let message = String::from_utf8_lossy(&bytes).to_string();
    let mut response = Json(json!({ "error": message })).into_response();
    *response.status_mut() = parts.status;
    response
}

pub async fn root(State(state): State<Arc<CounterState>>) -> Json<Value> {
    Json(json!({
        "app": "tollgate counter",
        "status": "running",
        "limits": {
            "completion_tokens_per_minute": state.limits.completion_tokens_per_minute,
            "completion_requests_per_minute": state.limits.completion_requests_per_minute,
            "embedding_tokens_per_minute": state.limits.embedding_tokens_per_minute,
            "embedding_requests_per_minute": state.limits.embedding_requests_per_minute,
            "transcription_requests_per_minute": state.limits.transcription_requests_per_minute,
        },
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// Completion group

pub async fn lock_completion(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<LockRequest>,
) -> Json<LockResponse> {
    match state.completion.lock(&req.app_id, req.token_count) {
        Ok(handle) => Json(LockResponse::granted(&handle)),
        Err(denial) => Json(LockResponse::denied(&denial)),
    }
}

pub async fn report_completion(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<ReportRequest>,
) -> Json<AckResponse> {
    let handle = handle_from_wire(&req.request_id, req.rate_request_id);
    let used = req.prompt_tokens.max(0) + req.completion_tokens.max(0);
    state.completion.report(&handle, used);
    Json(AckResponse::ok())
}

pub async fn release_completion(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<ReleaseRequest>,
) -> Json<AckResponse> {
    let handle = handle_from_wire(&req.request_id, req.rate_request_id);
    state.completion.release(&handle);
    Json(AckResponse::ok())
}

pub async fn status_completion(
    State(state): State<Arc<CounterState>>,
) -> Json<PairedStatusResponse> {
    Json(state.completion.status().into())
}

// Embedding group

pub async fn lock_embedding(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<LockRequest>,
) -> Json<LockResponse> {
    match state.embedding.lock(&req.app_id, req.token_count) {
        Ok(handle) => Json(LockResponse::granted(&handle)),
        Err(denial) => Json(LockResponse::denied(&denial)),
    }
}

pub async fn report_embedding(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<EmbeddingReportRequest>,
) -> Json<AckResponse> {
    let handle = handle_from_wire(&req.request_id, None);
    state
        .embedding
        .report_tokens_only(&handle, req.prompt_tokens.max(0));
    Json(AckResponse::ok())
}

pub async fn release_embedding(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<ReleaseRequest>,
) -> Json<AckResponse> {
    let handle = handle_from_wire(&req.request_id, req.rate_request_id);
    state.embedding.release(&handle);
    Json(AckResponse::ok())
}

pub async fn status_embedding(
    State(state): State<Arc<CounterState>>,
) -> Json<PairedStatusResponse> {
    Json(state.embedding.status().into())
}

// Transcription group: requests only, no token dimension.

pub async fn lock_transcription(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<SlotLockRequest>,
) -> Json<LockResponse> {
    match state.transcription.lock(&req.app_id, 1) {
        Ok(granted) => Json(LockResponse::granted(&LeaseHandle::single(granted.handle))),
        Err(denied) => Json(LockResponse::denied_with(
            "Rate limit would be exceeded. No available request slots.".to_string(),
            denied.seconds_until_reset(),
        )),
    }
}

pub async fn report_transcription(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<SlotReportRequest>,
) -> Json<AckResponse> {
    state.transcription.report(&req.request_id, 1);
    Json(AckResponse::ok())
}

pub async fn release_transcription(
    State(state): State<Arc<CounterState>>,
    Json(req): Json<ReleaseRequest>,
) -> Json<AckResponse> {
    state.transcription.release(&req.request_id);
    Json(AckResponse::ok())
}

pub async fn status_transcription(
    State(state): State<Arc<CounterState>>,
) -> Json<SlotStatusResponse> {
    Json(state.transcription.snapshot().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_handle_prefers_the_compound_form() {
        let handle = handle_from_wire("tok:rate", Some("other".to_string()));
        assert_eq!(handle.token, "tok");
        assert_eq!(handle.rate.as_deref(), Some("rate"));
    }

    #[test]
    fn wire_handle_falls_back_to_the_split_field() {
        let handle = handle_from_wire("tok", Some("rate".to_string()));
        assert_eq!(handle.token, "tok");
        assert_eq!(handle.rate.as_deref(), Some("rate"));
    }
}
