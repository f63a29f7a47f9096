//! Wire types for the counter HTTP surface.
//!
//! Every body is shared between the service handlers and the reservation
//! client, so each type derives both halves of serde.

use serde::{Deserialize, Serialize};

use super::budget::BudgetSnapshot;
use super::handle::LeaseHandle;
use super::paired::{PairedDenial, PairedSnapshot};

/// `POST /lock` and `POST /embedding/lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub app_id: String,
    pub token_count: i64,
}

/// `POST /transcription/lock`: one request slot, no token cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotLockRequest {
    pub app_id: String,
}

/// `POST /report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub app_id: String,
    pub request_id: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_request_id: Option<String>,
}

/// `POST /embedding/report`: embeddings have no completion dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingReportRequest {
    pub app_id: String,
    pub request_id: String,
    pub prompt_tokens: i64,
}

/// `POST /transcription/report`: settles exactly one request slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReportRequest {
    pub app_id: String,
    pub request_id: String,
}

/// `POST {,/embedding,/transcription}/release`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub app_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_request_id: Option<String>,
}

/// Response to every lock endpoint. A quota denial is `allowed = false`
/// with `seconds_until_reset` and a message; it is not an HTTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_until_reset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LockResponse {
    pub fn granted(handle: &LeaseHandle) -> Self {
        Self {
            allowed: true,
            request_id: Some(handle.compound()),
            rate_request_id: handle.rate.clone(),
            seconds_until_reset: None,
            error: None,
        }
    }

    pub fn denied(denial: &PairedDenial) -> Self {
        Self {
            allowed: false,
            request_id: None,
            rate_request_id: None,
            seconds_until_reset: denial.seconds_until_reset(),
            error: Some(denial.message()),
        }
    }

    pub fn denied_with(message: String, seconds_until_reset: Option<u64>) -> Self {
        Self {
            allowed: false,
            request_id: None,
            rate_request_id: None,
            seconds_until_reset,
            error: Some(message),
        }
    }
}

/// Report and release always acknowledge, stale handles included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// `GET /status` and `GET /embedding/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedStatusResponse {
    pub available_tokens: u64,
    pub used_tokens: u64,
    pub locked_tokens: u64,
    pub available_requests: u64,
    pub used_requests: u64,
    pub locked_requests: u64,
    pub reset_time_seconds: u64,
}

impl From<PairedSnapshot> for PairedStatusResponse {
    fn from(snap: PairedSnapshot) -> Self {
        Self {
            available_tokens: snap.tokens.available,
            used_tokens: snap.tokens.committed,
            locked_tokens: snap.tokens.held,
            available_requests: snap.requests.available,
            used_requests: snap.requests.committed,
            locked_requests: snap.requests.held,
            reset_time_seconds: snap.seconds_until_reset(),
        }
    }
}

/// `GET /transcription/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotStatusResponse {
    pub available_requests: u64,
    pub used_requests: u64,
    pub locked_requests: u64,
    pub reset_time_seconds: u64,
}

impl From<BudgetSnapshot> for SlotStatusResponse {
    fn from(snap: BudgetSnapshot) -> Self {
        Self {
            available_requests: snap.available,
            used_requests: snap.committed,
            locked_requests: snap.held,
            reset_time_seconds: snap.seconds_until_reset,
        }
    }
}
