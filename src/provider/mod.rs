//! Provider wrappers: chat completions, embeddings, and transcription.
//!
//! Each wrapper carries the reservation contract with it: estimate the
//! cost, lock it at the counter, invoke the provider, then report actual
//! usage on success or release the hold on any failure. A refused
//! reservation surfaces as [`ProviderError::QuotaDenied`], the one error
//! kind the backoff coordinator is allowed to swallow.

pub mod chat;
pub mod embedding;
pub mod transcription;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ClientError;

/// Errors from provider wrappers and the reservation protocol around them.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Our own counter refused the reservation. Carried as a tagged kind so
    /// downstream code dispatches on the variant, never on message text.
    #[error("quota denied: {message}")]
    QuotaDenied {
        message: String,
        seconds_until_reset: Option<u64>,
    },

    /// The provider answered with a non-2xx status.
    #[error("provider API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Missing or rejected credentials.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Connection-level failure talking to the provider.
    #[error("network error: {0}")]
    Network(String),

    /// The provider call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The provider response could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// The request was malformed before it left the worker.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The counter itself was unreachable. Fail closed: no provider call
    /// is made without a reservation.
    #[error("counter unavailable: {0}")]
    CounterUnavailable(String),
}

impl ProviderError {
    /// Transient I/O failures: an unreachable counter, a provider-side
    /// 5xx, a timed-out or broken connection. These get an exponential
    /// retry inside the worker before the message is given up for
    /// redelivery; everything else fails the attempt immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout
                | ProviderError::CounterUnavailable(_)
                | ProviderError::Api {
                    status: 500..=599,
                    ..
                }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Network(format!("connection error: {err}"))
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<ClientError> for ProviderError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::QuotaDenied {
                message,
                seconds_until_reset,
            } => ProviderError::QuotaDenied {
                message,
                seconds_until_reset,
            },
            other => ProviderError::CounterUnavailable(other.to_string()),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Message roles for chat completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting as reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_quota_denial_keeps_its_kind() {
        let err: ProviderError = ClientError::QuotaDenied {
            message: "API rate limit would be exceeded".to_string(),
            seconds_until_reset: Some(30),
        }
        .into();
        assert!(matches!(err, ProviderError::QuotaDenied { .. }));
    }

    #[test]
    fn client_transport_errors_fail_closed() {
        let err: ProviderError = ClientError::Decode("bad json".to_string()).into();
        assert!(matches!(err, ProviderError::CounterUnavailable(_)));
    }

    #[test]
    fn transient_errors_are_the_io_kinds() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Network("reset".to_string()).is_transient());
        assert!(ProviderError::CounterUnavailable("refused".to_string()).is_transient());
        assert!(ProviderError::Api {
            status: 503,
            message: "overloaded".to_string()
        }
        .is_transient());

        assert!(!ProviderError::Api {
            status: 429,
            message: "slow down".to_string()
        }
        .is_transient());
        assert!(!ProviderError::QuotaDenied {
            message: "denied".to_string(),
            seconds_until_reset: Some(10)
        }
        .is_transient());
        assert!(!ProviderError::InvalidRequest("bad".to_string()).is_transient());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::system("hi");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "system");
    }
}
