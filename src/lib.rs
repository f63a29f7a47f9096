//! # Tollgate
//!
//! Tollgate lets a fleet of worker processes share a small set of global
//! per-minute provider quotas. A single counter process owns a family of
//! tumbling-minute budgets (tokens and requests for chat completions and
//! embeddings, requests only for transcription) and arbitrates
//! reservations over a JSON HTTP surface. Workers estimate a call's cost,
//! lock it, invoke the provider, and report what was actually used; a
//! refused reservation becomes a targeted sleep to the end of the window
//! rather than a retry storm.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate::config::LimitSettings;
//! use tollgate::counter::CounterState;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let state = Arc::new(CounterState::new(LimitSettings::default()));
//!     let app = tollgate::create_app(state);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **counter**: the budgets and their HTTP handlers (the only writer)
//! - **client**: the in-worker reservation library
//! - **coordinator / retry**: quota denials become waits aligned to the
//!   window roll; transient I/O gets exponential backoff
//! - **provider**: chat/embedding/transcription wrappers carrying the
//!   lock/invoke/report/release contract
//! - **queue / worker**: the at-least-once message loop around it all

pub mod cli;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod counter;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod token;
pub mod worker;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use counter::handlers;
use counter::CounterState;

/// Build the counter service router: the completion group at the root,
/// embeddings under `/embedding`, transcription under `/transcription`.
pub fn create_app(state: Arc<CounterState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/lock", post(handlers::lock_completion))
        .route("/report", post(handlers::report_completion))
        .route("/release", post(handlers::release_completion))
        .route("/status", get(handlers::status_completion))
        .route("/embedding/lock", post(handlers::lock_embedding))
        .route("/embedding/report", post(handlers::report_embedding))
        .route("/embedding/release", post(handlers::release_embedding))
        .route("/embedding/status", get(handlers::status_embedding))
        .route("/transcription/lock", post(handlers::lock_transcription))
        .route("/transcription/report", post(handlers::report_transcription))
        .route("/transcription/release", post(handlers::release_transcription))
        .route("/transcription/status", get(handlers::status_transcription))
        .layer(axum::middleware::from_fn(handlers::error_body_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
