//! Message queue seam.
//!
//! The broker itself is an external collaborator; workers only depend on
//! this trait. Delivery is at-least-once with per-message visibility
//! locks: a leased message that is neither settled nor abandoned becomes
//! visible again when its lock expires.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("unknown or expired lease {0}")]
    UnknownLease(u64),
    #[error("queue transport error: {0}")]
    Transport(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// A message held under a visibility lock by exactly one worker.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    /// Lease identifier, valid until settle/abandon/expiry.
    pub lease_id: u64,
    pub body: String,
    /// How many times this message has been delivered, this lease included.
    pub delivery_count: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Lease up to `max` messages, waiting at most `max_wait` for the first.
    async fn lease_batch(&self, max: usize, max_wait: Duration)
        -> QueueResult<Vec<LeasedMessage>>;

    /// Acknowledge a message; it will not be delivered again.
    async fn settle(&self, message: &LeasedMessage) -> QueueResult<()>;

    /// Return a message for redelivery.
    async fn abandon(&self, message: &LeasedMessage) -> QueueResult<()>;

    /// Extend the visibility lock of a long-running message.
    async fn renew(&self, message: &LeasedMessage) -> QueueResult<()>;

    /// Enqueue a new message.
    async fn send(&self, body: String) -> QueueResult<()>;
}
