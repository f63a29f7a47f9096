//! Worker pipeline skeleton.
//!
//! One cooperative loop per process: lease a batch, process messages
//! concurrently up to a small fan-out, emit results, settle. A message is
//! settled only after its result is on the output queue; any failure
//! abandons it so the broker redelivers. The poll interval adapts to the
//! queue: it snaps to the minimum after a productive batch and grows by a
//! second per empty one, up to a cap.

pub mod chat;
pub mod embedding;
pub mod transcription;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::config::WorkerSettings;
use crate::provider::ProviderError;
use crate::queue::{LeasedMessage, MessageQueue};
use crate::retry::{retry_transient, RetryPolicy};

/// How long one lease poll blocks waiting for the first message.
const LEASE_WAIT: Duration = Duration::from_secs(3);

/// Visibility-lock renewal cadence for long-running messages.
const RENEW_INTERVAL: Duration = Duration::from_secs(30);

/// Domain logic for one message: decode, call the provider under the
/// backoff coordinator, and return the outbound payload.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, body: &str) -> Result<String, ProviderError>;
}

pub struct Worker {
    name: String,
    input: Arc<dyn MessageQueue>,
    output: Arc<dyn MessageQueue>,
    processor: Arc<dyn MessageProcessor>,
    settings: WorkerSettings,
    retry_policy: RetryPolicy,
    running: AtomicBool,
    total_processed: AtomicU64,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        input: Arc<dyn MessageQueue>,
        output: Arc<dyn MessageQueue>,
        processor: Arc<dyn MessageProcessor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            processor,
            settings,
            retry_policy: RetryPolicy::default(),
            running: AtomicBool::new(false),
            total_processed: AtomicU64::new(0),
        }
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    /// Ask the loop to stop after the current batch.
    pub fn shutdown(&self) {
        info!("{}: shutdown requested", self.name);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the lease/process/settle loop until [`Worker::shutdown`].
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("{}: worker loop starting", self.name);

        let mut idle_sleep = self.settings.poll_min_seconds;
        while self.running.load(Ordering::SeqCst) {
            let batch = match self
                .input
                .lease_batch(self.settings.batch_size, LEASE_WAIT)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    error!("{}: failed to lease messages: {err}", self.name);
                    tokio::time::sleep(Duration::from_secs(idle_sleep)).await;
                    continue;
                }
            };

            let produced = stream::iter(batch)
                .map(|message| self.handle(message))
                .buffer_unordered(self.settings.fan_out)
                .filter(|ok| futures::future::ready(*ok))
                .count()
                .await as u64;

            self.total_processed.fetch_add(produced, Ordering::Relaxed);

            if produced > 0 {
                idle_sleep = self.settings.poll_min_seconds;
            } else if idle_sleep < self.settings.poll_max_seconds {
                idle_sleep += 1;
            }
            info!(
                "{}: {produced} messages this batch, {} total -> sleeping {idle_sleep}s",
                self.name,
                self.total_processed()
            );

            if self.running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(idle_sleep)).await;
            }
        }
        info!("{}: worker loop stopped", self.name);
    }

    /// Process one message to a terminal state within its visibility lock,
    /// renewing the lock while the processor runs. Returns whether the
    /// message produced output.
    async fn handle(&self, message: LeasedMessage) -> bool {
        let result = {
            let process = self.processor.process(&message.body);
            tokio::pin!(process);
            let mut renew = tokio::time::interval(RENEW_INTERVAL);
            renew.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    result = &mut process => break result,
                    _ = renew.tick() => {
                        if let Err(err) = self.input.renew(&message).await {
                            warn!("{}: lock renewal failed: {err}", self.name);
                        }
                    }
                }
            }
        };

        match result {
            Ok(outbound) => {
                // Broker blips on the emit are transient: retry with
                // backoff before giving the message up for redelivery.
                let emitted = retry_transient(&self.retry_policy, "emit result", |_| true, || {
                    self.output.send(outbound.clone())
                })
                .await;
                if let Err(err) = emitted {
                    error!("{}: failed to emit result: {err}", self.name);
                    let _ = self.input.abandon(&message).await;
                    return false;
                }
                if let Err(err) = self.input.settle(&message).await {
                    // The lock may have expired mid-flight; the broker will
                    // redeliver and the counter has already been settled.
                    warn!("{}: settle failed: {err}", self.name);
                }
                true
            }
            Err(err) => {
                warn!(
                    "{}: processing failed (delivery {}): {err}",
                    self.name, message.delivery_count
                );
                if let Err(abandon_err) = self.input.abandon(&message).await {
                    warn!("{}: abandon failed: {abandon_err}", self.name);
                }
                false
            }
        }
    }
}
