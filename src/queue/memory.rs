//! In-memory queue with visibility-lock semantics.
//!
//! Used by the test suites and local runs. Semantics match the broker
//! contract workers are written against: at-least-once delivery, leases
//! that expire back into the ready list, explicit settle/abandon.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use super::{LeasedMessage, MessageQueue, QueueError, QueueResult};

struct Pending {
    body: String,
    delivery_count: u32,
}

struct Leased {
    body: String,
    delivery_count: u32,
    expires_at: Instant,
}

struct Inner {
    ready: VecDeque<Pending>,
    leased: HashMap<u64, Leased>,
    next_lease_id: u64,
}

pub struct InMemoryQueue {
    name: String,
    visibility: Duration,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_visibility(name, Duration::from_secs(60))
    }

    pub fn with_visibility(name: impl Into<String>, visibility: Duration) -> Self {
        Self {
            name: name.into(),
            visibility,
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                leased: HashMap::new(),
                next_lease_id: 1,
            }),
            notify: Notify::new(),
        }
    }

    /// Messages currently waiting for delivery (excludes leased ones).
    pub fn ready_len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        Self::reclaim_expired(&mut inner);
        inner.ready.len()
    }

    pub fn leased_len(&self) -> usize {
        self.inner.lock().unwrap().leased.len()
    }

    /// Move expired leases back to the ready list, bumping delivery counts.
    fn reclaim_expired(inner: &mut Inner) {
        let now = Instant::now();
        let expired: Vec<u64> = inner
            .leased
            .iter()
            .filter(|(_, l)| l.expires_at <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            if let Some(lease) = inner.leased.remove(&id) {
                debug!("lease {id} expired; message returns to the queue");
                inner.ready.push_back(Pending {
                    body: lease.body,
                    delivery_count: lease.delivery_count,
                });
            }
        }
    }

    fn try_lease(&self, max: usize) -> Vec<LeasedMessage> {
        let mut inner = self.inner.lock().unwrap();
        Self::reclaim_expired(&mut inner);

        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(pending) = inner.ready.pop_front() else {
                break;
            };
            let lease_id = inner.next_lease_id;
            inner.next_lease_id += 1;
            let delivery_count = pending.delivery_count + 1;
            inner.leased.insert(
                lease_id,
                Leased {
                    body: pending.body.clone(),
                    delivery_count,
                    expires_at: Instant::now() + self.visibility,
                },
            );
            batch.push(LeasedMessage {
                lease_id,
                body: pending.body,
                delivery_count,
            });
        }
        batch
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn lease_batch(
        &self,
        max: usize,
        max_wait: Duration,
    ) -> QueueResult<Vec<LeasedMessage>> {
        let batch = self.try_lease(max);
        if !batch.is_empty() {
            return Ok(batch);
        }
        // Nothing ready: wait for a send (or an expiry) up to max_wait,
        // then take whatever is there.
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
        Ok(self.try_lease(max))
    }

    async fn settle(&self, message: &LeasedMessage) -> QueueResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.leased.remove(&message.lease_id) {
            Some(_) => Ok(()),
            None => Err(QueueError::UnknownLease(message.lease_id)),
        }
    }

    async fn abandon(&self, message: &LeasedMessage) -> QueueResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(lease) = inner.leased.remove(&message.lease_id) else {
            return Err(QueueError::UnknownLease(message.lease_id));
        };
        inner.ready.push_back(Pending {
            body: lease.body,
            delivery_count: lease.delivery_count,
        });
        drop(inner);
        self.notify.notify_waiters();
        debug!("message abandoned on {}; it will be redelivered", self.name);
        Ok(())
    }

    async fn renew(&self, message: &LeasedMessage) -> QueueResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.leased.get_mut(&message.lease_id) {
            Some(lease) => {
                lease.expires_at = Instant::now() + self.visibility;
                Ok(())
            }
            None => Err(QueueError::UnknownLease(message.lease_id)),
        }
    }

    async fn send(&self, body: String) -> QueueResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.ready.push_back(Pending {
                body,
                delivery_count: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
