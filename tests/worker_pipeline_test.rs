//! End-to-end worker pipeline: queue in, reservation-guarded processing,
//! queue out. Providers are stubbed; the counter is the real service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{tiny_limits, TestServer};
use tollgate::client::CounterClient;
use tollgate::config::WorkerSettings;
use tollgate::coordinator::{self, QuotaGroup};
use tollgate::provider::{ProviderError, ProviderResult};
use tollgate::queue::{InMemoryQueue, MessageQueue};
use tollgate::worker::{MessageProcessor, Worker};

/// Stands in for a provider wrapper: lock, pretend to call the provider,
/// report. `max_attempts == 1` makes quota denials fail fast instead of
/// sleeping out the window.
struct StubChatProcessor {
    client: CounterClient,
    cost: i64,
    max_attempts: u32,
}

#[async_trait]
impl MessageProcessor for StubChatProcessor {
    async fn process(&self, body: &str) -> Result<String, ProviderError> {
        let body = body.to_string();
        coordinator::run(&self.client, QuotaGroup::Completion, self.max_attempts, || {
            run_once(&self.client, self.cost, &body)
        })
        .await
    }
}

async fn run_once(client: &CounterClient, cost: i64, body: &str) -> ProviderResult<String> {
    let lease = client.lock(cost).await?;
    // Provider call would happen here.
    if let Err(err) = client.report(&lease, cost, 0).await {
        let _ = client.release(&lease).await;
        return Err(ProviderError::CounterUnavailable(err.to_string()));
    }
    Ok(format!("done:{body}"))
}

/// Locks, then fails the provider call; the hold must be released.
struct FailingProcessor {
    client: CounterClient,
}

#[async_trait]
impl MessageProcessor for FailingProcessor {
    async fn process(&self, _body: &str) -> Result<String, ProviderError> {
        let lease = self.client.lock(100).await?;
        let provider_failure = ProviderError::Api {
            status: 500,
            message: "upstream exploded".to_string(),
        };
        let _ = self.client.release(&lease).await;
        Err(provider_failure)
    }
}

fn settings(batch_size: usize, fan_out: usize) -> WorkerSettings {
    WorkerSettings {
        batch_size,
        fan_out,
        poll_min_seconds: 1,
        poll_max_seconds: 2,
        max_attempts: 1,
    }
}

async fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    predicate()
}

#[tokio::test]
async fn the_request_budget_caps_a_concurrent_fan_out() {
    let server = TestServer::with_limits(tiny_limits(100_000, 3, 1)).await;
    let client = CounterClient::new(&server.base_url, "chat-worker").unwrap();

    let input = Arc::new(InMemoryQueue::new("in"));
    let output = Arc::new(InMemoryQueue::new("out"));
    for i in 0..10 {
        input.send(format!("job-{i}")).await.unwrap();
    }

    let worker = Arc::new(Worker::new(
        "chat-worker",
        input.clone(),
        output.clone(),
        Arc::new(StubChatProcessor {
            client: client.clone(),
            cost: 10,
            max_attempts: 1,
        }),
        settings(10, 5),
    ));
    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    // Exactly three messages fit the window's request budget.
    let output_probe = output.clone();
    assert!(wait_for(|| output_probe.ready_len() == 3, Duration::from_secs(10)).await);
    worker.shutdown();
    runner.abort();

    let status = client.status().await.unwrap();
    assert_eq!(status.used_requests, 3);
    assert_eq!(status.used_tokens, 30);
    assert_eq!(status.locked_tokens, 0);
    assert_eq!(output.ready_len(), 3);
}

#[tokio::test]
async fn provider_failures_release_the_hold_and_abandon_the_message() {
    let server = TestServer::with_limits(tiny_limits(1000, 5, 1)).await;
    let client = CounterClient::new(&server.base_url, "chat-worker").unwrap();

    let input = Arc::new(InMemoryQueue::new("in"));
    let output = Arc::new(InMemoryQueue::new("out"));
    input.send("doomed".to_string()).await.unwrap();

    let worker = Arc::new(Worker::new(
        "chat-worker",
        input.clone(),
        output.clone(),
        Arc::new(FailingProcessor {
            client: client.clone(),
        }),
        settings(1, 1),
    ));
    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    // The message fails, is abandoned, and sits ready for redelivery
    // between polling cycles.
    let input_probe = input.clone();
    assert!(
        wait_for(
            || input_probe.ready_len() == 1 && input_probe.leased_len() == 0,
            Duration::from_secs(10)
        )
        .await
    );
    worker.shutdown();
    runner.abort();

    // Nothing emitted, nothing still held at the counter.
    assert_eq!(output.ready_len(), 0);
    let status = client.status().await.unwrap();
    assert_eq!(status.locked_tokens, 0);
    assert_eq!(status.used_tokens, 0);
}

/// Ten workers hammering a 5000/min budget with 1000-token jobs settle at
/// five reports per window. Runs across real window rolls, so it needs
/// minutes of wall clock.
#[tokio::test]
#[ignore]
async fn steady_state_throughput_matches_the_window_budget() {
    let server = TestServer::with_limits(tiny_limits(5000, 1000, 1)).await;

    let input = Arc::new(InMemoryQueue::new("in"));
    let output = Arc::new(InMemoryQueue::new("out"));
    for i in 0..15 {
        input.send(format!("job-{i}")).await.unwrap();
    }

    let client = CounterClient::new(&server.base_url, "fleet").unwrap();
    let mut workers = Vec::new();
    let mut runners = Vec::new();
    for w in 0..10 {
        let worker = Arc::new(Worker::new(
            format!("worker-{w}"),
            input.clone(),
            output.clone(),
            Arc::new(StubChatProcessor {
                client: client.clone(),
                cost: 1000,
                max_attempts: 5,
            }),
            settings(2, 2),
        ));
        let runner = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run().await })
        };
        workers.push(worker);
        runners.push(runner);
    }

    // 15 jobs at 5 per window: three windows, plus coordinator slack.
    let output_probe = output.clone();
    assert!(
        wait_for(
            || output_probe.ready_len() == 15,
            Duration::from_secs(4 * 60)
        )
        .await
    );
    for worker in &workers {
        worker.shutdown();
    }
    for runner in runners {
        runner.abort();
    }
}
