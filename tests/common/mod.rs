use std::net::SocketAddr;
use std::sync::Arc;

use tollgate::config::LimitSettings;
use tollgate::counter::CounterState;

/// An in-process counter service bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub state: Arc<CounterState>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_limits(LimitSettings::default()).await
    }

    pub async fn with_limits(limits: LimitSettings) -> Self {
        let state = Arc::new(CounterState::new(limits));
        let app = tollgate::create_app(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for the server to accept connections
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        TestServer {
            addr,
            base_url,
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Limits small enough to exhaust in one test.
pub fn tiny_limits(
    completion_tokens: u64,
    completion_requests: u64,
    transcription_requests: u64,
) -> LimitSettings {
    LimitSettings {
        completion_tokens_per_minute: completion_tokens,
        completion_requests_per_minute: completion_requests,
        embedding_tokens_per_minute: completion_tokens,
        embedding_requests_per_minute: completion_requests,
        transcription_requests_per_minute: transcription_requests,
    }
}
