//! Configuration for the counter service and the workers.
//!
//! Settings are built from defaults, an optional `tollgate.toml`, and
//! `TOLLGATE_*` environment variables (nested fields use `__`, e.g.
//! `TOLLGATE_LIMITS__COMPLETION_TOKENS_PER_MINUTE`). CLI flags override
//! everything.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub counter: CounterSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub transcription: TranscriptionSettings,
    #[serde(default)]
    pub queues: QueueSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Per-budget per-minute limits. Any positive integer is valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitSettings {
    pub completion_tokens_per_minute: u64,
    pub completion_requests_per_minute: u64,
    pub embedding_tokens_per_minute: u64,
    pub embedding_requests_per_minute: u64,
    pub transcription_requests_per_minute: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            completion_tokens_per_minute: 100_000,
            completion_requests_per_minute: 300,
            embedding_tokens_per_minute: 1_000_000,
            embedding_requests_per_minute: 700,
            transcription_requests_per_minute: 15,
        }
    }
}

/// How workers reach the counter service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CounterSettings {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatSettings {
    /// Provider resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    /// Deployment (model) identifier.
    pub deployment: String,
    pub api_version: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Completion-token headroom reserved when the caller sets no cap.
    pub default_max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-02-15-preview".to_string(),
            api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
            default_max_tokens: 1000,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingSettings {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub api_key_env: String,
    /// Inputs per provider call when batching large lists.
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: "text-embedding-3-large".to_string(),
            api_version: "2024-02-01".to_string(),
            api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
            batch_size: 100,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptionSettings {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: "whisper".to_string(),
            api_version: "2024-02-01".to_string(),
            api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSettings {
    pub input: String,
    pub output: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            input: "jobs-in".to_string(),
            output: "jobs-out".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    /// Messages leased per poll.
    pub batch_size: usize,
    /// Concurrent in-flight messages per worker process.
    pub fan_out: usize,
    /// Adaptive poll interval bounds, seconds.
    pub poll_min_seconds: u64,
    /// Upper cap the interval grows toward while the queue stays empty.
    pub poll_max_seconds: u64,
    /// Attempts per message under the backoff coordinator.
    pub max_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 8,
            fan_out: 4,
            poll_min_seconds: 1,
            poll_max_seconds: 10,
            max_attempts: 3,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_file("tollgate.toml")
    }

    /// Build settings from the config file named by the CLI, then apply
    /// CLI overrides on top (CLI > env vars > config file > defaults).
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::from_file(
            cli.config
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("config path is not valid UTF-8"))?,
        )?;
        settings.apply_cli_overrides(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn from_file(path: &str) -> Result<Self, anyhow::Error> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("TOLLGATE").separator("__"))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(counter_url) = &cli.counter_url {
            self.counter.base_url = counter_url.clone();
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let limits = [
            ("completion_tokens_per_minute", self.limits.completion_tokens_per_minute),
            ("completion_requests_per_minute", self.limits.completion_requests_per_minute),
            ("embedding_tokens_per_minute", self.limits.embedding_tokens_per_minute),
            ("embedding_requests_per_minute", self.limits.embedding_requests_per_minute),
            ("transcription_requests_per_minute", self.limits.transcription_requests_per_minute),
        ];
        for (name, value) in limits {
            if value == 0 {
                anyhow::bail!("limits.{name} must be a positive integer");
            }
        }
        if self.worker.fan_out == 0 || self.worker.batch_size == 0 {
            anyhow::bail!("worker.fan_out and worker.batch_size must be positive");
        }
        if self.worker.max_attempts == 0 {
            anyhow::bail!("worker.max_attempts must be positive");
        }
        Ok(())
    }
}
