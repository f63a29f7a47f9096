use std::sync::Arc;

use clap::Parser;
use tollgate::cli::{Cli, Commands, WorkerKind};
use tollgate::client::CounterClient;
use tollgate::config::Settings;
use tollgate::counter::CounterState;
use tollgate::provider::chat::ChatProvider;
use tollgate::provider::embedding::EmbeddingProvider;
use tollgate::provider::transcription::TranscriptionProvider;
use tollgate::queue::InMemoryQueue;
use tollgate::worker::chat::ChatJobProcessor;
use tollgate::worker::embedding::EmbeddingJobProcessor;
use tollgate::worker::transcription::TranscriptionJobProcessor;
use tollgate::worker::{MessageProcessor, Worker};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;

    match cli.command.clone().unwrap_or(Commands::Counter) {
        Commands::Counter => serve_counter(settings).await,
        Commands::Worker { kind } => run_worker(settings, kind).await,
    }
}

async fn serve_counter(settings: Settings) -> anyhow::Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("starting tollgate counter on {addr}");

    let state = Arc::new(CounterState::new(settings.limits.clone()));
    let app = tollgate::create_app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_worker(settings: Settings, kind: WorkerKind) -> anyhow::Result<()> {
    let app_id = format!("{kind:?}-worker").to_lowercase();
    info!(
        "starting {app_id} against counter at {}",
        settings.counter.base_url
    );

    let counter = Arc::new(CounterClient::with_timeout(
        settings.counter.base_url.clone(),
        app_id.clone(),
        std::time::Duration::from_secs(settings.counter.timeout_seconds),
    )?);

    let processor: Arc<dyn MessageProcessor> = match kind {
        WorkerKind::Chat => Arc::new(ChatJobProcessor::new(
            Arc::new(ChatProvider::new(&settings.chat, counter)?),
            settings.worker.max_attempts,
        )),
        WorkerKind::Embedding => Arc::new(EmbeddingJobProcessor::new(
            Arc::new(EmbeddingProvider::new(&settings.embedding, counter)?),
            settings.worker.max_attempts,
        )),
        WorkerKind::Transcription => Arc::new(TranscriptionJobProcessor::new(
            Arc::new(TranscriptionProvider::new(&settings.transcription, counter)?),
            settings.worker.max_attempts,
        )),
    };

    // The broker binding is a deployment concern; the default transport is
    // the in-process queue, with the real broker plugged in at the
    // MessageQueue seam.
    let input = Arc::new(InMemoryQueue::new(settings.queues.input.clone()));
    let output = Arc::new(InMemoryQueue::new(settings.queues.output.clone()));

    let worker = Arc::new(Worker::new(
        app_id,
        input,
        output,
        processor,
        settings.worker.clone(),
    ));

    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    tokio::signal::ctrl_c().await?;
    worker.shutdown();
    runner.await?;
    Ok(())
}
