use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shared per-minute quota admission control for LLM pipelines.
#[derive(Parser, Debug, Clone)]
#[command(name = "tollgate", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "TOLLGATE_CONFIG", default_value = "tollgate.toml")]
    pub config: PathBuf,

    /// Counter server host address
    #[arg(long, env = "TOLLGATE_HOST")]
    pub host: Option<String>,

    /// Counter server port
    #[arg(long, env = "TOLLGATE_PORT")]
    pub port: Option<u16>,

    /// Base URL of the counter service (worker mode)
    #[arg(long, env = "TOLLGATE_COUNTER_URL")]
    pub counter_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the central counter service (the default)
    Counter,
    /// Run a worker process against the counter
    Worker {
        /// Which provider pipeline this worker drives
        #[arg(long, value_enum, default_value = "chat")]
        kind: WorkerKind,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Chat,
    Embedding,
    Transcription,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["tollgate"]);
        assert_eq!(cli.config, PathBuf::from("tollgate.toml"));
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_worker_subcommand() {
        let cli = Cli::parse_from(["tollgate", "worker", "--kind", "embedding"]);
        match cli.command {
            Some(Commands::Worker { kind }) => assert_eq!(kind, WorkerKind::Embedding),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_counter_subcommand() {
        let cli = Cli::parse_from(["tollgate", "--port", "8080", "counter"]);
        assert_eq!(cli.port, Some(8080));
        assert!(matches!(cli.command, Some(Commands::Counter)));
    }
}
