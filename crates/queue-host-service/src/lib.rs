//! # Queue Host Service
//!
//! Runs a [`BatchHostExecutor`] against the in-memory stores with a simulated
//! work handler. Useful for exercising renewal, singleton and dead-letter
//! behaviour locally.
//!
//! This module provides:
//! - Command-line arguments
//! - Layered configuration loading (file, explicit path, environment)
//! - Logging initialization
//! - Seed message loading from a JSON lines file
//! - The simulated work handler

use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use queue_host::{
    BatchHostExecutor, CancellationToken, ConfigurationError, HostError, HostRunOptions,
    InMemoryLockStore, InMemoryMessageStore, Message, MessageExecutor, ProcessingError,
    QueueError, ReceivedMessage, RunSummary,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "QH_CONFIG_FILE";

/// Prefix of configuration environment variables
pub const CONFIG_ENV_PREFIX: &str = "QH";

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue host - lease-aware queue consumption
#[derive(Debug, Parser)]
#[command(name = "queue-host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Consume a queue with visibility renewal and singleton locks")]
pub struct Cli {
    /// Run mode
    #[arg(short, long, value_enum, default_value = "listen")]
    pub mode: RunMode,

    /// Configuration file path
    #[arg(short, long, env = CONFIG_FILE_ENV)]
    pub config: Option<PathBuf>,

    /// JSON lines file of messages to enqueue before starting
    #[arg(short, long)]
    pub seed: Option<PathBuf>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,
}

/// How the host runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum RunMode {
    /// Drain one batch and exit
    Job,
    /// Keep polling until interrupted
    Listen,
}

// ============================================================================
// Errors
// ============================================================================

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration could not be loaded: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Seed file {path} is invalid at line {line}: {message}")]
    Seed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Host failed: {0}")]
    Host(#[from] HostError),
}

impl ServiceError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Load(_) | Self::Configuration(_) => 3,
            Self::Seed { .. } | Self::Io(_) => 4,
            Self::Queue(_) | Self::Host(_) => 5,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Full service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: HostRunOptions,
    pub handler: HandlerConfig,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.host.validate()
    }
}

/// Simulated handler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Time each message takes to process
    pub work_duration_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            work_duration_ms: 250,
        }
    }
}

/// Load configuration from the layered sources.
///
/// Sources, later ones overriding earlier ones:
///  1. `/etc/queue-host/host.yaml`
///  2. `./config/host.yaml`
///  3. `explicit_path`, which must exist when given
///  4. Environment variables prefixed `QH__` (`QH__HOST__BATCH_SIZE=8`)
///
/// Every field has a default, so no sources at all yields a valid config.
pub fn load_configuration(explicit_path: Option<&Path>) -> Result<ServiceConfig, ServiceError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/queue-host/host")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/host")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(path) = explicit_path {
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(
            config::File::from(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let service_config: ServiceConfig = config.try_deserialize()?;
    service_config.validate()?;
    Ok(service_config)
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn initialize_logging(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "queue_host=info,queue_host_service=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

// ============================================================================
// Seed Messages
// ============================================================================

/// One line of a seed file
#[derive(Debug, Clone, Deserialize)]
struct SeedMessage {
    body: serde_json::Value,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// Parse a JSON lines seed file. Blank lines are skipped.
pub fn parse_seed_messages(path: &Path, contents: &str) -> Result<Vec<Message>, ServiceError> {
    let mut messages = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let seed_error = |message: String| ServiceError::Seed {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        };

        let seed: SeedMessage =
            serde_json::from_str(line).map_err(|e| seed_error(e.to_string()))?;
        let body = serde_json::to_vec(&seed.body).map_err(|e| seed_error(e.to_string()))?;

        let mut message = Message::new(body);
        message.group_id = seed.group_id;
        message.attributes = seed.attributes;
        messages.push(message);
    }

    Ok(messages)
}

/// Read and parse a seed file
pub async fn load_seed_messages(path: &Path) -> Result<Vec<Message>, ServiceError> {
    let contents = tokio::fs::read_to_string(path).await?;
    parse_seed_messages(path, &contents)
}

// ============================================================================
// Simulated Work Handler
// ============================================================================

/// Handler that sleeps for a fixed time and fails bodies marked `"fail": true`
pub struct SimulatedWorkHandler {
    work_duration: Duration,
}

impl SimulatedWorkHandler {
    pub fn new(work_duration: Duration) -> Self {
        Self { work_duration }
    }
}

#[async_trait]
impl MessageExecutor for SimulatedWorkHandler {
    async fn execute(
        &self,
        message: &ReceivedMessage,
        cancellation: CancellationToken,
    ) -> Result<(), ProcessingError> {
        tokio::select! {
            _ = cancellation.cancelled() => return Err(ProcessingError::Cancelled),
            _ = tokio::time::sleep(self.work_duration) => {}
        }

        let marked_failed = serde_json::from_slice::<serde_json::Value>(&message.body)
            .ok()
            .and_then(|body| body.get("fail").and_then(serde_json::Value::as_bool))
            .unwrap_or(false);

        if marked_failed {
            return Err(anyhow::anyhow!("message {} is marked to fail", message.message_id).into());
        }

        info!(
            message_id = %message.message_id,
            group_id = message.group_id.as_deref().unwrap_or_default(),
            dequeue_count = message.dequeue_count,
            "Simulated work complete"
        );
        Ok(())
    }
}

// ============================================================================
// Run
// ============================================================================

/// Seed the in-memory queue, build the host and run it in `mode`
pub async fn run_host(
    config: ServiceConfig,
    mode: RunMode,
    seed: Vec<Message>,
    cancellation: &CancellationToken,
) -> Result<RunSummary, ServiceError> {
    let store = Arc::new(InMemoryMessageStore::new());
    for message in seed {
        store.send(message)?;
    }
    info!(ready = store.ready_count(), "Queue seeded");

    let handler = Arc::new(SimulatedWorkHandler::new(Duration::from_millis(
        config.handler.work_duration_ms,
    )));

    let host = BatchHostExecutor::builder()
        .message_store(store.clone())
        .executor(handler)
        .lock_store(Arc::new(InMemoryLockStore::new()))
        .options(config.host)
        .build()?;

    let summary = match mode {
        RunMode::Job => host.run_once(cancellation).await?,
        RunMode::Listen => host.run_until_cancelled(cancellation).await?,
    };

    let dead_letters = store.dead_letters();
    if !dead_letters.is_empty() {
        warn!(count = dead_letters.len(), "Messages in dead letter queue");
    }

    Ok(summary)
}

/// Cancel `shutdown` once `signal` fires.
///
/// A signal listener that cannot be installed leaves the host running.
pub async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown requested");
            shutdown.cancel();
        }
        Err(error) => {
            warn!(error = %error, "Could not listen for ctrl-c; stop the process another way");
        }
    }
}

/// Entry point used by the binary: load everything from `cli` and run until
/// done or interrupted with ctrl-c
pub async fn run(cli: Cli) -> Result<RunSummary, ServiceError> {
    let config = load_configuration(cli.config.as_deref())?;

    let seed = match &cli.seed {
        Some(path) => load_seed_messages(path).await?,
        None => Vec::new(),
    };

    let cancellation = CancellationToken::new();
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), cancellation.clone()));

    info!(mode = ?cli.mode, batch_size = config.host.batch_size, "Starting queue host");
    run_host(config, cli.mode, seed, &cancellation).await
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
