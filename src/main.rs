/*!
 * orbit-relay CLI
 *
 * Reads an S3 event notification (file or stdin) and relays every object it
 * names into the destination bucket.
 */

use clap::{Parser, ValueEnum};
use orbit_relay::{
    config::{ErrorMode, LogLevel, RelayConfig},
    error::{RelayError, Result, EXIT_SUCCESS},
    event::S3Event,
    logging,
    store::{ObjectStore, S3Store},
    transfer::{BatchRunner, TransferOptions, TransferOrchestrator},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "orbit-relay")]
#[command(version, about = "Stream objects named in an S3 event into a destination bucket", long_about = None)]
struct Cli {
    /// S3 event notification JSON ("-" reads stdin)
    #[arg(short = 'e', long = "event", value_name = "FILE", default_value = "-")]
    event: String,

    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bucket to relay objects into
    #[arg(short = 'd', long = "destination-bucket", value_name = "BUCKET")]
    destination_bucket: Option<String>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Custom endpoint URL (MinIO, LocalStack)
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Use path-style addressing
    #[arg(long)]
    force_path_style: bool,

    /// Cancel a single transfer after this many seconds
    #[arg(long = "timeout", value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Keep going after a failed transfer instead of aborting the batch
    #[arg(long)]
    continue_on_error: bool,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Resolved and validated before anything touches a store
    let config = resolve_config(&cli)?;
    config.validate()?;
    logging::init_logging(&config)?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| RelayError::Config(format!("Failed to start async runtime: {}", e)))?;
    runtime.block_on(relay(&cli.event, config))
}

/// File, then environment, then command line
fn resolve_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env()?;

    if let Some(bucket) = &cli.destination_bucket {
        config.destination_bucket = bucket.clone();
    }
    if let Some(region) = &cli.region {
        config.store.region = Some(region.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.store.endpoint = Some(endpoint.clone());
    }
    if cli.force_path_style {
        config.store.force_path_style = true;
    }
    if let Some(timeout) = cli.timeout {
        config.transfer_timeout_seconds = Some(timeout);
    }
    if cli.continue_on_error {
        config.error_mode = ErrorMode::Skip;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if let Some(path) = &cli.log_file {
        config.log_file = Some(path.clone());
    }
    config.verbose |= cli.verbose;

    Ok(config)
}

async fn read_event(source: &str) -> Result<S3Event> {
    let json = if source == "-" {
        let mut json = String::new();
        tokio::io::stdin().read_to_string(&mut json).await?;
        json
    } else {
        tokio::fs::read_to_string(source).await?
    };
    S3Event::from_json(&json)
}

async fn relay(event_source: &str, config: RelayConfig) -> Result<()> {
    let requests = read_event(event_source)
        .await?
        .into_requests(&config.destination_bucket)?;
    info!(
        records = requests.len(),
        destination_bucket = %config.destination_bucket,
        "Received event"
    );

    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::connect(&config.store).await?);
    let orchestrator = TransferOrchestrator::new(store, TransferOptions::from_config(&config));

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfers");
            cancel.cancel();
        }
    });

    let summary = BatchRunner::new(orchestrator, config.error_mode)
        .run(requests)
        .await?;

    println!("{}", serde_json::to_string(&summary)?);

    if summary.is_success() {
        Ok(())
    } else {
        Err(RelayError::Partial {
            failed: summary.failed,
            attempted: summary.attempted,
        })
    }
}
