use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use gcp_bindings::asset::AssetTypeRegistry;
use gcp_bindings::batch;
use gcp_bindings::config::{self, EngineConfig};
use gcp_bindings::engine::BindingEngine;
use gcp_bindings::gcp::auth::{self, GcpCredentials};
use gcp_bindings::gcp::client::RestConnector;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

/// Grant IAM roles on GCP resources from a CSV file
#[derive(Parser, Debug)]
#[command(name = "gcp-bindings", version = config::VERSION, about, long_about = None)]
struct Args {
    /// CSV with user_email, role, asset_name, asset_type, project_id columns
    csv_file: Option<PathBuf>,

    /// Service account key file (defaults to Application Default Credentials)
    #[arg(short, long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Use this OAuth access token instead of loading credentials
    #[arg(long, env = "GCP_BINDINGS_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Asset type document (JSON or YAML) merged over the built-in types
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective asset types to this file (JSON or YAML) and exit
    #[arg(long)]
    export_config: Option<PathBuf>,

    /// Print the supported asset types and exit
    #[arg(long)]
    list_asset_types: bool,

    /// Fetch each policy but do not change anything
    #[arg(long)]
    dry_run: bool,

    /// Pause between requests, in milliseconds
    #[arg(long, default_value_t = 500)]
    delay_ms: u64,

    /// Project used when a row leaves project_id empty
    #[arg(short, long)]
    project: Option<String>,

    /// Send all API traffic to this endpoint instead of *.googleapis.com
    #[arg(long)]
    endpoint: Option<Url>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Only log to the console
    #[arg(long)]
    no_log_file: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn setup_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = args.log_level.to_tracing_level()?;

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(tracing_level).into())
        .from_env_lossy();

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let log_path = args.log_file.clone().unwrap_or_else(config::default_log_path);
    let (file_layer, guard) = if args.no_log_file {
        (None, None)
    } else {
        match open_log_file(&log_path) {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true);
                (Some(layer), Some(guard))
            },
            Err(err) => {
                eprintln!("Warning: cannot open log file {}: {}", log_path.display(), err);
                (None, None)
            },
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    tracing::debug!("gcp-bindings {} started with log level: {:?}", config::VERSION, args.log_level);
    if guard.is_some() {
        tracing::debug!("Log file: {:?}", log_path);
    }

    guard
}

fn print_asset_types(registry: &AssetTypeRegistry) {
    for asset_type in registry.list() {
        if let Some(descriptor) = registry.get(asset_type) {
            println!(
                "{}\t{} {}\t{}",
                asset_type,
                descriptor.service_name,
                descriptor.version,
                descriptor.pattern()
            );
        }
    }
}

async fn load_credentials(args: &Args) -> Result<GcpCredentials> {
    if let Some(token) = &args.access_token {
        tracing::info!("Using access token from the command line");
        return Ok(GcpCredentials::from_access_token(token.clone()));
    }
    match &args.credentials {
        Some(path) => GcpCredentials::from_service_account_file(path),
        None => GcpCredentials::new().await,
    }
}

/// Ctrl-C stops the batch after the row in flight
fn spawn_interrupt_watcher(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing the current row");
            stop.store(true, Ordering::SeqCst);
        }
    });
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut registry = AssetTypeRegistry::new();
    if let Some(path) = &args.config {
        registry
            .load_from_document(path)
            .with_context(|| format!("Failed to load asset types from {}", path.display()))?;
    }

    let mut handled = false;
    if args.list_asset_types {
        print_asset_types(&registry);
        handled = true;
    }
    if let Some(path) = &args.export_config {
        registry
            .export_to_document(path)
            .with_context(|| format!("Failed to export asset types to {}", path.display()))?;
        handled = true;
    }

    let Some(csv_file) = &args.csv_file else {
        if handled {
            return Ok(ExitCode::SUCCESS);
        }
        bail!("No CSV file given (see --help)");
    };

    let rows = batch::read_rows(csv_file)?;
    let mode = if args.dry_run { "dry-run" } else { "apply" };
    tracing::info!("Processing {} rows from {} ({})", rows.len(), csv_file.display(), mode);

    let credentials = load_credentials(&args).await?;
    let default_project = args
        .project
        .clone()
        .or_else(auth::get_default_project);

    let config = EngineConfig::default()
        .with_endpoint(args.endpoint.clone())
        .with_default_project(default_project);
    let connector = RestConnector::new(credentials, &config.user_agent)
        .context("Failed to build HTTP client")?
        .with_endpoint(config.endpoint.clone());
    let mut engine = BindingEngine::new(registry, Arc::new(connector), config);

    let stop = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(stop.clone());

    let report = batch::run_batch(
        &mut engine,
        &rows,
        args.dry_run,
        Duration::from_millis(args.delay_ms),
        &stop,
    )
    .await;
    report.log_summary();

    if report.has_failures() || report.cancelled {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = setup_logging(&args);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}
