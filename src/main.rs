//! Certkeeper - private PKI lifecycle manager
//!
//! `certkeeper` watches certificate request files and keeps the described
//! keys and certificates issued and renewed. `certkeeper agent` runs the
//! remote agent storing material pushed to it.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use certkeeper::config::{LogFormat, LogTarget, LoggingConfig};
use certkeeper::daemon::Daemon;
use certkeeper::services::{
    start_certificate_scheduler, start_certificate_watcher, CertificateManager,
};
use certkeeper::{api, server, AgentState, AppConfig};

#[derive(Debug, PartialEq)]
enum Command {
    Manager,
    Agent,
    Version,
    Help,
}

struct Cli {
    command: Command,
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args(env::args().skip(1))?;

    match cli.command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("certkeeper {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Manager | Command::Agent => {}
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // The guard flushes file logs on drop and must outlive every task
    let _log_guard = init_logging(&config.logging);

    info!("certkeeper {} starting up", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Command::Agent => run_agent(&config).await,
        _ => run_manager(&config).await,
    };

    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}

fn parse_args<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = Cli {
        command: Command::Manager,
        config: None,
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" | "help" => cli.command = Command::Help,
            "-V" | "--version" | "version" => cli.command = Command::Version,
            "agent" => cli.command = Command::Agent,
            "-c" | "--config" => {
                let path = args.next().context("Missing value for --config")?;
                cli.config = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(cli)
}

/// Run the scheduler and the watcher until a termination signal
async fn run_manager(config: &AppConfig) -> Result<()> {
    let request_dirs = config.manager.certificate_requests.paths.clone();
    if request_dirs.is_empty() {
        warn!("No certificate request directory configured");
    }

    let manager = Arc::new(CertificateManager::new(config.defaults.clone(), request_dirs));
    let mut daemon = Daemon::new(config.shutdown_timeout());

    daemon.push(
        "certificate scheduler",
        start_certificate_scheduler(manager.clone(), config.interval(), daemon.shutdown_token()),
    );

    let watcher = start_certificate_watcher(manager, daemon.shutdown_token())
        .context("Failed to start certificate watcher")?;
    daemon.push("certificate watcher", watcher);

    daemon.run_until_signal().await
}

/// Run the agent endpoint until a termination signal
async fn run_agent(config: &AppConfig) -> Result<()> {
    let tls = config
        .agent
        .tls
        .as_ref()
        .map(server::build_server_config)
        .transpose()?;
    let listener = server::bind(config.listen_addr()?).await?;
    let app = api::create_router(AgentState::default());

    let mut daemon = Daemon::new(config.shutdown_timeout());
    let shutdown = daemon.shutdown_token();
    let server_shutdown = shutdown.clone();

    daemon.push(
        "agent server",
        tokio::spawn(async move {
            if let Err(e) = server::serve(app, listener, tls, server_shutdown).await {
                error!("Agent server failed: {:#}", e);
                shutdown.cancel();
            }
        }),
    );

    daemon.run_until_signal().await
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let to_console = matches!(config.target, LogTarget::Console | LogTarget::Both);
    let (file_writer, guard) = match config.target {
        LogTarget::Console => (None, None),
        LogTarget::File | LogTarget::Both => {
            let (writer, guard) = create_file_writer(config);
            (Some(writer), Some(guard))
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(to_console.then(|| fmt_layer(&config.format, std::io::stdout)))
        .with(file_writer.map(|writer| fmt_layer(&config.format, writer)))
        .init();

    guard
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    config: &LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            config.log_dir, e
        );
    }

    let file_appender = if config.daily_rotation {
        tracing_appender::rolling::daily(&config.log_dir, &config.log_prefix)
    } else {
        tracing_appender::rolling::never(&config.log_dir, &config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Format layer for one output
fn fmt_layer<S, W>(
    format: &LogFormat,
    writer: W,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::{fmt, Layer};

    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Print help message
fn print_help() {
    println!(
        r#"certkeeper {}

USAGE:
    certkeeper [OPTIONS]            Run the certificate manager
    certkeeper [OPTIONS] agent      Run the remote agent
    certkeeper version              Print version information

OPTIONS:
    -c, --config <FILE>     Configuration file
    -h, --help              Print this help message
    -V, --version           Print version information

ENVIRONMENT:
    CERTKEEPER_CONFIG                   Path to configuration file
    CERTKEEPER_INTERVAL_SECS            Seconds between two full scans
    CERTKEEPER_REQUEST_PATHS            Comma separated request directories
    CERTKEEPER_SHUTDOWN_TIMEOUT_SECS    Graceful shutdown bound
    CERTKEEPER_AGENT_LISTEN             Agent listen address
    CERTKEEPER_LOG_FORMAT               pretty, json or compact
    RUST_LOG                            Log filter

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. --config
    2. CERTKEEPER_CONFIG
    3. ./config.yaml, ./config/config.yaml
    4. /etc/certkeeper/config.yaml
    5. <user config dir>/certkeeper/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
