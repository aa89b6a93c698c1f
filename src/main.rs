use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use forgeserve::config::{self, Config, LogFormat};
use forgeserve::git::parse_env_entry;
use forgeserve::{Engine, ServiceCommand, ServiceError};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "forgeserve",
    about = "Serve one git wire-protocol service over stdin/stdout"
)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra environment for the service process (repeatable).
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_arg)]
    env: Vec<(String, String)>,

    /// Deadline in seconds; overrides `git.timeout_secs`.
    #[arg(long)]
    timeout: Option<u64>,

    /// Wire service name, e.g. `git-upload-pack`.
    service: String,

    /// Repository directory.
    dir: PathBuf,

    /// Extra arguments inserted before the repository argument.
    #[arg(last = true)]
    args: Vec<String>,
}

fn parse_env_arg(s: &str) -> std::result::Result<(String, String), String> {
    parse_env_entry(s).ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// stdout carries protocol bytes, so every log line goes to stderr.
fn init_tracing(format: LogFormat) {
    let (json, pretty) = match format {
        LogFormat::Json => (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json)
        .with(pretty)
        .init();
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// Map a service outcome onto the process exit code, git style.
fn exit_code(result: &std::result::Result<(), ServiceError>, dir: &std::path::Path) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(ServiceError::InvalidRepository) => {
            eprintln!(
                "fatal: '{}' does not appear to be a git repository",
                dir.display()
            );
            ExitCode::from(128)
        }
        Err(ServiceError::Exit { status, .. }) => {
            let code = status.code().unwrap_or(1).clamp(1, 255);
            ExitCode::from(code as u8)
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(secs) = cli.timeout {
        config.git.timeout_secs = secs;
    }

    init_tracing(config.log.format);
    tracing::info!(
        service = %cli.service,
        dir = %cli.dir.display(),
        "starting forgeserve"
    );

    let dir = std::fs::canonicalize(&cli.dir).unwrap_or_else(|_| cli.dir.clone());
    let engine = Engine::from_config(&config);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let cmd = ServiceCommand::new(&dir)
        .envs(cli.env)
        .args(cli.args)
        .stdin(tokio::io::stdin())
        .stdout(tokio::io::stdout())
        .stderr(tokio::io::stderr());

    let result = engine.serve(&cli.service, &cancel, cmd).await;
    Ok(exit_code(&result, &dir))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    };

    // The stdin reader sits on a blocking thread that may never return once
    // the child has exited; do not wait for it.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}
