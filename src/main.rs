use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use formgate::config::FormgateConfig;
use formgate::ratelimit::{Backend, LimiterStatus, RateLimitDecision, RateLimiter};
use formgate::storage;
use formgate::sweep::Sweeper;

/// Slot directory used when neither the config nor `--dir` names one.
const DEFAULT_SLOT_DIR: &str = ".formgate";

/// Exit code for a request the limiter turned away.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "formgate", version)]
#[command(about = "Inspect and drive a sliding-window request limiter")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Slot directory for the durable request log
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Slot name of the request log
    #[arg(long, global = true)]
    key: Option<String>,

    /// Maximum requests per window
    #[arg(long, global = true)]
    max_requests: Option<u32>,

    /// Window length in milliseconds
    #[arg(long, global = true)]
    window_ms: Option<u64>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current window
    Status,
    /// Check whether a request would be accepted, without recording it
    Check,
    /// Record a request if the window has room
    Record,
    /// Clear the request log
    Reset,
    /// Periodically evict expired entries until interrupted
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = FormgateConfig::load(cli.config.as_deref())?;
    if let Some(max_requests) = cli.max_requests {
        config.limiter.max_requests = max_requests;
    }
    if let Some(window_ms) = cli.window_ms {
        config.limiter.window_ms = window_ms;
    }
    if let Some(key) = cli.key {
        config.limiter.storage_key = key;
    }
    if config.limiter.backend == Backend::Transient {
        warn!("Transient backend does not outlive this command, using the durable backend");
        config.limiter.backend = Backend::Durable;
    }
    config.storage.dir = cli
        .dir
        .or(config.storage.dir.take())
        .or_else(|| Some(PathBuf::from(DEFAULT_SLOT_DIR)));
    config.validate()?;

    let slots = storage::open(&config.storage)?;
    let limiter = Arc::new(RateLimiter::new(config.limiter.clone(), slots)?);

    let code = match cli.command {
        Command::Status => {
            println!("{}", render_status(&limiter.status(), cli.json)?);
            ExitCode::SUCCESS
        }
        Command::Check => {
            let status = limiter.status();
            println!("{}", render_status(&status, cli.json)?);
            exit_for(status.can_make_request)
        }
        Command::Record => {
            let decision = limiter.try_record();
            println!("{}", render_decision(&decision, cli.json));
            exit_for(decision.is_allowed())
        }
        Command::Reset => {
            limiter.reset();
            info!(storage_key = %limiter.storage_key(), "Request log cleared");
            ExitCode::SUCCESS
        }
        Command::Sweep => {
            let Some(sweeper) = Sweeper::from_config(&config.sweep) else {
                warn!("Sweep is disabled in the configuration, nothing to do");
                return Ok(ExitCode::SUCCESS);
            };
            if !sweeper.watch(limiter.clone()) {
                warn!(storage_key = %limiter.storage_key(), "Request log is not sweepable");
                return Ok(ExitCode::SUCCESS);
            }
            shutdown_signal().await;
            sweeper.shutdown();
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

fn exit_for(allowed: bool) -> ExitCode {
    ExitCode::from(exit_code(allowed))
}

fn exit_code(allowed: bool) -> u8 {
    if allowed {
        0
    } else {
        EXIT_REJECTED
    }
}

fn render_status(status: &LimiterStatus, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(status)?);
    }
    Ok(format!(
        "{}/{} requests in window, {} remaining, can record: {}, next slot in {} ms",
        status.request_count,
        status.max_requests,
        status.remaining_requests,
        if status.can_make_request { "yes" } else { "no" },
        status.time_until_reset,
    ))
}

fn render_decision(decision: &RateLimitDecision, json: bool) -> String {
    match (decision, json) {
        (RateLimitDecision::Allowed, true) => serde_json::json!({ "allowed": true }).to_string(),
        (RateLimitDecision::Allowed, false) => "allowed".to_string(),
        (RateLimitDecision::Rejected { retry_after_ms, window_ms }, true) => serde_json::json!({
            "allowed": false,
            "retryAfterMs": retry_after_ms,
            "windowMs": window_ms,
        })
        .to_string(),
        (RateLimitDecision::Rejected { retry_after_ms, .. }, false) => {
            format!("rejected, retry in {} ms", retry_after_ms)
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping sweep");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping sweep");
        }
    }
}
