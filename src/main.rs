// stt-gate - Main Entry Point
//
// Command-line front end for the admission gate:
// - HTTP admission API with startup reconciliation
// - One-shot admission and status commands
// - Gated transcription of local media files

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use stt_gate::api_server;
use stt_gate::config::Config;
use stt_gate::pipeline::{HttpTranscriber, JobOutcome, JobPipeline, LocalFileSource};
use stt_gate::rate_limit::{AdmissionController, SqliteQuotaStore, UserId};
use tracing::{error, info, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// stt-gate: per-user quota gate for a speech-to-text API
#[derive(Parser, Debug)]
#[command(name = "stt-gate")]
#[command(author = "stt-gate Contributors")]
#[command(version)]
#[command(about = "Per-user self-healing quota gate for a paid speech-to-text API", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep quota state in memory instead of the SQLite store
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the admission API
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one admission check for a user
    Admit {
        /// User identifier
        user: String,
    },
    /// Show the stored quota record for a user
    Status {
        /// User identifier
        user: String,
    },
    /// Show a summary of every quota record
    List,
    /// Transcribe a local media file through the gated pipeline
    Transcribe {
        /// User the job is charged to
        #[arg(long)]
        user: String,

        /// Media file to transcribe
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config, args.verbose)?;

    info!("stt-gate v{} starting...", env!("CARGO_PKG_VERSION"));

    let Some(command) = args.command else {
        info!("No command specified. Use \"stt-gate --help\" for usage.");
        return Ok(());
    };

    let controller = build_controller(&config, args.ephemeral)?;

    let result = match command {
        Commands::Serve { port } => serve(&config, controller.clone(), port).await,
        Commands::Admit { user } => admit(&controller, &user).await,
        Commands::Status { user } => status(&controller, &user).await,
        Commands::List => list(&controller).await,
        Commands::Transcribe { user, file } => {
            transcribe(&config, controller.clone(), &user, &file).await
        }
    };

    controller.shutdown().await;
    result
}

/// Initialize tracing from logging configuration
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let logging = &config.logging;
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let writer = if logging.log_to_file {
        let path = logging.log_file_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        BoxMakeWriter::new(Mutex::new(file))
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}

/// Open the quota store and build the controller
fn build_controller(config: &Config, ephemeral: bool) -> Result<AdmissionController> {
    if !config.rate_limit.enabled {
        info!("Rate limiting disabled, every request is admitted");
        return Ok(AdmissionController::in_memory(config.rate_limit.clone()));
    }
    if ephemeral {
        info!("Using in-memory quota store, state is lost on exit");
        return Ok(AdmissionController::in_memory(config.rate_limit.clone()));
    }

    let store = SqliteQuotaStore::open(&config.store.path)
        .with_context(|| format!("Failed to open quota store at {}", config.store.path))?;
    if let Some(path) = store.path() {
        info!("Using quota store at {}", path.display());
    }
    Ok(AdmissionController::new(
        config.rate_limit.clone(),
        Arc::new(store),
    ))
}

async fn reconcile(controller: &AdmissionController) -> Result<()> {
    let report = controller
        .reconcile()
        .await
        .context("Failed to reconcile quota store")?;
    if report.chains_restarted > 0 || report.flags_cleared > 0 || report.quotas_clamped > 0 {
        info!(
            "Reconciled {} records: {} chains restarted, {} flags cleared, {} quotas clamped",
            report.records_scanned,
            report.chains_restarted,
            report.flags_cleared,
            report.quotas_clamped
        );
    }
    Ok(())
}

/// Run the admission API until Ctrl-C
async fn serve(config: &Config, controller: AdmissionController, port: Option<u16>) -> Result<()> {
    reconcile(&controller).await?;

    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.server.bind, port))?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    };

    api_server::serve(addr, controller, shutdown).await
}

async fn admit(controller: &AdmissionController, user: &str) -> Result<()> {
    reconcile(controller).await?;

    let result = controller
        .check(&UserId::from(user))
        .await
        .context("Admission check failed")?;

    if !controller.config().enabled {
        println!("admitted (rate limiting disabled)");
    } else if result.allowed {
        println!("admitted: {} remaining", result.remaining);
    } else {
        println!("denied: rate limited");
    }
    Ok(())
}

async fn status(controller: &AdmissionController, user: &str) -> Result<()> {
    reconcile(controller).await?;

    match controller.status(&UserId::from(user)).await? {
        Some(record) => println!(
            "{}: quota {}/{}, recovering: {}, updated {}",
            record.user_id,
            record.quota,
            controller.config().max_quota,
            record.recovering,
            record.updated_at.to_rfc3339()
        ),
        None => println!("unknown user: {}", user),
    }
    Ok(())
}

async fn list(controller: &AdmissionController) -> Result<()> {
    reconcile(controller).await?;

    let dashboard = controller.dashboard().await?;
    let summary = &dashboard.summary;

    println!(
        "{} users: {} full, {} recovering, {} depleted (avg {:.1}% remaining)",
        summary.total_users,
        summary.full_users,
        summary.recovering_users,
        summary.depleted_users,
        summary.avg_remaining_percent
    );
    for record in &dashboard.records {
        println!(
            "  {:<24} {:>4}/{:<4} {}",
            record.user_id.as_str(),
            record.quota,
            dashboard.config.max_quota,
            if record.recovering { "recovering" } else { "" }
        );
    }
    Ok(())
}

async fn transcribe(
    config: &Config,
    controller: AdmissionController,
    user: &str,
    file: &Path,
) -> Result<()> {
    reconcile(&controller).await?;

    let transcriber =
        HttpTranscriber::new(&config.pipeline).context("Failed to build transcription client")?;
    let pipeline = JobPipeline::new(controller, transcriber, &config.pipeline);

    let outcome = pipeline
        .run(&UserId::from(user), &LocalFileSource::new(file))
        .await;

    println!("{}", outcome.reply_text());
    match outcome {
        JobOutcome::Transcribed { .. } => Ok(()),
        other => anyhow::bail!("Job did not complete: {}", other.label()),
    }
}
