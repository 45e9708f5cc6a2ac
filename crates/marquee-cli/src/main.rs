//! marquee - versioned asset sync with deadline-driven expiry
//!
//! ```text
//! marquee run                      # ingest JSON lines from stdin + periodic reaper
//! marquee ingest poster.png --deadline "ends friday"
//! marquee reap                     # one reaper pass
//! marquee parse-deadline "3/20/25"
//! marquee show-expiry
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use marquee_core::app::{App, AppBuilder, IngestRequest, Runtime, TickOutcome};
use marquee_core::config::MarqueeConfig;
use marquee_core::domain::AssetName;
use marquee_core::impls::GitHubStore;
use marquee_core::ports::{Clock, SystemClock};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "marquee")]
#[command(version)]
#[command(about = "Versioned asset sync with deadline-driven expiry")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MARQUEE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingest loop (JSON lines on stdin) and the reaper loop
    Run {
        /// Maximum number of pending ingest events
        #[arg(long, default_value = "16")]
        queue_depth: usize,
    },

    /// Publish one image as the live version of an asset
    Ingest {
        file: PathBuf,

        /// Target asset (defaults to the configured default asset)
        #[arg(short, long)]
        asset: Option<String>,

        /// Free text that may contain a deadline
        #[arg(short, long)]
        deadline: Option<String>,

        /// Commit label for the live publish
        #[arg(short, long)]
        label: Option<String>,

        /// MIME type (guessed from the file extension when absent)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Run one reaper pass
    Reap,

    /// Show what a deadline text resolves to
    ParseDeadline { text: String },

    /// Print the expiry ledger
    ShowExpiry,
}

/// One line of `run` input.
#[derive(Debug, Deserialize)]
struct IngestLine {
    file: PathBuf,
    asset: Option<String>,
    deadline: Option<String>,
    label: Option<String>,
    content_type: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("marquee={log_level},marquee_core={log_level}").into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            cli.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json)
                .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => MarqueeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MarqueeConfig::default(),
    };

    match cli.command {
        Commands::Run { queue_depth } => run(config, queue_depth).await,
        Commands::Ingest {
            file,
            asset,
            deadline,
            label,
            content_type,
        } => {
            let app = build_app(config)?;
            let request = load_request(&file, asset, deadline, label, content_type).await?;
            let report = app.ingestor.ingest(request).await?;
            println!("ingest {} asset={}", report.id, report.asset);
            println!("  live: {:?}", report.live);
            if let Some(rotation) = &report.rotation {
                println!(
                    "  rotation: copied={:?} dropped={:?} failed={:?}",
                    rotation.copied, rotation.dropped, rotation.failed
                );
            }
            if let Some(gallery) = &report.gallery {
                println!("  gallery: {gallery:?}");
            }
            match report.deadline {
                Some(at) => println!("  expires: {}", at.to_rfc3339()),
                None => println!("  expires: never"),
            }
            println!("  ledger: {:?}", report.ledger);
            Ok(())
        }
        Commands::Reap => {
            let app = build_app(config)?;
            match app.reaper.tick().await {
                TickOutcome::Ran(report) => {
                    println!(
                        "pass {}: due={} downgraded={:?} superseded={:?} failed={:?} ledger={:?}",
                        report.pass,
                        report.due,
                        report.downgraded,
                        report.superseded,
                        report.failed,
                        report.ledger
                    );
                    if !report.failed.is_empty() {
                        bail!("{} asset(s) could not be expired", report.failed.len());
                    }
                }
                TickOutcome::Skipped => println!("pass skipped"),
            }
            Ok(())
        }
        Commands::ParseDeadline { text } => {
            let parser = config.deadline.parser()?;
            match parser.parse(&text, SystemClock.now()) {
                Some(at) => println!("{}", at.to_rfc3339()),
                None => println!("no deadline"),
            }
            Ok(())
        }
        Commands::ShowExpiry => {
            let app = build_app(config)?;
            let ledger = app.expiry.load().await;
            print!("{}", ledger.to_document());
            Ok(())
        }
    }
}

fn build_app(config: MarqueeConfig) -> Result<App> {
    config.store.validate_github()?;
    let token = std::env::var(&config.store.token_env).ok();
    if token.is_none() {
        warn!(env = %config.store.token_env, "no token set, requests are unauthenticated");
    }
    let store = GitHubStore::new(&config.store, token).context("building GitHub client")?;
    let app = AppBuilder::new(Arc::new(store)).config(config).build()?;
    Ok(app)
}

async fn load_request(
    file: &Path,
    asset: Option<String>,
    deadline: Option<String>,
    label: Option<String>,
    content_type: Option<String>,
) -> Result<IngestRequest> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let mut request = IngestRequest::new(Bytes::from(content));
    if let Some(asset) = asset {
        request = request.asset(AssetName::parse(&asset)?);
    }
    if let Some(content_type) = content_type.or_else(|| guess_content_type(file)) {
        request = request.content_type(content_type);
    }
    if let Some(text) = deadline {
        request = request.deadline(text);
    }
    if let Some(label) = label {
        request = request.label(label);
    }
    Ok(request)
}

fn guess_content_type(file: &Path) -> Option<String> {
    let extension = file.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_string())
}

async fn run(config: MarqueeConfig, queue_depth: usize) -> Result<()> {
    let app = build_app(config)?;
    let runtime = Runtime::spawn(&app, queue_depth);
    let sender = runtime.sender();
    info!("reading ingest events from stdin");

    let feeder = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "stdin read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let event: IngestLine = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "skipping malformed event");
                    continue;
                }
            };
            let request = match load_request(
                &event.file,
                event.asset,
                event.deadline,
                event.label,
                event.content_type,
            )
            .await
            {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "skipping event");
                    continue;
                }
            };
            if sender.send(request).await.is_err() {
                break;
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    feeder.abort();
    runtime.shutdown_and_join().await;
    Ok(())
}
