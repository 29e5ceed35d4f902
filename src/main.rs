//! linkdigest - collects links per email and mails batched summaries
//!
//! The application logic is contained in lib.rs, and this file is responsible
//! for parsing arguments, wiring components and handling top-level errors.

use clap::{Parser, Subcommand};
use colored::Colorize;
use linkdigest::{
    agent::OpenAiSummarizer,
    mail::SmtpMailer,
    render::{split_entries, wrap_document, Digest},
    server::{self, AppState},
    storage::open_store,
    worker::{BatchJob, BatchTrigger, Pipeline, WorkerPool},
    Config,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Time the workers get to finish queued digests after ctrl-c
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "linkdigest")]
#[command(author, version, about = "Batches submitted links and emails AI summaries", long_about = None)]
struct Cli {
    /// Path to a linkdigest.toml file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (default)
    Serve {
        /// Address to bind, overrides server.addr
        #[arg(long)]
        addr: Option<String>,
    },
    /// Show how many links are pending for an email
    Count {
        email: String,
    },
    /// Summarize and send whatever is pending for an email now
    Flush {
        email: String,
    },
    /// Render summary entries from a file as HTML; entries are separated by lines holding only `---`
    Preview {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("linkdigest=debug,tower_http=debug,info")
        } else {
            EnvFilter::new("linkdigest=info,tower_http=info")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        None => serve(config, None).await?,
        Some(Commands::Serve { addr }) => serve(config, addr).await?,
        Some(Commands::Count { email }) => {
            let store = open_store(&config.storage)?;
            let count = store.count(&email)?;
            println!("{}: {} pending", email.bold(), count.to_string().cyan());
        }
        Some(Commands::Flush { email }) => {
            let store = open_store(&config.storage)?;
            match store.drain(&email, 0)? {
                Some(queue) => {
                    println!("Summarising {} links for {}...", queue.len(), email.bold());
                    let pipeline = build_pipeline(&config)?;
                    match pipeline.process(&BatchJob::from(queue)).await {
                        Ok(()) => println!("{}", "Digest sent.".green()),
                        Err(e) => println!("{} {}", "Failed to send digest:".red(), e),
                    }
                }
                None => println!("No links pending for {}", email),
            }
        }
        Some(Commands::Preview { file }) => {
            let content = std::fs::read_to_string(&file)?;
            let entries = split_entries(&content);
            let digest = Digest::parse(&entries);
            if digest.entries.len() < entries.len() {
                eprintln!(
                    "{} {} entries without a url line were skipped",
                    "Warning:".yellow(),
                    entries.len() - digest.entries.len()
                );
            }
            println!(
                "{}",
                wrap_document(&config.mail.subject, &digest.to_html(), chrono::Utc::now())
            );
        }
    }

    Ok(())
}

fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    if config.api_key().is_err() {
        warn!("OPENAI_API_KEY not set, summaries will fail");
    }
    if let Err(e) = config.mail.credentials() {
        warn!(error = %e, "digests cannot be mailed");
    }
    Ok(Pipeline::new(
        Arc::new(OpenAiSummarizer::new(config)?),
        Arc::new(SmtpMailer::new(config.mail.clone())),
        config.batch.delay(),
        config.mail.subject.clone(),
    ))
}

async fn serve(config: Config, addr: Option<String>) -> anyhow::Result<()> {
    let addr = addr.unwrap_or_else(|| config.server.addr.clone());
    let store = open_store(&config.storage)?;
    let pipeline = Arc::new(build_pipeline(&config)?);
    let pool = Arc::new(WorkerPool::start(pipeline, &config.batch));
    let trigger = BatchTrigger::new(store.clone(), pool.clone(), config.batch.threshold);
    let app = server::router(AppState { store, trigger });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        storage = %config.storage.links_path().display(),
        threshold = config.batch.threshold,
        workers = config.batch.workers,
        "server started"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stopping digest workers");
    pool.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
