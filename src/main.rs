//! Operator CLI for the back-office scraper
//!
//! Usage:
//!   backoffice-scraper tokens add <TOKEN>...
//!   backoffice-scraper tokens list
//!   backoffice-scraper tokens refresh
//!   backoffice-scraper crawl sales --from 2024-01-01 --to 2024-01-31
//!   backoffice-scraper crawl inventory --stream > items.ndjson

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use backoffice_scraper::domain::records::{
    InventoryItem, ProcurementInvoice, ReportKind, SalesRow, Shift, StockCount,
};
use backoffice_scraper::domain::report::CrawlJob;
use backoffice_scraper::domain::repositories::TokenRepository;
use backoffice_scraper::domain::token::mask_token;
use backoffice_scraper::infrastructure::config::{AppConfig, ConfigManager};
use backoffice_scraper::infrastructure::extract::Extract;
use backoffice_scraper::infrastructure::{
    CrawlSummary, DatabaseConnection, HttpClient, ProbeTarget, ReportCrawler, SharedRateLimiter,
    SqliteTokenRepository, TokenManager, init_logging_with_config,
};

#[derive(Parser)]
#[command(name = "backoffice-scraper")]
#[command(about = "Crawl back-office reports into JSON", version)]
struct Args {
    /// Configuration file; defaults to the user config directory
    #[arg(short = 'c', long, env = "BACKOFFICE_SCRAPER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage stored session tokens
    #[command(subcommand)]
    Tokens(TokenCommand),

    /// Crawl every page of a report and print its records as JSON
    Crawl(CrawlArgs),
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Store tokens as unchecked; re-adding an expired token revives it
    Add {
        #[arg(required = true)]
        tokens: Vec<String>,
    },
    /// Show every stored token with its state
    List,
    /// Delete a stored token
    Remove { token: String },
    /// Probe all non-expired tokens now
    Refresh,
}

#[derive(clap::Args)]
struct CrawlArgs {
    #[arg(value_enum)]
    report: ReportKind,

    /// First day of the report range (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day of the report range (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Extra query parameter, repeatable
    #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
    filters: Vec<(String, String)>,

    /// Worker count; defaults to the configured value
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Give up on remaining pages after this many seconds
    #[arg(long)]
    deadline_seconds: Option<u64>,

    /// Print one JSON record per line as pages arrive
    #[arg(long)]
    stream: bool,
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

/// Long-lived collaborators shared by every command
struct Services {
    config: AppConfig,
    repository: Arc<SqliteTokenRepository>,
    http: Arc<HttpClient>,
    limiter: Arc<SharedRateLimiter>,
}

impl Services {
    async fn open(config: AppConfig) -> Result<Self> {
        let db = DatabaseConnection::from_config(&config.database).await?;
        db.migrate().await?;

        let repository = Arc::new(SqliteTokenRepository::new(db.pool().clone()));
        let http = Arc::new(HttpClient::new(&config.http, &config.site)?);
        let limiter = Arc::new(SharedRateLimiter::new(&config.rate_limit)?);

        Ok(Self {
            config,
            repository,
            http,
            limiter,
        })
    }

    async fn token_manager(&self) -> Result<Arc<TokenManager>> {
        let probe = ProbeTarget::from_site(&self.config.site)?;
        TokenManager::new(
            self.repository.clone(),
            self.http.clone(),
            self.limiter.clone(),
            probe,
            self.config.tokens.clone(),
        )
        .await
        .context("Token manager could not start")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new()?,
    };
    let config = manager.load_config().await?;
    init_logging_with_config(&config.logging)?;

    let services = Services::open(config).await?;

    match args.command {
        Command::Tokens(command) => run_tokens(&services, command).await,
        Command::Crawl(crawl) => run_crawl(&services, crawl).await,
    }
}

async fn run_tokens(services: &Services, command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::Add { tokens } => {
            let stored = services.repository.insert_tokens(&tokens).await?;
            println!("{stored} token(s) stored as unchecked");
        }
        TokenCommand::List => {
            let tokens = services.repository.list_tokens().await?;
            print_json(&tokens)?;
        }
        TokenCommand::Remove { token } => {
            if !services.repository.delete_token(&token).await? {
                bail!("No stored token {}", mask_token(&token));
            }
            println!("Removed {}", mask_token(&token));
        }
        TokenCommand::Refresh => {
            let manager = services.token_manager().await?;
            println!("{} active token(s)", manager.active_count().await);
            print_json(&services.repository.list_tokens().await?)?;
        }
    }
    Ok(())
}

async fn run_crawl(services: &Services, args: CrawlArgs) -> Result<()> {
    let manager = services.token_manager().await?;
    let refresh_cycle = manager.spawn_refresh_cycle();

    let crawler = ReportCrawler::new(
        services.http.clone(),
        manager.clone(),
        services.limiter.clone(),
        services.http.base_url().clone(),
        services.config.crawler.clone(),
    );

    let mut report = args.report.report_spec().with_date_range(args.from, args.to);
    for (key, value) in args.filters {
        report = report.with_filter(key, value);
    }

    let cancel = CancellationToken::new();
    let mut job = CrawlJob::new(report).with_cancellation(cancel.clone());
    if let Some(workers) = args.workers {
        job = job.with_workers(workers);
    }
    if let Some(seconds) = args.deadline_seconds {
        job = job.with_deadline(Duration::from_secs(seconds));
    }

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping crawl");
            interrupt.cancel();
        }
    });

    info!("Starting crawl {} of report {}", job.id, job.report.name);
    let result = match args.report {
        ReportKind::Sales => crawl_as::<SalesRow>(&crawler, &job, args.stream).await,
        ReportKind::Inventory => crawl_as::<InventoryItem>(&crawler, &job, args.stream).await,
        ReportKind::Procurement => crawl_as::<ProcurementInvoice>(&crawler, &job, args.stream).await,
        ReportKind::Shifts => crawl_as::<Shift>(&crawler, &job, args.stream).await,
        ReportKind::StockCounts => crawl_as::<StockCount>(&crawler, &job, args.stream).await,
    };

    refresh_cycle.stop().await;
    result
}

async fn crawl_as<T: Extract + Send + Serialize>(
    crawler: &Arc<ReportCrawler>,
    job: &CrawlJob,
    stream: bool,
) -> Result<()> {
    if stream {
        let mut records = crawler.crawl_stream::<T>(job).await?;
        while let Some(record) = records.next().await {
            println!("{}", serde_json::to_string(&record)?);
        }
        return Ok(());
    }

    let report = crawler.crawl_all::<T>(job).await?;
    print_json(&CrawlOutput {
        summary: &report.summary,
        records: &report.records,
    })
}

#[derive(Serialize)]
struct CrawlOutput<'a, T> {
    summary: &'a CrawlSummary,
    records: &'a [T],
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
