//! # tile-scraper CLI
//!
//! Command-line front end for the crawler.
//!
//! - `crawl`: walk the search results, download images and write the JSON feed
//! - `extract`: run the extractor on a saved results page, without any network access
//!
//! Logging goes to stderr (filtered by `RUST_LOG`, `info` by default) and,
//! with `--log-dir`, to a `crawl.log` file as well.

mod telemetry;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tile_scraper::crawler::{
    CrawlReport, Crawler, CrawlerConfig, Extractor, Record, RecordSink, ReqwestTransport,
    SelectorConfig,
};
use tile_scraper::pipeline::{FsImageStore, StorageConfig, write_feed};
use tracing::instrument;
use url::Url;

#[derive(Parser)]
#[command(author, version, about = "Crawl a shop's search results and download product images", long_about = None)]
struct Cli {
    /// Directory for a crawl.log file in addition to stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl the search results and write the record feed
    Crawl(CrawlArgs),

    /// Extract records from a saved results page
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// First results page
    #[arg(long, default_value = "https://supraten.md/cautare?search=gresie&category_id=0")]
    seed: String,

    /// Site root used to establish the session
    #[arg(long, default_value = "https://supraten.md")]
    home: String,

    /// Allowed domain (repeatable)
    #[arg(short = 'D', long = "domain", default_value = "supraten.md")]
    domains: Vec<String>,

    /// Minimum delay between requests in milliseconds
    #[arg(short = 'r', long, default_value = "3000")]
    delay_ms: u64,

    /// Maximum number of requests in flight
    #[arg(short, long, default_value = "1")]
    concurrency: usize,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "180")]
    timeout: u64,

    /// Stop after this many results pages
    #[arg(short = 'p', long)]
    max_pages: Option<usize>,

    /// Extra attempts for a results page that failed with a retryable error
    #[arg(long, default_value = "0")]
    page_retries: u32,

    /// Stop at the first results page without products
    #[arg(long)]
    stop_on_empty_page: bool,

    /// Directory receiving the downloaded images
    #[arg(short, long, default_value = "downloaded_images")]
    images_dir: PathBuf,

    /// Output feed
    #[arg(short, long, default_value = "tiles_data.json")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Saved HTML of a results page
    #[arg(required = true)]
    file: PathBuf,

    /// URL the page was fetched from, used to resolve relative links
    #[arg(long, default_value = "https://supraten.md/cautare?search=gresie&category_id=0")]
    page_url: String,
}

/// Collects records while ticking a spinner
struct ProgressSink {
    records: Vec<Record>,
    progress: ProgressBar,
}

impl RecordSink for ProgressSink {
    fn emit(&mut self, record: Record) {
        self.progress
            .set_message(record.title.clone().unwrap_or_else(|| "(untitled)".to_string()));
        self.progress.inc(1);
        self.records.push(record);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = telemetry::init_tracing_subscriber(cli.log_dir.as_deref())?;

    match cli.command {
        Some(Commands::Crawl(args)) => {
            crawl_command(args).await?;
        }
        Some(Commands::Extract(args)) => {
            extract_command(args).await?;
        }
        None => {
            println!("No command specified. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[instrument]
async fn crawl_command(args: CrawlArgs) -> anyhow::Result<()> {
    println!("Crawling {}...", args.seed);

    let config = CrawlerConfig::builder()
        .seed_url(args.seed)
        .home_url(args.home)
        .allowed_domains(args.domains)
        .min_request_delay_ms(args.delay_ms)
        .fetch_concurrency(args.concurrency)
        .request_timeout_secs(args.timeout)
        .max_pages(args.max_pages)
        .page_retries(args.page_retries)
        .stop_on_empty_page(args.stop_on_empty_page)
        .build();

    let transport = ReqwestTransport::new(&config)?;
    let store = FsImageStore::with_config(StorageConfig {
        base_path: args.images_dir,
    });
    let crawler = Crawler::new(config, transport, store)?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} records  {msg}")?,
    );
    progress.enable_steady_tick(Duration::from_millis(120));

    let mut sink = ProgressSink {
        records: Vec::new(),
        progress: progress.clone(),
    };
    let result = crawler.run(&mut sink).await;
    progress.finish_and_clear();

    // Records emitted before a fatal error are still written
    write_feed(&args.output, &sink.records)
        .await
        .with_context(|| format!("writing {}", args.output.display()))?;

    let report = match result {
        Ok(report) => report,
        Err(aborted) => {
            print_summary(&aborted.report);
            println!("Partial feed saved to {}", args.output.display());
            return Err(aborted.into());
        }
    };

    print_summary(&report);
    println!("Saved records to {}", args.output.display());

    Ok(())
}

fn print_summary(report: &CrawlReport) {
    println!("Crawl finished: {}", report.termination);
    println!("  Pages:          {}", report.pages.len());
    println!("  Records:        {}", report.emitted);
    println!("  Dropped:        {}", report.dropped);
    println!("  Image failures: {}", report.image_failures);
    for (index, page) in report.pages.iter().enumerate() {
        if page.fetch_faults > 0 {
            println!(
                "  Page {} had {} fetch fault(s): {}",
                index + 1,
                page.fetch_faults,
                page.url
            );
        }
    }
    println!(
        "  Duration:       {}s",
        (report.finished_at - report.started_at).num_seconds()
    );
}

#[instrument]
async fn extract_command(args: ExtractArgs) -> anyhow::Result<()> {
    let body = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let page_url = Url::parse(&args.page_url)?;

    let extractor = Extractor::new(&SelectorConfig::default())?;
    let page = extractor.extract_page(&page_url, None, &body);

    let output = serde_json::json!({
        "records": page.records,
        "next_page": page.next_page,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
