//! # fbposts CLI Application
//!
//! Command-line interface for extracting posts from public Facebook pages.
//!
//! - Positional page targets (URLs or identifiers such as `nytimes`)
//! - Per-target limits, pacing window and retry policies
//! - Run-level concurrency, timeout, proxy and request budget
//! - JSON output to stdout or a file, either full run outcomes or a flat
//!   array of posts
//! - Progress bar on stderr, logs via `RUST_LOG`, optional OTLP traces
//!
//! Ctrl-C cancels the run; every target still reports what it collected.

mod telemetry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use fbposts::config::{ScrapeOptions, ScraperConfig};
use fbposts::outcome::RunOutcome;
use fbposts::post::{PageTarget, Post};
use fbposts::scraper::{Scraper, TargetProgress};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract structured posts from public Facebook pages", long_about = None)]
struct Cli {
    /// Page URLs or identifiers (e.g. `nytimes`)
    #[arg(required = true)]
    targets: Vec<String>,

    /// Write JSON output to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output a flat array of posts instead of the run outcome (single target only)
    #[arg(long)]
    posts_only: bool,

    /// Maximum number of posts per page
    #[arg(short = 'n', long, default_value = "500", env = "FBPOSTS_MAX_POSTS")]
    max_posts: usize,

    /// Maximum number of feed pages per page
    #[arg(short = 'p', long, default_value = "50")]
    max_pages: u32,

    /// Minimum delay between requests for one page in milliseconds
    #[arg(long, default_value = "1000")]
    min_delay_ms: u64,

    /// Maximum delay between requests for one page in milliseconds
    #[arg(long, default_value = "5000")]
    max_delay_ms: u64,

    /// Retries of a rate-limited request
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// First rate-limit backoff delay in milliseconds
    #[arg(long, default_value = "2000")]
    backoff_base_ms: u64,

    /// Largest rate-limit backoff delay in milliseconds
    #[arg(long, default_value = "60000")]
    backoff_cap_ms: u64,

    /// Retries of a request after a network failure
    #[arg(long, default_value = "3")]
    network_retries: u32,

    /// Number of pages scraped at the same time
    #[arg(short, long, default_value = "3")]
    concurrency: usize,

    /// Stop the whole run after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Proxy URL for all requests
    #[arg(long, env = "FBPOSTS_PROXY")]
    proxy: Option<String>,

    /// Process-wide request budget per minute
    #[arg(long)]
    requests_per_minute: Option<u32>,

    /// User agent sent with every request
    #[arg(long, env = "FBPOSTS_USER_AGENT")]
    user_agent: Option<String>,

    /// Export traces via OTLP
    #[arg(long)]
    otel: bool,

    /// Also write logs to files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn validate(&self) -> anyhow::Result<()> {
        if self.posts_only && self.targets.len() > 1 {
            return Err(anyhow!(
                "--posts-only takes a single target, got {}",
                self.targets.len()
            ));
        }
        Ok(())
    }

    fn scrape_options(&self) -> ScrapeOptions {
        ScrapeOptions::builder()
            .max_posts(self.max_posts)
            .max_pages(self.max_pages)
            .request_delay_ms(self.min_delay_ms, self.max_delay_ms)
            .max_retries(self.max_retries)
            .backoff_ms(self.backoff_base_ms, self.backoff_cap_ms)
            .network_retries(self.network_retries, ScrapeOptions::default().network_retry_delay_ms)
            .build()
    }

    fn scraper_config(&self) -> ScraperConfig {
        let mut builder = ScraperConfig::builder()
            .concurrency(self.concurrency)
            .proxy(self.proxy.clone())
            .run_timeout(self.timeout.map(Duration::from_secs))
            .requests_per_minute(self.requests_per_minute);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let _otel = telemetry::init_tracing_subscriber(cli.otel, cli.log_dir.as_deref())?;

    scrape_command(cli).await
}

#[instrument(skip(cli))]
async fn scrape_command(cli: Cli) -> anyhow::Result<()> {
    cli.validate()?;
    let options = cli.scrape_options();
    let targets = cli
        .targets
        .iter()
        .map(|input| PageTarget::new(input, options.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let urls: Vec<String> = targets.iter().map(|t| t.to_string()).collect();

    let scraper = Scraper::new(cli.scraper_config())?;

    // Cancel on Ctrl-C, keeping whatever was collected
    let cancel = scraper.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with collected posts");
            cancel.cancel();
        }
    });

    let progress_bar = ProgressBar::new(targets.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );
    progress_bar.set_message("Scraping pages...");

    let (progress_sender, mut progress_receiver) =
        mpsc::channel::<TargetProgress>(targets.len().max(1));
    let progress_handle = tokio::spawn({
        let progress_bar = progress_bar.clone();
        async move {
            while let Some(update) = progress_receiver.recv().await {
                progress_bar.inc(1);
                let status = update
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "failed".to_string());
                progress_bar.set_message(format!("{}: {} posts ({})", update.target, update.posts, status));
            }
            progress_bar.finish_with_message("Done");
        }
    });

    let results = scraper.scrape_all(targets, Some(progress_sender)).await;
    progress_handle.await?;

    let failures = results.iter().filter(|r| r.is_err()).count();
    let output = if cli.posts_only {
        let posts: Vec<&Post> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .inspect(|outcome| {
                if !outcome.is_complete() {
                    warn!("{} ended early ({}), posts are partial", outcome.target, outcome.status);
                }
            })
            .flat_map(|outcome| outcome.posts.iter())
            .collect();
        serde_json::to_string_pretty(&posts)?
    } else {
        let entries: Vec<serde_json::Value> = urls
            .iter()
            .zip(&results)
            .map(|(url, result)| outcome_json(url, result))
            .collect::<Result<_, _>>()?;
        serde_json::to_string_pretty(&entries)?
    };

    write_output(cli.output.as_deref(), &output).await?;

    if failures == results.len() {
        return Err(anyhow!("all {} targets failed", failures));
    }
    Ok(())
}

/// Write JSON to a file, or to stdout without a path
async fn write_output(path: Option<&Path>, output: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            tokio::fs::write(path, output).await?;
            info!("Saved output to {}", path.display());
            eprintln!("Saved output to {}", path.display());
        }
        None => println!("{}", output),
    }
    Ok(())
}

fn outcome_json(
    url: &str,
    result: &fbposts::prelude::Result<RunOutcome>,
) -> serde_json::Result<serde_json::Value> {
    match result {
        Ok(outcome) => serde_json::to_value(outcome),
        Err(e) => Ok(json!({
            "target": url,
            "status": "failed",
            "error": e.to_string(),
            "posts": [],
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbposts::Error;
    use tempfile::tempdir;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["fbposts", "nytimes"]).unwrap();
        let options = cli.scrape_options();
        let config = cli.scraper_config();

        assert_eq!(options, ScrapeOptions::default());
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.run_timeout, None);
        assert!(!cli.posts_only);
    }

    #[test]
    fn test_cli_requires_a_target() {
        assert!(Cli::try_parse_from(["fbposts"]).is_err());
    }

    #[test]
    fn test_cli_options() {
        let cli = Cli::try_parse_from([
            "fbposts",
            "nytimes",
            "https://www.facebook.com/bbcnews",
            "--max-posts",
            "20",
            "--min-delay-ms",
            "0",
            "--max-delay-ms",
            "10",
            "--timeout",
            "60",
            "--requests-per-minute",
            "30",
        ])
        .unwrap();

        assert_eq!(cli.targets.len(), 2);
        assert_eq!(cli.scrape_options().max_posts, 20);
        assert_eq!(cli.scrape_options().request_delay().1, Duration::from_millis(10));
        assert_eq!(cli.scraper_config().run_timeout, Some(Duration::from_secs(60)));
        assert_eq!(cli.scraper_config().requests_per_minute, Some(30));
        assert!(!cli.posts_only);
    }

    #[test]
    fn test_posts_only_takes_one_target() {
        let cli = Cli::try_parse_from(["fbposts", "nytimes", "bbcnews", "--posts-only"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from(["fbposts", "nytimes", "--posts-only"]).unwrap();
        assert!(cli.validate().is_ok());

        let cli = Cli::try_parse_from(["fbposts", "nytimes", "bbcnews"]).unwrap();
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_failed_target_json() {
        let result: fbposts::prelude::Result<RunOutcome> = Err(Error::PageUnavailable {
            url: "https://www.facebook.com/gone".to_string(),
            reason: "HTTP 404".to_string(),
        });
        let value = outcome_json("https://www.facebook.com/gone", &result).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["target"], "https://www.facebook.com/gone");
        assert!(value["posts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_output_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("posts.json");

        write_output(Some(&path), "[]").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }
}
