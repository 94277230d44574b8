//! Thread Wordcloud main entry point
//!
//! This is the command-line interface for the thread word-cloud service.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thread_wordcloud::config::{load_config_with_hash, Config};
use thread_wordcloud::output::{load_statistics, print_statistics, print_top_words};
use thread_wordcloud::storage::open_repository;
use thread_wordcloud::Coordinator;
use tracing_subscriber::EnvFilter;

/// Thread Wordcloud: word frequencies for discussion threads
///
/// Crawls a thread's full comment tree, tallies the words of every comment
/// and caches the result per thread. Without a mode flag it serves the HTTP
/// API.
#[derive(Parser, Debug)]
#[command(name = "thread-wordcloud")]
#[command(version = "1.0.0")]
#[command(about = "Word frequencies for discussion threads", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the effective settings without serving
    #[arg(long, conflicts_with_all = ["stats", "link"])]
    dry_run: bool,

    /// Show statistics from the word cache and exit
    #[arg(long, conflicts_with_all = ["dry_run", "link"])]
    stats: bool,

    /// Crawl one thread, wait for it to finish and print its top words
    #[arg(long, value_name = "URL", conflicts_with_all = ["dry_run", "stats"])]
    link: Option<String>,

    /// Number of words printed with --link
    #[arg(long, default_value_t = 25)]
    top: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(link) = cli.link.as_deref() {
        handle_link(&config, link, cli.top).await
    } else {
        handle_serve(&config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("thread_wordcloud=info,warn"),
            1 => EnvFilter::new("thread_wordcloud=debug,info"),
            2 => EnvFilter::new("thread_wordcloud=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Thread Wordcloud Dry Run ===\n");

    println!("Server:");
    println!("  Bind: {}", config.server.bind);

    println!("\nUpstream API:");
    println!("  OAuth base URL: {}", config.reddit.oauth_base_url);
    println!("  Read-only base URL: {}", config.reddit.readonly_base_url);
    println!("  User agent: {}", config.reddit.user_agent);
    println!("  Requests per second: {}", config.reddit.requests_per_second);
    println!(
        "  Timeout: {}s, retries: {}",
        config.reddit.request_timeout_secs, config.reddit.max_retries
    );
    match &config.credentials {
        Some(credentials) => println!("  Credentials: {} (client {})", credentials.username, credentials.client_id),
        None => println!("  Credentials: none (read-only host)"),
    }

    println!("\nCrawler:");
    println!(
        "  Max concurrent requests: {}",
        config.crawler.max_concurrent_requests
    );
    println!("  Max fan-out per node: {}", config.crawler.max_fanout);
    println!("  Stub chunk size: {}", config.crawler.chunk_size);
    println!("  Freshness window: {} days", config.crawler.freshness_days);
    println!("  Crawl timeout: {}s", config.crawler.crawl_timeout_secs);
    println!("  Job status retention: {}s", config.crawler.job_retention_secs);

    println!("\nStorage:");
    println!("  Backend: {:?}", config.storage.backend);
    println!("  Database: {}", config.storage.database_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the word cache
fn handle_stats(config: &Config) -> Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let repository = open_repository(&config.storage).context("failed to open word cache")?;
    let stats = load_statistics(repository.as_ref())?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --link mode: one crawl, then the top words
async fn handle_link(config: &Config, link: &str, top: usize) -> Result<()> {
    let repository = open_repository(&config.storage).context("failed to open word cache")?;
    let coordinator = Coordinator::new(config, repository)?;

    tracing::info!("Crawling {}", link);
    let answer = coordinator
        .crawl_and_wait(link)
        .await
        .with_context(|| format!("failed to crawl {}", link))?;

    tracing::info!("Words for {} from {:?}", answer.link, answer.source);
    print_top_words(
        &answer.link.to_string(),
        &answer.words.unwrap_or_default(),
        top,
    );
    Ok(())
}

/// Handles the default mode: serves the HTTP API until Ctrl-C
async fn handle_serve(config: &Config) -> Result<()> {
    let repository = open_repository(&config.storage).context("failed to open word cache")?;
    let coordinator = Arc::new(Coordinator::new(config, repository)?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    let shutdown = {
        let coordinator = Arc::clone(&coordinator);
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
            coordinator.shutdown();
        }
    };

    thread_wordcloud::server::serve(listener, Arc::clone(&coordinator), shutdown)
        .await
        .context("server error")?;

    if !coordinator.wait_idle(Duration::from_secs(10)).await {
        tracing::warn!("{} crawls still running at exit", coordinator.running_jobs());
    }

    tracing::info!("Server stopped");
    Ok(())
}
