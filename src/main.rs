use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

mod ai;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod pipeline;
mod services;

use ai::{ClaudeClient, Summarizer};
use config::Config;
use db::Repository;
use error::{AppError, Result};
use feed::FeedFetcher;
use pipeline::{Pipeline, PipelineSettings};
use services::ContentExtractor;

const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run,
    Watch,
    List(usize),
    ListAll,
    Show(String),
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (info and above by default, RUST_LOG overrides)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, config_path) = parse_args(&args)?;

    // Load configuration
    let config = Config::load(config_path.as_deref())?;

    match command {
        Command::Run => {
            let pipeline = build_pipeline(&config).await?;
            let report = pipeline.run_cycle().await;
            println!("{}", report);
        }
        Command::Watch => {
            let pipeline = build_pipeline(&config).await?;
            let interrupted = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "could not listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            watch(&pipeline, config.refresh_interval_minutes, interrupted).await;
        }
        Command::List(limit) => {
            let repository = Repository::new(&config.db_path).await?;
            let articles = repository.list_summarized(limit).await?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
        }
        Command::ListAll => {
            let repository = Repository::new(&config.db_path).await?;
            let articles = repository.list_all().await?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
        }
        Command::Show(link) => {
            let repository = Repository::new(&config.db_path).await?;
            match repository.get(&link).await? {
                Some(article) => println!("{}", serde_json::to_string_pretty(&article)?),
                None => return Err(AppError::NotFound(link)),
            }
        }
        Command::Stats => {
            let repository = Repository::new(&config.db_path).await?;
            let stats = repository.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

fn parse_args(args: &[String]) -> Result<(Command, Option<PathBuf>)> {
    let mut command = Command::Run;
    let mut config_path = None;
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--run" => command = Command::Run,
            "--watch" => command = Command::Watch,
            "--stats" => command = Command::Stats,
            "--all" => command = Command::ListAll,
            "--show" => {
                let link = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--show requires a link"))?;
                command = Command::Show(link.clone());
            }
            "--list" => {
                let limit = match iter.peek().filter(|next| !next.starts_with("--")) {
                    Some(value) => {
                        let limit = value
                            .parse::<usize>()
                            .map_err(|_| anyhow::anyhow!("invalid --list limit: {}", value))?;
                        iter.next();
                        limit
                    }
                    None => DEFAULT_LIST_LIMIT,
                };
                command = Command::List(limit);
            }
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = Some(PathBuf::from(path));
            }
            other => return Err(anyhow::anyhow!("unknown argument: {}", other).into()),
        }
    }

    Ok((command, config_path))
}

async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let repository = Repository::new(&config.db_path).await?;

    let model = Arc::new(ClaudeClient::new(
        config.claude_api_url.clone(),
        config.api_key()?.to_string(),
        config.claude_model.clone(),
        config.summarizer.retry().timeout(),
    )?);
    let summarizer = Arc::new(Summarizer::new(model, &config.summarizer));
    let feed = Arc::new(FeedFetcher::new(config.feed_url.clone(), config.max_candidates)?);
    let extractor = Arc::new(ContentExtractor::new(&config.extractor)?);

    tracing::info!(
        feed = %config.feed_url,
        model = summarizer.model_version(),
        db = %config.db_path,
        "pipeline ready"
    );

    Ok(Pipeline::new(
        repository,
        feed,
        extractor,
        summarizer,
        PipelineSettings::from_config(config),
    ))
}

/// Run a cycle now and then every `interval_minutes` until `shutdown` resolves.
/// A cycle still running at shutdown is dropped; steps it already committed stay stored.
async fn watch(pipeline: &Pipeline, interval_minutes: u32, shutdown: impl Future<Output = ()>) {
    let period = Duration::from_secs(u64::from(interval_minutes.max(1)) * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    tracing::info!(interval_minutes, "watching feed");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("stopping after interrupt");
                break;
            }
            _ = ticker.tick() => {
                tokio::select! {
                    report = pipeline.run_cycle() => println!("{}\n", report),
                    _ = &mut shutdown => {
                        tracing::info!("stopping after interrupt, abandoning the running cycle");
                        break;
                    }
                }
            }
        }
    }
}
