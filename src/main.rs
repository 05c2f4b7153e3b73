use clap::{Args, Parser};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mirror_harvester::config::{Config, ConfigError, PackageType};
use mirror_harvester::crawl::{CrawlError, CrawlReport, Crawler, LocalHarvester, Processor};
use mirror_harvester::harvest::HarvestPipeline;
use mirror_harvester::history::{ErrorLog, HistoryError, HistoryStore};
use mirror_harvester::sink::{IndexSink, JsonFileSink, JsonLinesIndexer, RecordSink, SinkSet};

/// Crawls package mirrors and fingerprints the executables inside every
/// deb, apk and rpm found.
#[derive(Parser, Debug)]
#[command(name = "mirror-harvester", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "HARVEST_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Harvest packages from this local directory instead of crawling
    #[arg(long, value_name = "DIR")]
    local: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

/// Command-line values that take precedence over file and environment.
#[derive(Args, Serialize, Debug, Default)]
struct Overrides {
    /// Mirror root URL (repeatable)
    #[arg(long = "root", value_name = "URL")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    roots: Vec<String>,

    /// Package type to crawl (repeatable)
    #[arg(short = 't', long = "type", value_enum)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    package_types: Vec<PackageType>,

    /// Concurrent downloads
    #[arg(short = 'j', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    concurrency: Option<usize>,

    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    history_path: Option<PathBuf>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    index_path: Option<PathBuf>,

    /// Base delay between downloads
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_ms: Option<u64>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_depth: Option<usize>,
}

#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Crawl(#[from] CrawlError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            info!(
                directories = report.directories,
                dispatched = report.dispatched,
                skipped = report.skipped,
                succeeded = report.succeeded,
                failed = report.failed,
                banned = report.banned,
                "Harvest complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Harvest failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<CrawlReport, RunError> {
    let config = Config::load(cli.config.as_deref(), &cli.overrides)?;
    info!(
        types = ?config.package_types,
        concurrency = config.concurrency,
        output = %config.output_dir.display(),
        "Configuration loaded"
    );

    let registry = Arc::new(config.registry());
    let pipeline = HarvestPipeline::new(registry).with_timeout(config.stage_timeout());
    let history = Arc::new(HistoryStore::open(&config.history_path).await?);
    let errors = Arc::new(
        ErrorLog::open(&config.error_log_path)
            .await
            .map_err(CrawlError::ErrorLog)?,
    );

    let mut sinks = SinkSet::new().with(Arc::new(JsonFileSink::new(&config.output_dir)));
    if let Some(index_path) = &config.index_path {
        sinks = sinks.with(Arc::new(IndexSink::new(
            JsonLinesIndexer::new(index_path),
            config.index_batch_size,
        )));
    }
    let sink: Arc<dyn RecordSink> = Arc::new(sinks);
    let processor = Processor::new(pipeline, sink, history, errors);

    let report = match &cli.local {
        Some(dir) => {
            LocalHarvester::new(processor)
                .run(dir, config.concurrency)
                .await?
        }
        None => {
            let roots = config.crawl_roots()?;
            Crawler::new(config.crawl_settings(), processor)?
                .run(&roots, config.concurrency)
                .await?
        }
    };

    if report.banned {
        info!("Mirror denied access; rerun later to resume from history");
    }
    Ok(report)
}
