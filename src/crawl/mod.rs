//! Crawl module - discovery and dispatch of package files.
//!
//! - **Remote**: [`Crawler`] walks mirror directory listings
//! - **Local**: [`LocalHarvester`] walks a directory tree on disk
//!
//! Both hand every new package to a [`Processor`] on a bounded
//! [`WorkerPool`](crate::executor::WorkerPool) and skip anything already in
//! the history log.

pub mod listing;
pub mod local;
pub mod orchestrator;
pub mod sleeper;

use reqwest::StatusCode;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::executor::{PoolError, WorkerPool};
use crate::harvest::{HarvestPipeline, PackageSource};
use crate::history::{ErrorLog, HistoryError, HistoryStore};
use crate::sink::{RecordSink, SinkError};

pub use listing::{parse_listing, Link};
pub use local::LocalHarvester;
pub use orchestrator::Crawler;
pub use sleeper::Sleeper;

/// Statuses that mean the mirror is refusing us. Seeing one stops the run.
pub const BAN_STATUSES: [u16; 5] = [403, 426, 429, 503, 504];

pub fn is_ban_status(status: StatusCode) -> bool {
    BAN_STATUSES.contains(&status.as_u16())
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Access denied by {url} (status {status})")]
    AccessDenied { url: String, status: StatusCode },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: StatusCode },
}

impl FetchError {
    /// Worth another attempt: connection problems and server errors that
    /// are not ban signals.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => status.is_server_error(),
            FetchError::AccessDenied { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("Failed to write error log: {0}")]
    ErrorLog(#[source] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Failed to flush records: {0}")]
    Sink(#[from] SinkError),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] tokio::task::JoinError),
}

/// Network and pacing settings for a remote crawl.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Directory levels followed below each root.
    pub max_depth: usize,
    /// Attempts per request, counting the first.
    pub max_attempts: u32,
    pub delay: Duration,
    pub jitter: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_attempts: 3,
            delay: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            user_agent: concat!("mirror-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Summary of one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    /// Listing pages fetched (remote) or roots walked (local).
    pub directories: usize,
    pub dispatched: usize,
    /// Already in history, or already dispatched in this run.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub banned: bool,
}

impl CrawlReport {
    fn tally(&mut self, outcomes: Vec<Outcome>, fatal: &mut Option<HistoryError>) {
        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded => self.succeeded += 1,
                Outcome::Failed => self.failed += 1,
                Outcome::Banned => self.banned = true,
                Outcome::Abandoned => {}
                Outcome::Fatal(e) => {
                    self.failed += 1;
                    fatal.get_or_insert(e);
                }
            }
        }
    }
}

/// What happened to one dispatched package.
#[derive(Debug)]
pub(crate) enum Outcome {
    Succeeded,
    Failed,
    Banned,
    /// Not attempted because a ban was already in effect.
    Abandoned,
    /// The history append failed; the run cannot continue safely.
    Fatal(HistoryError),
}

/// Harvest, persist and record one package.
///
/// Shared by every worker of a run. Failures of a single package go to the
/// error log; only history failures escape.
pub struct Processor {
    pipeline: HarvestPipeline,
    sink: Arc<dyn RecordSink>,
    history: Arc<HistoryStore>,
    errors: Arc<ErrorLog>,
}

impl Processor {
    pub fn new(
        pipeline: HarvestPipeline,
        sink: Arc<dyn RecordSink>,
        history: Arc<HistoryStore>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        Self {
            pipeline,
            sink,
            history,
            errors,
        }
    }

    pub fn accepts(&self, location: &str) -> bool {
        self.pipeline.accepts(location)
    }

    pub async fn is_processed(&self, key: &str) -> bool {
        self.history.exists(key).await
    }

    pub(crate) async fn process(&self, key: &str, source: PackageSource) -> Outcome {
        let result = match self.pipeline.execute(key, source).await {
            Ok(result) => result,
            Err(e) => {
                self.log_failure(key, &e).await;
                return Outcome::Failed;
            }
        };

        if let Err(e) = self.sink.persist(key, &result.record).await {
            self.log_failure(key, &e).await;
            return Outcome::Failed;
        }

        match self.history.record(key).await {
            Ok(_) => {
                info!(key, name = %result.record.name, "Package harvested");
                Outcome::Succeeded
            }
            Err(e) => {
                error!(key, error = %e, "History append failed");
                Outcome::Fatal(e)
            }
        }
    }

    pub(crate) async fn log_failure(&self, key: &str, error: &(dyn Display + Sync)) {
        let message = error.to_string();
        warn!(key, error = %message, "Package failed");
        if let Err(e) = self.errors.record(key, &message).await {
            warn!(key, error = %e, "Failed to write error log");
        }
    }

    /// Waits for the remaining workers, then flushes the sink.
    pub(crate) async fn finish(
        &self,
        pool: WorkerPool<Outcome>,
        mut report: CrawlReport,
        mut fatal: Option<HistoryError>,
    ) -> Result<CrawlReport, CrawlError> {
        report.tally(pool.join().await, &mut fatal);
        self.sink.flush().await?;
        if let Some(e) = fatal {
            return Err(e.into());
        }
        info!(
            dispatched = report.dispatched,
            skipped = report.skipped,
            succeeded = report.succeeded,
            failed = report.failed,
            banned = report.banned,
            "Run finished"
        );
        Ok(report)
    }
}
