//! Harvest pipeline executor.
//!
//! [`HarvestPipeline`] picks the parser for a package file, runs it on the
//! blocking thread pool under a stage timeout and finishes the record with
//! location-derived fields.

use std::any::Any;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::harvest::formats::{detect_os, ParserRegistry};
use crate::model::PackageRecord;
use crate::traits::ParseError;

/// Where the package bytes come from.
#[derive(Debug)]
pub enum PackageSource {
    /// Downloaded body.
    Bytes(Vec<u8>),
    /// File on local disk, streamed.
    File(PathBuf),
}

impl PackageSource {
    fn open(self) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            PackageSource::Bytes(bytes) => Box::new(Cursor::new(bytes)),
            PackageSource::File(path) => Box::new(BufReader::new(File::open(path)?)),
        })
    }

    async fn size_bytes(&self) -> u64 {
        match self {
            PackageSource::Bytes(bytes) => bytes.len() as u64,
            PackageSource::File(path) => tokio::fs::metadata(path).await.map_or(0, |m| m.len()),
        }
    }
}

/// Complete harvest result with the record and statistics.
#[derive(Debug)]
pub struct HarvestResult {
    pub record: PackageRecord,
    pub stats: HarvestStats,
}

/// Statistics about one harvested package.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// Total time spent on the package (milliseconds)
    pub total_duration_ms: u64,

    /// Size of the package file (bytes)
    pub size_bytes: u64,

    /// Distinct executable hashes found
    pub executables: usize,

    /// License texts found
    pub licenses: usize,
}

/// Errors that can occur during pipeline execution.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Stage execution exceeded timeout
    #[error("Stage '{stage}' timed out after {timeout_secs}s")]
    StageTimeout { stage: String, timeout_secs: u64 },

    #[error("Failed to harvest '{location}': {source}")]
    Parse {
        location: String,
        #[source]
        source: ParseError,
    },

    /// The parser panicked; the worker survives and the package is skipped.
    #[error("Parser panicked on '{location}': {message}")]
    Panicked { location: String, message: String },
}

/// Async harvest driver shared by all workers.
///
/// The pipeline is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct HarvestPipeline {
    registry: Arc<ParserRegistry>,

    /// Timeout for the extraction stage (default: 5 minutes)
    stage_timeout: Duration,
}

const EXTRACT_STAGE: &str = "extract";

impl HarvestPipeline {
    pub fn new(registry: Arc<ParserRegistry>) -> Self {
        Self {
            registry,
            stage_timeout: Duration::from_secs(300), // 5 minutes
        }
    }

    /// Sets the timeout for each pipeline stage.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Returns `true` when some registered parser handles this file name.
    pub fn accepts(&self, name: &str) -> bool {
        self.registry.accepts(file_name(name))
    }

    /// Harvests one package file.
    ///
    /// `location` is the URL path or file path; its last segment is the
    /// record's origin name and it is also used to derive the `os` label.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if no parser accepts the file, parsing fails,
    /// the stage times out or the parser panics.
    #[instrument(skip(self, source))]
    pub async fn execute(
        &self,
        location: &str,
        source: PackageSource,
    ) -> Result<HarvestResult, PipelineError> {
        let start = Instant::now();
        let origin = file_name(location).to_string();
        let parser = self.registry.find(&origin).ok_or_else(|| PipelineError::Parse {
            location: location.to_string(),
            source: ParseError::NoParser(origin.clone()),
        })?;

        let mut stats = HarvestStats {
            size_bytes: source.size_bytes().await,
            ..HarvestStats::default()
        };
        info!(
            manager = parser.manager(),
            size_bytes = stats.size_bytes,
            "Starting extraction stage"
        );

        let task_parser = Arc::clone(&parser);
        let joined = timeout(
            self.stage_timeout,
            tokio::task::spawn_blocking(move || -> Result<PackageRecord, ParseError> {
                let mut reader = source.open()?;
                task_parser.parse(&mut reader, &origin)
            }),
        )
        .await
        .map_err(|_| PipelineError::StageTimeout {
            stage: EXTRACT_STAGE.to_string(),
            timeout_secs: self.stage_timeout.as_secs(),
        })?;

        let parsed = match joined {
            Ok(parsed) => parsed,
            Err(e) if e.is_panic() => {
                return Err(PipelineError::Panicked {
                    location: location.to_string(),
                    message: panic_message(e.into_panic()),
                })
            }
            Err(e) => {
                return Err(PipelineError::Panicked {
                    location: location.to_string(),
                    message: e.to_string(),
                })
            }
        };
        let mut record = parsed.map_err(|source| PipelineError::Parse {
            location: location.to_string(),
            source,
        })?;

        if record.os.is_empty() {
            if let Some(os) = detect_os(parser.manager(), location) {
                record.os = os;
            }
        }

        if record.is_blank() {
            warn!(manager = parser.manager(), "Package yielded no metadata and no executables");
        }

        stats.executables = record.hashes.len();
        stats.licenses = record.licenses.len();
        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.total_duration_ms,
            name = %record.name,
            version = %record.version,
            executables = stats.executables,
            "Extraction completed"
        );

        Ok(HarvestResult { record, stats })
    }
}

/// Last path segment of a URL path or file path.
pub fn file_name(location: &str) -> &str {
    location.rsplit('/').next().unwrap_or(location)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}

// ============================================================================
// Tests
// ============================================================================
