//! Output of finished package records: one JSON file per package, and
//! batched bulk insertion into a downstream index.

use async_trait::async_trait;
use serde::Serialize;
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::model::PackageRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bulk insert failed: {0}")]
    Index(String),
}

/// Destination for finished records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Stores the record harvested from `location` (URL path or file path).
    async fn persist(&self, location: &str, record: &PackageRecord) -> Result<(), SinkError>;

    /// Pushes out anything buffered. Called once at the end of a run.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes `<output_dir>/<location dir>/<file stem>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Target path for `location`. Only plain path segments are kept, so the
    /// result always stays under the output directory.
    pub fn target_path(&self, location: &str) -> PathBuf {
        let mut parts: Vec<&OsStr> = Path::new(location)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        let file = parts
            .pop()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());
        let stem = match file.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => file.as_str(),
        };

        let mut path = self.output_dir.clone();
        path.extend(parts);
        path.push(format!("{stem}.json"));
        path
    }
}

#[async_trait]
impl RecordSink for JsonFileSink {
    async fn persist(&self, location: &str, record: &PackageRecord) -> Result<(), SinkError> {
        let path = self.target_path(location);
        let io_err = |source: io::Error| SinkError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&path, json).await.map_err(io_err)?;
        debug!(path = %path.display(), "Record written");
        Ok(())
    }
}

/// Key/value pair in a [`Document`]'s hash list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Flattened index document derived from a [`PackageRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub os: String,
    pub epoch: u32,
    pub release: String,
    pub manager: String,
    pub name: String,
    pub source: String,
    pub version: String,
    pub architecture: String,
    pub maintainer: String,
    pub homepage: String,
    pub description: String,
    pub license: Vec<String>,
    pub depends: Vec<String>,
    pub hashes: Vec<KeyValue>,
}

impl From<&PackageRecord> for Document {
    fn from(record: &PackageRecord) -> Self {
        let mut license: Vec<String> = Vec::new();
        let detected = record.licenses.iter().flat_map(|l| l.names.iter());
        for name in record.declared_licenses.iter().chain(detected) {
            if !license.contains(name) {
                license.push(name.clone());
            }
        }

        Self {
            os: record.os.clone(),
            epoch: record.epoch,
            release: record.release.clone(),
            manager: record.manager.clone(),
            name: record.name.clone(),
            source: record.source.clone(),
            version: record.version.clone(),
            architecture: record.architecture.clone(),
            maintainer: record.maintainer.clone(),
            homepage: record.homepage.clone(),
            description: record.description.clone(),
            license,
            depends: record.depends.clone(),
            hashes: record
                .hashes
                .iter()
                .map(|(key, value)| KeyValue {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

/// Downstream bulk-insert interface.
#[async_trait]
pub trait BulkIndexer: Send + Sync {
    async fn bulk_insert(&self, documents: Vec<Document>) -> Result<(), SinkError>;
}

/// Buffers documents and hands them to a [`BulkIndexer`] in batches.
pub struct IndexSink<I> {
    indexer: I,
    batch_size: usize,
    pending: Mutex<Vec<Document>>,
}

impl<I: BulkIndexer> IndexSink<I> {
    pub fn new(indexer: I, batch_size: usize) -> Self {
        Self {
            indexer,
            batch_size: batch_size.max(1),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn indexer(&self) -> &I {
        &self.indexer
    }
}

#[async_trait]
impl<I: BulkIndexer> RecordSink for IndexSink<I> {
    async fn persist(&self, _location: &str, record: &PackageRecord) -> Result<(), SinkError> {
        let batch = {
            let mut pending = self.pending.lock().await;
            pending.push(Document::from(record));
            if pending.len() < self.batch_size {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };
        debug!(documents = batch.len(), "Flushing index batch");
        self.indexer.bulk_insert(batch).await
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        if batch.is_empty() {
            return Ok(());
        }
        info!(documents = batch.len(), "Flushing final index batch");
        self.indexer.bulk_insert(batch).await
    }
}

/// Appends each batch as JSON lines to a local file, for offline bulk loading.
#[derive(Debug)]
pub struct JsonLinesIndexer {
    path: PathBuf,
}

impl JsonLinesIndexer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BulkIndexer for JsonLinesIndexer {
    async fn bulk_insert(&self, documents: Vec<Document>) -> Result<(), SinkError> {
        let mut body = Vec::new();
        for document in &documents {
            serde_json::to_writer(&mut body, document)?;
            body.push(b'\n');
        }

        let io_err = |source: io::Error| SinkError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(&body).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)
    }
}

/// Forwards every record to several sinks in order.
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn RecordSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl RecordSink for SinkSet {
    async fn persist(&self, location: &str, record: &PackageRecord) -> Result<(), SinkError> {
        for sink in &self.sinks {
            sink.persist(location, record).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }
}
