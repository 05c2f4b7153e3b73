//! Durable record of processed packages, and the operator-facing error log.
//!
//! Both are newline-delimited append-only text files. The history log is
//! replayed on open; a key present in it is never processed again.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to open history log '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to append '{key}' to history log: {source}")]
    Append {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("History key must be a single non-empty line: {0:?}")]
    InvalidKey(String),
}

struct Inner {
    keys: HashSet<String>,
    log: File,
}

/// Set of processed keys backed by an append-only log.
///
/// Appends go through one lock, so concurrent callers never interleave
/// partial lines and every acknowledged key is on disk.
pub struct HistoryStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl HistoryStore {
    /// Opens (creating if needed) the log at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source: io::Error| HistoryError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(open_err)?;
        }

        // Only regular files are replayed; a device such as /dev/null keeps no history.
        let replay = match fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(open_err(e)),
        };
        let keys: HashSet<String> = if replay {
            fs::read_to_string(&path)
                .await
                .map_err(open_err)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            HashSet::new()
        };

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;

        info!(path = %path.display(), entries = keys.len(), "History loaded");
        Ok(Self {
            path,
            inner: Mutex::new(Inner { keys, log }),
        })
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.inner.lock().await.keys.contains(key)
    }

    /// Durably records `key`. Returns `false` if it was already present.
    pub async fn record(&self, key: &str) -> Result<bool, HistoryError> {
        if key.trim().is_empty() || key.contains('\n') || key.contains('\r') {
            return Err(HistoryError::InvalidKey(key.to_string()));
        }

        let mut inner = self.inner.lock().await;
        if inner.keys.contains(key) {
            return Ok(false);
        }

        let append_err = |source: io::Error| HistoryError::Append {
            key: key.to_string(),
            source,
        };
        let line = format!("{key}\n");
        inner.log.write_all(line.as_bytes()).await.map_err(append_err)?;
        inner.log.flush().await.map_err(append_err)?;

        inner.keys.insert(key.to_string());
        debug!(key, "Recorded in history");
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Append-only log of failures, one `key<TAB>message` line each.
pub struct ErrorLog {
    log: Mutex<File>,
}

impl ErrorLog {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let log = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            log: Mutex::new(log),
        })
    }

    pub async fn record(&self, key: &str, message: &str) -> io::Result<()> {
        let message = message.replace(|c: char| c == '\n' || c == '\r', " ");
        let line = format!("{key}\t{message}\n");
        let mut log = self.log.lock().await;
        log.write_all(line.as_bytes()).await?;
        log.flush().await
    }
}
