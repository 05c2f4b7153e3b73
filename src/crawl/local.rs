//! Harvesting from a directory tree on local disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::{CrawlError, CrawlReport, Outcome, Processor};
use crate::executor::WorkerPool;
use crate::harvest::PackageSource;
use crate::history::HistoryError;

/// Runs every package file below a directory through the pipeline. History
/// keys are the file paths.
pub struct LocalHarvester {
    processor: Arc<Processor>,
}

impl LocalHarvester {
    pub fn new(processor: Processor) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }

    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn run(&self, root: &Path, concurrency: usize) -> Result<CrawlReport, CrawlError> {
        let processor = Arc::clone(&self.processor);
        let walk_root = root.to_path_buf();
        let files =
            tokio::task::spawn_blocking(move || collect_packages(&walk_root, &processor)).await?;
        info!(files = files.len(), "Local packages found");

        let mut report = CrawlReport {
            directories: 1,
            ..CrawlReport::default()
        };
        let mut pool: WorkerPool<Outcome> = WorkerPool::new(concurrency.max(1));
        let mut fatal: Option<HistoryError> = None;

        for path in files {
            if fatal.is_some() {
                break;
            }
            let key = path.to_string_lossy().into_owned();
            if self.processor.is_processed(&key).await {
                debug!(key, "Already processed");
                report.skipped += 1;
                continue;
            }

            let processor = Arc::clone(&self.processor);
            pool.submit(async move { processor.process(&key, PackageSource::File(path)).await })
                .await?;
            report.dispatched += 1;
            report.tally(pool.drain_completed(), &mut fatal);
        }

        self.processor.finish(pool, report, fatal).await
    }
}

/// Accepted package files below `root`, sorted by path. Unreadable entries
/// are skipped.
fn collect_packages(root: &Path, processor: &Processor) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && processor.accepts(&entry.path().to_string_lossy()) {
            files.push(entry.into_path());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::fixtures::{self, elf};
    use crate::harvest::{Classifier, HarvestPipeline, ParserRegistry};
    use crate::history::{ErrorLog, HistoryStore};
    use crate::sink::JsonFileSink;

    async fn harvester(state: &Path) -> LocalHarvester {
        let registry = Arc::new(ParserRegistry::with_defaults(Classifier::default()));
        LocalHarvester::new(Processor::new(
            HarvestPipeline::new(registry),
            Arc::new(JsonFileSink::new(state.join("out"))),
            Arc::new(HistoryStore::open(state.join("history.log")).await.unwrap()),
            Arc::new(ErrorLog::open(state.join("errors.log")).await.unwrap()),
        ))
    }

    #[tokio::test]
    async fn test_local_run_is_resumable() {
        let packages = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let pool_dir = packages.path().join("pool").join("f");
        std::fs::create_dir_all(&pool_dir).unwrap();

        let deb = fixtures::deb(
            &[("./control", b"Package: foo\nVersion: 1.0\n")],
            &[("./usr/bin/foo", &elf(b"foo"))],
        );
        std::fs::write(pool_dir.join("foo_1.0_amd64.deb"), deb).unwrap();
        std::fs::write(pool_dir.join("broken_1.0_amd64.deb"), b"not an archive").unwrap();
        std::fs::write(pool_dir.join("README"), b"ignored").unwrap();

        let first = harvester(state.path()).await.run(packages.path(), 2).await.unwrap();
        assert_eq!(first.dispatched, 2);
        assert_eq!(first.succeeded, 1);
        assert_eq!(first.failed, 1);

        let written = walkdir::WalkDir::new(state.path().join("out"))
            .into_iter()
            .filter_map(Result::ok)
            .any(|e| e.file_name() == "foo_1.0_amd64.json");
        assert!(written);
        let errors = std::fs::read_to_string(state.path().join("errors.log")).unwrap();
        assert!(errors.contains("broken_1.0_amd64.deb"));

        // The failed package is retried, the harvested one is not.
        let second = harvester(state.path()).await.run(packages.path(), 2).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.dispatched, 1);
        assert_eq!(second.succeeded, 0);
    }
}
