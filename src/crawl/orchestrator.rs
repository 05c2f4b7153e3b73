//! Remote mirror crawler.
//!
//! One coordinating task walks listing pages depth-first and in order;
//! package downloads run on the worker pool. Any ban status stops new
//! fetches and new dispatches; workers already running finish their item.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::listing::{directory_url, package_key, parse_listing, Link};
use super::sleeper::Sleeper;
use super::{is_ban_status, CrawlError, CrawlReport, CrawlSettings, FetchError, Outcome, Processor};
use crate::executor::WorkerPool;
use crate::harvest::PackageSource;
use crate::history::HistoryError;

struct Shared {
    client: reqwest::Client,
    processor: Processor,
    sleeper: Sleeper,
    settings: CrawlSettings,
    banned: AtomicBool,
}

/// Resumable crawler over one or more mirror roots.
#[derive(Clone)]
pub struct Crawler {
    shared: Arc<Shared>,
}

impl Crawler {
    pub fn new(settings: CrawlSettings, processor: Processor) -> Result<Self, CrawlError> {
        let sleeper = Sleeper::new(settings.delay, settings.jitter);
        Self::with_sleeper(settings, processor, sleeper)
    }

    pub fn with_sleeper(
        settings: CrawlSettings,
        processor: Processor,
        sleeper: Sleeper,
    ) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout)
            .build()
            .map_err(CrawlError::Client)?;

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                processor,
                sleeper,
                settings,
                banned: AtomicBool::new(false),
            }),
        })
    }

    pub fn is_banned(&self) -> bool {
        self.shared.is_banned()
    }

    /// Crawls every root in order with at most `concurrency` downloads in
    /// flight.
    ///
    /// # Errors
    ///
    /// Only run-fatal conditions are errors (history append failure, sink
    /// flush failure). Per-package and per-page failures go to the error log;
    /// a ban ends the run early with [`CrawlReport::banned`] set.
    #[instrument(skip(self, roots))]
    pub async fn run(&self, roots: &[Url], concurrency: usize) -> Result<CrawlReport, CrawlError> {
        let shared = &self.shared;
        let mut report = CrawlReport::default();
        let mut pool: WorkerPool<Outcome> = WorkerPool::new(concurrency.max(1));
        let mut fatal: Option<HistoryError> = None;
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut stack: Vec<(Url, usize)> = roots
            .iter()
            .rev()
            .map(|root| (directory_url(root.clone()), 0))
            .collect();

        'walk: while let Some((page, depth)) = stack.pop() {
            if shared.is_banned() || fatal.is_some() {
                break;
            }

            info!(url = %page, depth, "Visiting directory");
            report.directories += 1;
            let links = match shared.fetch(&page).await {
                Ok(body) => parse_listing(&page, &String::from_utf8_lossy(&body)),
                Err(e) => {
                    shared.fail(page.as_str(), &e).await;
                    continue;
                }
            };

            let mut children = Vec::new();
            for link in links {
                let url = match link {
                    Link::Directory(url) if depth < shared.settings.max_depth => {
                        children.push((url, depth + 1));
                        continue;
                    }
                    Link::Directory(url) => {
                        debug!(url = %url, "Depth limit reached");
                        continue;
                    }
                    Link::File(url) => url,
                };

                let key = package_key(&url);
                if !shared.processor.accepts(&key) {
                    continue;
                }
                if shared.processor.is_processed(&key).await || !dispatched.insert(key.clone()) {
                    debug!(key, "Already processed");
                    report.skipped += 1;
                    continue;
                }
                if shared.is_banned() || fatal.is_some() {
                    break 'walk;
                }

                let worker = Arc::clone(shared);
                pool.submit(async move { worker.download(url).await }).await?;
                report.dispatched += 1;
                report.tally(pool.drain_completed(), &mut fatal);
            }

            stack.extend(children.into_iter().rev());
        }

        let mut report = shared.processor.finish(pool, report, fatal).await?;
        report.banned |= shared.is_banned();
        Ok(report)
    }
}

impl Shared {
    fn is_banned(&self) -> bool {
        self.banned.load(Ordering::SeqCst)
    }

    async fn download(&self, url: Url) -> Outcome {
        self.sleeper.pause().await;
        if self.is_banned() {
            return Outcome::Abandoned;
        }

        let key = package_key(&url);
        match self.fetch(&url).await {
            Ok(body) => self.processor.process(&key, PackageSource::Bytes(body)).await,
            Err(e @ FetchError::AccessDenied { .. }) => {
                self.fail(&key, &e).await;
                Outcome::Banned
            }
            Err(e) => {
                self.fail(&key, &e).await;
                Outcome::Failed
            }
        }
    }

    /// Logs the failure; an access-denied error also raises the ban flag.
    async fn fail(&self, key: &str, error: &FetchError) {
        if let FetchError::AccessDenied { url, status } = error {
            if !self.banned.swap(true, Ordering::SeqCst) {
                warn!(url, status = %status, "Access denied, stopping crawl");
            }
        }
        self.processor.log_failure(key, error).await;
    }

    /// GET with retries on transient failures. Ban statuses are returned at
    /// once.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    warn!(url = %url, attempt, error = %e, "Request failed, retrying");
                    attempt += 1;
                    self.sleeper.pause().await;
                    if self.is_banned() {
                        return Err(e);
                    }
                }
                result => return result,
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let network = |source: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url.clone()).send().await.map_err(network)?;
        let status = response.status();
        if is_ban_status(status) {
            return Err(FetchError::AccessDenied {
                url: url.to_string(),
                status,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(network)?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{Classifier, HarvestPipeline, ParserRegistry};
    use crate::history::{ErrorLog, HistoryStore};
    use crate::sink::JsonFileSink;
    use std::path::Path;

    async fn crawler(dir: &Path) -> Crawler {
        let registry = Arc::new(ParserRegistry::with_defaults(Classifier::default()));
        let processor = Processor::new(
            HarvestPipeline::new(registry),
            Arc::new(JsonFileSink::new(dir.join("out"))),
            Arc::new(HistoryStore::open(dir.join("history.log")).await.unwrap()),
            Arc::new(ErrorLog::open(dir.join("errors.log")).await.unwrap()),
        );
        Crawler::with_sleeper(CrawlSettings::default(), processor, Sleeper::disabled()).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_root_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = crawler(dir.path()).await;
        let root = Url::parse("http://127.0.0.1:9/pool/").unwrap();

        let report = crawler.run(&[root], 2).await.unwrap();
        assert_eq!(report.directories, 1);
        assert_eq!(report.dispatched, 0);
        assert!(!report.banned);

        let errors = std::fs::read_to_string(dir.path().join("errors.log")).unwrap();
        assert!(errors.starts_with("http://127.0.0.1:9/pool/\t"));
    }

    #[tokio::test]
    async fn test_ban_flag_raised_once() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = crawler(dir.path()).await;
        let denied = FetchError::AccessDenied {
            url: "http://m/pool/".to_string(),
            status: reqwest::StatusCode::FORBIDDEN,
        };
        crawler.shared.fail("/pool/", &denied).await;
        crawler.shared.fail("/pool/", &denied).await;
        assert!(crawler.is_banned());

        let report = crawler.run(&[Url::parse("http://m/pool/").unwrap()], 1).await.unwrap();
        assert_eq!(report.directories, 0);
        assert!(report.banned);
    }
}
