//! Paginated report crawler
//!
//! A crawl runs in two phases. A discovery probe fetches a page index far
//! past the end of any real report; the site still renders its full
//! pagination control there, and the highest advertised number is the page
//! count. Then a generator feeds `1..=last_page` into a bounded queue that a
//! fixed pool of workers drains. Each worker takes a token, waits on the
//! shared rate limiter, fetches, decodes and hands records on.
//!
//! Only the discovery probe is fatal. A page that fails to fetch is logged
//! and skipped without retry, so a finished crawl may be partial.

use std::sync::Arc;

use scraper::Selector;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::report::{CrawlJob, ReportError, ReportSpec};
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::extract::{Extract, Page, last_page};
use crate::infrastructure::http_client::{FetchCause, FetchError, PageFetcher};
use crate::infrastructure::rate_limit::SharedRateLimiter;
use crate::infrastructure::token_manager::{TokenError, TokenSource};

/// Failures that end a crawl before any page is fetched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrawlError {
    #[error("invalid report {report}: {reason}")]
    InvalidReport { report: String, reason: String },

    #[error("could not determine the page count of report {report}: {reason}")]
    PaginationDiscovery { report: String, reason: String },

    #[error("no active session token to crawl report {report}")]
    NoActiveTokens { report: String },

    #[error("crawl of report {report} cancelled before it started")]
    Cancelled { report: String },
}

/// Why a single page was skipped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PageFailure {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Url(#[from] ReportError),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub last_page: u32,
    pub pages_ok: usize,
    pub pages_failed: usize,
    pub failed_pages: Vec<u32>,
    pub records: usize,
    /// The job was cancelled or hit its deadline before the queue drained
    pub cancelled: bool,
}

/// Result of a batch crawl; record order across pages is unspecified
#[derive(Debug)]
pub struct CrawlReport<T> {
    pub records: Vec<T>,
    pub summary: CrawlSummary,
}

/// Report with its selectors compiled once per job
struct PreparedReport {
    spec: ReportSpec,
    rows: Selector,
    pagination: Selector,
}

impl PreparedReport {
    fn new(spec: &ReportSpec) -> Result<Self, CrawlError> {
        let invalid = |reason: String| CrawlError::InvalidReport {
            report: spec.name.clone(),
            reason,
        };

        let rows = Selector::parse(&spec.row_selector)
            .map_err(|e| invalid(format!("row selector {:?}: {e}", spec.row_selector)))?;
        let pagination = Selector::parse(&spec.pagination_selector).map_err(|e| {
            invalid(format!("pagination selector {:?}: {e}", spec.pagination_selector))
        })?;

        Ok(Self {
            spec: spec.clone(),
            rows,
            pagination,
        })
    }

    fn name(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Default)]
struct WorkerTally<T> {
    records: Vec<T>,
    pages_ok: usize,
    failed_pages: Vec<u32>,
}

pub struct ReportCrawler {
    fetcher: Arc<dyn PageFetcher>,
    tokens: Arc<dyn TokenSource>,
    limiter: Arc<SharedRateLimiter>,
    base_url: Url,
    config: CrawlerConfig,
}

impl ReportCrawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        tokens: Arc<dyn TokenSource>,
        limiter: Arc<SharedRateLimiter>,
        base_url: Url,
        config: CrawlerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            tokens,
            limiter,
            base_url,
            config,
        })
    }

    /// Page count of `report`, read from the pagination of the probe page
    pub async fn discover_last_page(
        &self,
        report: &ReportSpec,
        cancel: &CancellationToken,
    ) -> Result<u32, CrawlError> {
        let prepared = PreparedReport::new(report)?;
        self.discover(&prepared, cancel).await
    }

    async fn discover(
        &self,
        report: &PreparedReport,
        cancel: &CancellationToken,
    ) -> Result<u32, CrawlError> {
        let probe = self.config.probe_page;
        let page = self
            .fetch_page(report, probe, cancel)
            .await
            .map_err(|failure| match failure {
                PageFailure::Cancelled => CrawlError::Cancelled {
                    report: report.name().to_string(),
                },
                PageFailure::Token(TokenError::NoActiveTokens) => CrawlError::NoActiveTokens {
                    report: report.name().to_string(),
                },
                other => CrawlError::PaginationDiscovery {
                    report: report.name().to_string(),
                    reason: other.to_string(),
                },
            })?;

        let pages = page.other_pages(&report.pagination);
        let last = last_page(&pages);
        info!(
            "Report {}: {} pages (probe page {} advertised {:?})",
            report.name(),
            last,
            probe,
            pages
        );
        Ok(last)
    }

    async fn fetch_page(
        &self,
        report: &PreparedReport,
        number: u32,
        cancel: &CancellationToken,
    ) -> Result<Page, PageFailure> {
        let url = report.spec.page_url(&self.base_url, number)?;
        let token = self.tokens.active_token().await?;

        self.limiter
            .acquire(cancel)
            .await
            .map_err(|_| PageFailure::Cancelled)?;

        let body = self
            .fetcher
            .fetch(url.as_str(), &token, cancel)
            .await
            .map_err(|error| match error.cause {
                FetchCause::Cancelled => PageFailure::Cancelled,
                _ => PageFailure::Fetch(error),
            })?;

        Ok(Page::new(number, body))
    }

    /// Fetch one page and decode its rows; rows that fail are logged and dropped
    async fn process_page<T: Extract>(
        &self,
        report: &PreparedReport,
        number: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, PageFailure> {
        let page = self.fetch_page(report, number, cancel).await?;
        let decoded = page.records::<T>(&report.rows);

        for error in &decoded.errors {
            warn!("Report {} page {}: skipping row, {}", report.name(), number, error);
        }
        Ok(decoded.records)
    }

    async fn run_worker<T: Extract + Send>(
        self: Arc<Self>,
        worker_id: usize,
        report: Arc<PreparedReport>,
        queue: Arc<Mutex<mpsc::Receiver<u32>>>,
        cancel: CancellationToken,
        output: Option<mpsc::Sender<T>>,
    ) -> WorkerTally<T> {
        let mut tally = WorkerTally {
            records: Vec::new(),
            pages_ok: 0,
            failed_pages: Vec::new(),
        };

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = queue.lock().await.recv().await;
            let Some(number) = next else {
                break;
            };

            match self.process_page::<T>(&report, number, &cancel).await {
                Ok(records) => {
                    tally.pages_ok += 1;
                    match &output {
                        Some(sender) => {
                            for record in records {
                                if sender.send(record).await.is_err() {
                                    debug!("Worker {}: record consumer went away", worker_id);
                                    cancel.cancel();
                                    return tally;
                                }
                            }
                        }
                        None => tally.records.extend(records),
                    }
                }
                Err(PageFailure::Cancelled) => break,
                Err(failure) => {
                    warn!("Report {}: skipping page {}: {}", report.name(), number, failure);
                    tally.failed_pages.push(number);
                }
            }
        }

        debug!("Worker {} finished ({} pages ok)", worker_id, tally.pages_ok);
        tally
    }

    /// Discover the page count and start the worker pool
    async fn start<T: Extract + Send>(
        self: &Arc<Self>,
        job: &CrawlJob,
        output: Option<mpsc::Sender<T>>,
    ) -> Result<RunningCrawl<T>, CrawlError> {
        let report = Arc::new(PreparedReport::new(&job.report)?);
        let (cancel, guard) = job_cancellation(job);

        let last_page = self.discover(&report, &cancel).await?;
        let queue = spawn_page_queue(last_page, self.config.queue_capacity, cancel.clone());

        let worker_count = job
            .workers
            .unwrap_or(self.config.workers)
            .clamp(1, last_page as usize);

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(Arc::clone(self).run_worker::<T>(
                worker_id,
                Arc::clone(&report),
                Arc::clone(&queue),
                cancel.clone(),
                output.clone(),
            ));
        }

        debug!(
            "Crawl {} of report {}: {} workers over {} pages",
            job.id,
            report.name(),
            worker_count,
            last_page
        );

        Ok(RunningCrawl {
            report_name: report.name().to_string(),
            last_page,
            workers,
            cancel,
            _deadline: guard,
        })
    }

    /// Crawl every page of the job's report and collect the records
    pub async fn crawl_all<T: Extract + Send>(
        self: &Arc<Self>,
        job: &CrawlJob,
    ) -> Result<CrawlReport<T>, CrawlError> {
        let running = self.start::<T>(job, None).await?;
        Ok(running.finish().await)
    }

    /// Crawl every page of the job's report, yielding records as pages decode.
    ///
    /// Discovery runs before this returns, so a report whose page count
    /// cannot be determined fails here rather than as an empty stream.
    /// Dropping the stream cancels the remaining pages.
    pub async fn crawl_stream<T: Extract + Send>(
        self: &Arc<Self>,
        job: &CrawlJob,
    ) -> Result<ReceiverStream<T>, CrawlError> {
        let (sender, receiver) = mpsc::channel(self.config.output_buffer.max(1));
        let running = self.start::<T>(job, Some(sender)).await?;

        tokio::spawn(async move {
            running.finish().await;
        });

        Ok(ReceiverStream::new(receiver))
    }
}

struct RunningCrawl<T> {
    report_name: String,
    last_page: u32,
    workers: JoinSet<WorkerTally<T>>,
    cancel: CancellationToken,
    _deadline: Option<DropGuard>,
}

impl<T: Send + 'static> RunningCrawl<T> {
    /// Wait for every worker and merge their results
    async fn finish(mut self) -> CrawlReport<T> {
        let mut records = Vec::new();
        let mut summary = CrawlSummary {
            last_page: self.last_page,
            ..CrawlSummary::default()
        };

        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(tally) => {
                    summary.pages_ok += tally.pages_ok;
                    summary.failed_pages.extend(tally.failed_pages);
                    records.extend(tally.records);
                }
                Err(e) => warn!("Crawl worker for report {} panicked: {}", self.report_name, e),
            }
        }

        summary.failed_pages.sort_unstable();
        summary.pages_failed = summary.failed_pages.len();
        summary.records = records.len();
        summary.cancelled = self.cancel.is_cancelled();

        if summary.pages_failed > 0 {
            warn!(
                "Report {}: {} of {} pages failed: {:?}",
                self.report_name, summary.pages_failed, summary.last_page, summary.failed_pages
            );
        }
        info!(
            "Report {} crawled: {} pages ok, {} records{}",
            self.report_name,
            summary.pages_ok,
            summary.records,
            if summary.cancelled { " (cancelled)" } else { "" }
        );

        CrawlReport { records, summary }
    }
}

/// Child of the job's token, cancelled by the job deadline if there is one.
///
/// The guard stops the deadline timer when the crawl is done.
fn job_cancellation(job: &CrawlJob) -> (CancellationToken, Option<DropGuard>) {
    let cancel = job.cancel.child_token();
    let Some(deadline) = job.deadline else {
        return (cancel, None);
    };

    let timer = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(deadline) => {
                warn!("Crawl deadline of {:?} reached", deadline);
                timer.cancel();
            }
            () = timer.cancelled() => {}
        }
    });

    (cancel.clone(), Some(cancel.drop_guard()))
}

/// Feed `1..=last_page` into a bounded queue shared by the workers
fn spawn_page_queue(
    last_page: u32,
    capacity: usize,
    cancel: CancellationToken,
) -> Arc<Mutex<mpsc::Receiver<u32>>> {
    let (sender, receiver) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        for number in 1..=last_page {
            tokio::select! {
                sent = sender.send(number) => {
                    if sent.is_err() {
                        break;
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    });

    Arc::new(Mutex::new(receiver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};
    use std::num::NonZeroU32;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use once_cell::sync::Lazy;

    use crate::infrastructure::extract::Schema;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Row {
        page: u32,
        item: String,
    }

    impl Extract for Row {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: Lazy<Schema<Row>> = Lazy::new(|| {
                Schema::builder()
                    .field("page", "@page", |row: &mut Row| &mut row.page)
                    .field("item", "@item", |row: &mut Row| &mut row.item)
                    .build()
            });
            &SCHEMA
        }
    }

    /// Serves `pages` numbered pages of two rows each
    struct ReportSite {
        pages: u32,
        failing: HashSet<u32>,
        probe_fails: bool,
        delay: Option<Duration>,
        requested: StdMutex<Vec<u32>>,
    }

    impl ReportSite {
        fn new(pages: u32) -> Self {
            Self {
                pages,
                failing: HashSet::new(),
                probe_fails: false,
                delay: None,
                requested: StdMutex::new(Vec::new()),
            }
        }

        fn body(&self, page: u32) -> String {
            let mut html = String::from("<html><body><ul>");
            if page <= self.pages {
                for item in ["a", "b"] {
                    html.push_str(&format!(
                        "<li class=\"row\"><span data-key=\"page\">{page}</span><span data-key=\"item\">{item}</span></li>"
                    ));
                }
            }
            html.push_str("</ul><nav class=\"pagination\">");
            for number in 1..=self.pages {
                html.push_str(&format!("<a href=\"?page={number}\">{number}</a>"));
            }
            html.push_str("<a href=\"#\">»</a></nav></body></html>");
            html
        }
    }

    #[async_trait]
    impl PageFetcher for ReportSite {
        async fn fetch(&self, url: &str, token: &str, cancel: &CancellationToken) -> Result<String, FetchError> {
            assert_eq!(token, "tok");
            let page: u32 = Url::parse(url)
                .unwrap()
                .query_pairs()
                .find(|(key, _)| key == "page")
                .and_then(|(_, value)| value.parse().ok())
                .unwrap();

            if let Some(delay) = self.delay {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(FetchError::new(url, FetchCause::Cancelled)),
                }
            }

            self.requested.lock().unwrap().push(page);
            let probe = page > self.pages;
            if (probe && self.probe_fails) || self.failing.contains(&page) {
                return Err(FetchError::new(url, FetchCause::Status(500)));
            }
            Ok(self.body(page))
        }
    }

    struct FixedToken(Option<&'static str>);

    #[async_trait]
    impl TokenSource for FixedToken {
        async fn active_token(&self) -> Result<String, TokenError> {
            self.0.map(str::to_string).ok_or(TokenError::NoActiveTokens)
        }
    }

    fn crawler(site: Arc<ReportSite>, token: Option<&'static str>, workers: usize) -> Arc<ReportCrawler> {
        ReportCrawler::new(
            site,
            Arc::new(FixedToken(token)),
            Arc::new(SharedRateLimiter::per_second(NonZeroU32::new(1000).unwrap())),
            Url::parse("https://backoffice.example.com/").unwrap(),
            CrawlerConfig {
                workers,
                queue_capacity: 2,
                ..CrawlerConfig::default()
            },
        )
    }

    fn job() -> CrawlJob {
        CrawlJob::new(
            ReportSpec::new("test", "/reports/test?page={page}", "li.row")
                .with_pagination_selector("nav.pagination a"),
        )
    }

    fn pages_of(records: &[Row]) -> BTreeSet<u32> {
        records.iter().map(|row| row.page).collect()
    }

    #[tokio::test]
    async fn test_every_page_is_visited_once() {
        let site = Arc::new(ReportSite::new(7));
        let crawler = crawler(site.clone(), Some("tok"), 3);

        let report = crawler.crawl_all::<Row>(&job()).await.unwrap();

        assert_eq!(report.summary.last_page, 7);
        assert_eq!(report.summary.pages_ok, 7);
        assert_eq!(report.records.len(), 14);
        assert_eq!(pages_of(&report.records), (1..=7).collect());

        let mut requested = site.requested.lock().unwrap().clone();
        requested.sort_unstable();
        let mut expected: Vec<u32> = (1..=7).collect();
        expected.push(9999);
        assert_eq!(requested, expected);
    }

    #[tokio::test]
    async fn test_failed_page_is_skipped() {
        let mut site = ReportSite::new(5);
        site.failing.insert(3);
        let crawler = crawler(Arc::new(site), Some("tok"), 2);

        let report = crawler.crawl_all::<Row>(&job()).await.unwrap();

        assert_eq!(pages_of(&report.records), BTreeSet::from([1, 2, 4, 5]));
        assert_eq!(report.summary.pages_ok, 4);
        assert_eq!(report.summary.failed_pages, vec![3]);
        assert!(!report.summary.cancelled);
    }

    #[tokio::test]
    async fn test_failed_discovery_is_fatal() {
        let mut site = ReportSite::new(5);
        site.probe_fails = true;
        let site = Arc::new(site);
        let crawler = crawler(site.clone(), Some("tok"), 2);

        let error = crawler.crawl_all::<Row>(&job()).await.unwrap_err();

        assert!(matches!(error, CrawlError::PaginationDiscovery { .. }));
        assert_eq!(*site.requested.lock().unwrap(), vec![9999]);
    }

    #[tokio::test]
    async fn test_no_token_is_fatal_at_discovery() {
        let crawler = crawler(Arc::new(ReportSite::new(2)), None, 2);

        let error = crawler.crawl_all::<Row>(&job()).await.unwrap_err();
        assert_eq!(error, CrawlError::NoActiveTokens { report: "test".to_string() });
    }

    #[tokio::test]
    async fn test_report_without_pagination_has_one_page() {
        let crawler = crawler(Arc::new(ReportSite::new(0)), Some("tok"), 4);

        let report = crawler.crawl_all::<Row>(&job()).await.unwrap();
        assert_eq!(report.summary.last_page, 1);
        assert_eq!(report.summary.pages_ok, 1);
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_row_selector_is_rejected() {
        let crawler = crawler(Arc::new(ReportSite::new(2)), Some("tok"), 2);
        let job = CrawlJob::new(ReportSpec::new("broken", "/r?page={page}", "li[[["));

        let error = crawler.crawl_all::<Row>(&job).await.unwrap_err();
        assert!(matches!(error, CrawlError::InvalidReport { .. }));
    }

    #[tokio::test]
    async fn test_stream_yields_all_records() {
        let crawler = crawler(Arc::new(ReportSite::new(4)), Some("tok"), 2);

        let stream = crawler.crawl_stream::<Row>(&job()).await.unwrap();
        let records: Vec<Row> = stream.collect().await;

        assert_eq!(records.len(), 8);
        assert_eq!(pages_of(&records), (1..=4).collect());
    }

    #[tokio::test]
    async fn test_deadline_stops_remaining_pages() {
        let mut site = ReportSite::new(50);
        site.delay = Some(Duration::from_millis(20));
        let crawler = crawler(Arc::new(site), Some("tok"), 1);
        let job = job().with_deadline(Duration::from_millis(150));

        let report = crawler.crawl_all::<Row>(&job).await.unwrap();

        assert!(report.summary.cancelled);
        assert!(report.summary.pages_ok < 50);
    }

    #[tokio::test]
    async fn test_cancelled_job_fails_before_discovery() {
        let crawler = crawler(Arc::new(ReportSite::new(3)), Some("tok"), 2);
        let job = job();
        job.cancel.cancel();

        let error = crawler.crawl_all::<Row>(&job).await.unwrap_err();
        assert_eq!(error, CrawlError::Cancelled { report: "test".to_string() });
    }

    #[test]
    fn test_summary_counts_serialize() {
        let summary = CrawlSummary {
            last_page: 5,
            pages_ok: 4,
            pages_failed: 1,
            failed_pages: vec![3],
            records: 8,
            cancelled: false,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["failed_pages"], serde_json::json!([3]));
    }
}
