//! Back-office report scraper
//!
//! Crawls paginated, server-rendered reports of a retail back office and
//! decodes them into typed records, authenticating with a pool of session
//! tokens whose liveness is checked in the background.

pub mod domain;
pub mod infrastructure;

pub use domain::{CrawlJob, ReportKind, ReportSpec, TokenState};
pub use infrastructure::{CrawlError, CrawlReport, ReportCrawler, TokenManager};
