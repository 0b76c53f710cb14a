//! Infrastructure layer: extraction, HTTP, crawling, token lifecycle and storage

pub mod config;
pub mod crawler;
pub mod database_connection;
pub mod extract;
pub mod http_client;
pub mod logging;
pub mod rate_limit;
pub mod token_manager;
pub mod token_repository;

// Re-export commonly used items
pub use config::{AppConfig, ConfigManager};
pub use crawler::{CrawlError, CrawlReport, CrawlSummary, ReportCrawler};
pub use database_connection::DatabaseConnection;
pub use extract::{Decode, DecodeError, Extract, Schema, Selection};
pub use http_client::{FetchError, HttpClient, PageFetcher};
pub use logging::{init_logging, init_logging_with_config};
pub use rate_limit::SharedRateLimiter;
pub use token_manager::{ProbeTarget, RefreshCycle, TokenError, TokenManager, TokenSource};
pub use token_repository::SqliteTokenRepository;
