//! Configuration infrastructure
//!
//! Settings live in a single JSON file under the user config directory.
//! A missing file is created with defaults; a file that no longer parses is
//! backed up next to itself and replaced with defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub http: HttpClientConfig,
    pub rate_limit: RateLimitConfig,
    pub crawler: CrawlerConfig,
    pub tokens: TokenConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Target site identity and the markers used to classify a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,

    /// Name of the session cookie, e.g. `BackOffice=<token>`
    pub cookie_name: String,

    /// Path fetched to probe a token
    pub home_path: String,

    /// Text only present on the signed-in start page
    pub home_marker: String,

    /// Text only present on the login form
    pub login_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub follow_redirects: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests_per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Concurrent page workers per crawl
    pub workers: usize,

    /// Page index requested to discover the page count
    pub probe_page: u32,

    /// Capacity of the page-number queue feeding the workers
    pub queue_capacity: usize,

    /// Capacity of the record channel for streaming crawls
    pub output_buffer: usize,
}

/// What a refresh does with a probe response matching neither marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguousProbePolicy {
    /// Fail the whole refresh cycle; no state is persisted or swapped
    AbortBatch,
    /// Leave the token out of this cycle and keep going
    SkipToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub refresh_interval_seconds: u64,
    pub refresh_timeout_seconds: u64,
    pub ambiguous_probe_policy: AmbiguousProbePolicy,
}

impl TokenConfig {
    /// Background refresh interval, never shorter than one minute
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(defaults::MIN_REFRESH_INTERVAL_SECONDS))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Directory for log files; defaults to `<data dir>/logs`
    pub directory: Option<PathBuf>,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            cookie_name: defaults::COOKIE_NAME.to_string(),
            home_path: defaults::HOME_PATH.to_string(),
            home_marker: defaults::HOME_MARKER.to_string(),
            login_marker: defaults::LOGIN_MARKER.to_string(),
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            follow_redirects: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            burst: defaults::RATE_LIMIT_BURST,
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: defaults::CRAWL_WORKERS,
            probe_page: defaults::PROBE_PAGE,
            queue_capacity: defaults::QUEUE_CAPACITY,
            output_buffer: defaults::OUTPUT_BUFFER,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: defaults::REFRESH_INTERVAL_SECONDS,
            refresh_timeout_seconds: defaults::REFRESH_TIMEOUT_SECONDS,
            ambiguous_probe_policy: AmbiguousProbePolicy::AbortBatch,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let url = ConfigManager::get_app_data_dir()
            .map(|dir| format!("sqlite:{}", dir.join(defaults::DATABASE_FILE).display()))
            .unwrap_or_else(|_| format!("sqlite:{}", defaults::DATABASE_FILE));
        Self {
            url,
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            directory: None,
            max_files: defaults::LOG_MAX_FILES,
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(config_dir)
    }

    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(data_dir)
    }

    /// Manager for the default config file location
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(Self::get_config_dir()?.join(defaults::CONFIG_FILE)))
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(parse_error) => {
                warn!("Configuration file could not be parsed: {}", parse_error);

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config)
                    .await
                    .context("Failed to save default configuration")?;
                warn!("Reset to default configuration");
                Ok(default_config)
            }
        }
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }
}

/// Default configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "backoffice-scraper";
    pub const CONFIG_FILE: &str = "config.json";
    pub const DATABASE_FILE: &str = "backoffice.db";

    pub const BASE_URL: &str = "https://backoffice.example.com";
    pub const COOKIE_NAME: &str = "BackOffice";
    pub const HOME_PATH: &str = "/";
    pub const HOME_MARKER: &str = "id=\"dashboard\"";
    pub const LOGIN_MARKER: &str = "id=\"login-form\"";

    pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const MAX_REQUESTS_PER_SECOND: u32 = 5;
    pub const RATE_LIMIT_BURST: u32 = 5;

    pub const CRAWL_WORKERS: usize = 4;

    /// Far past any real page count; the pagination control still lists
    /// every existing page when asked for a page that does not exist
    pub const PROBE_PAGE: u32 = 9999;
    pub const QUEUE_CAPACITY: usize = 16;
    pub const OUTPUT_BUFFER: usize = 256;

    pub const REFRESH_INTERVAL_SECONDS: u64 = 300;
    pub const MIN_REFRESH_INTERVAL_SECONDS: u64 = 60;
    pub const REFRESH_TIMEOUT_SECONDS: u64 = 60;

    pub const DB_MAX_CONNECTIONS: u32 = 5;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;
    pub const LOG_MAX_FILES: u32 = 5;
}
