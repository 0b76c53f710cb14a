//! Report identity and crawl job parameters

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// Placeholder in a path template replaced by the page number
pub const PAGE_PLACEHOLDER: &str = "{page}";

pub const DEFAULT_PAGINATION_SELECTOR: &str = ".pagination a";

const DATE_FROM_PARAM: &str = "from";
const DATE_TO_PARAM: &str = "to";
const DATE_PARAM_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    #[error("path template {0:?} has no {{page}} placeholder")]
    MissingPagePlaceholder(String),

    #[error("invalid report URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid {what} selector {selector:?}: {reason}")]
    InvalidSelector {
        what: &'static str,
        selector: String,
        reason: String,
    },
}

/// Which report to crawl and how its pages are laid out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSpec {
    pub name: String,

    /// Site-relative path with a `{page}` placeholder
    pub path_template: String,

    /// Selects one element per record on a page
    pub row_selector: String,

    /// Selects the anchors of the pagination control
    pub pagination_selector: String,

    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,

    /// Extra query pairs appended to every page URL
    pub filters: Vec<(String, String)>,
}

impl ReportSpec {
    pub fn new(
        name: impl Into<String>,
        path_template: impl Into<String>,
        row_selector: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path_template: path_template.into(),
            row_selector: row_selector.into(),
            pagination_selector: DEFAULT_PAGINATION_SELECTOR.to_string(),
            date_from: None,
            date_to: None,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_pagination_selector(mut self, selector: impl Into<String>) -> Self {
        self.pagination_selector = selector.into();
        self
    }

    #[must_use]
    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// Absolute URL of page `page` of this report
    pub fn page_url(&self, base: &Url, page: u32) -> Result<Url, ReportError> {
        if !self.path_template.contains(PAGE_PLACEHOLDER) {
            return Err(ReportError::MissingPagePlaceholder(self.path_template.clone()));
        }

        let path = self.path_template.replace(PAGE_PLACEHOLDER, &page.to_string());
        let mut url = base.join(&path).map_err(|e| ReportError::InvalidUrl {
            url: path.clone(),
            reason: e.to_string(),
        })?;

        let has_params = self.date_from.is_some() || self.date_to.is_some() || !self.filters.is_empty();
        if has_params {
            let mut query = url.query_pairs_mut();
            if let Some(from) = self.date_from {
                query.append_pair(DATE_FROM_PARAM, &from.format(DATE_PARAM_FORMAT).to_string());
            }
            if let Some(to) = self.date_to {
                query.append_pair(DATE_TO_PARAM, &to.format(DATE_PARAM_FORMAT).to_string());
            }
            for (key, value) in &self.filters {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

/// One paginated retrieval; created per invocation, never persisted
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub id: Uuid,
    pub report: ReportSpec,

    /// Overrides the configured worker count when set
    pub workers: Option<usize>,

    pub cancel: CancellationToken,

    /// Cancels the job this long after it starts
    pub deadline: Option<Duration>,
}

impl CrawlJob {
    pub fn new(report: ReportSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            report,
            workers: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
