//! One fetched page of a paginated report

use std::collections::BTreeSet;

use scraper::{Html, Selector};
use tracing::debug;

use super::error::DecodeError;
use super::selection::Selection;
use super::{Extract, extract};

/// Raw body of a report page; rows and pagination are derived on demand
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub body: String,
}

/// Rows decoded from one page, with the rows that failed kept apart
#[derive(Debug)]
pub struct PageRecords<T> {
    pub records: Vec<T>,
    pub errors: Vec<DecodeError>,
}

impl Page {
    pub fn new(number: u32, body: String) -> Self {
        Self { number, body }
    }

    /// Page numbers advertised by the pagination control.
    ///
    /// Every anchor matched by `pagination` whose text parses as an integer
    /// contributes; "next", "»" and the like are ignored.
    pub fn other_pages(&self, pagination: &Selector) -> BTreeSet<u32> {
        let document = Html::parse_document(&self.body);
        Selection::root(&document)
            .select_all(pagination)
            .into_iter()
            .filter_map(|anchor| anchor.text().parse::<u32>().ok())
            .collect()
    }

    /// Decode every element matched by `rows` as a `T`
    pub fn records<T: Extract>(&self, rows: &Selector) -> PageRecords<T> {
        let document = Html::parse_document(&self.body);
        let mut decoded = PageRecords {
            records: Vec::new(),
            errors: Vec::new(),
        };

        for (index, row) in Selection::root(&document).select_all(rows).into_iter().enumerate() {
            match extract::<T>(row) {
                Ok(record) => decoded.records.push(record),
                Err(e) => decoded.errors.push(e.within(&format!("row[{index}]"))),
            }
        }

        debug!(
            "Page {}: decoded {} rows ({} failed)",
            self.number,
            decoded.records.len(),
            decoded.errors.len()
        );
        decoded
    }
}

/// Highest advertised page number; a report without pagination has one page
pub fn last_page(pages: &BTreeSet<u32>) -> u32 {
    pages.iter().next_back().copied().unwrap_or(1).max(1)
}
