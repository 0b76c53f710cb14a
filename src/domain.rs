//! Domain module - report, record and token types
//!
//! Plain data and the persistence contract; nothing here performs I/O.

pub mod records;
pub mod report;
pub mod repositories;
pub mod token;

pub use records::{
    ClockTime, InventoryItem, InvoiceLine, Percent, ProcurementInvoice, Quantity, ReportDate,
    ReportKind, SalesRow, Shift, StockCount, StockCountLine, Supplier,
};
pub use report::{CrawlJob, ReportError, ReportSpec};
pub use repositories::TokenRepository;
pub use token::{TokenRecord, TokenState};
