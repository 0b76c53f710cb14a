//! Typed rows of the back-office reports
//!
//! Each record maps onto one row element selected by the report's row
//! selector. Cells are located either by position (`"1"`, `"2"`, ...) for
//! plain tables, or by `data-key` for the richer detail views.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::report::ReportSpec;
use crate::infrastructure::extract::{
    Decode, DecodeError, DecodeResult, Extract, Schema, Selection, parse_decimal, parse_percent,
};

const DATE_FORMATS: [&str; 2] = ["%d.%m.%Y", "%Y-%m-%d"];
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

/// Calendar date rendered as `dd.mm.yyyy` (detail views sometimes use ISO)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportDate(pub NaiveDate);

impl Decode for ReportDate {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        let text = selection.value();
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(&text, format).ok())
            .map(ReportDate)
            .ok_or_else(|| DecodeError::invalid_date(&text))
    }
}

/// Wall-clock time of a shift boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClockTime(pub NaiveTime);

impl Decode for ClockTime {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        let text = selection.value();
        TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(&text, format).ok())
            .map(ClockTime)
            .ok_or_else(|| DecodeError::invalid_value(&text, "not a time of day"))
    }
}

/// Percentage value, `19 %` is stored as `19.0`
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(pub f64);

impl Percent {
    pub fn fraction(self) -> f64 {
        self.0 / 100.0
    }
}

impl Decode for Percent {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        parse_percent(&selection.value()).map(Percent)
    }
}

static QUANTITY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?[\d.,]+)\s*(\S*)$").expect("quantity pattern is valid"));

/// Amount with a unit of measure, such as `12,5 kg`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub amount: f64,
    pub unit: String,
}

impl Quantity {
    pub fn parse(text: &str) -> DecodeResult<Self> {
        let captures = QUANTITY_PATTERN
            .captures(text.trim())
            .ok_or_else(|| DecodeError::invalid_value(text, "not a quantity"))?;

        let amount = parse_decimal(&captures[1])?;
        let unit = captures.get(2).map(|unit| unit.as_str()).unwrap_or_default();

        Ok(Self {
            amount,
            unit: unit.to_string(),
        })
    }
}

impl Decode for Quantity {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        Quantity::parse(&selection.value())
    }
}

/// Line of the daily sales report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesRow {
    pub date: Option<ReportDate>,
    pub receipt: String,
    pub store: String,
    pub net: f64,
    pub vat: Percent,
    pub gross: f64,
}

impl Extract for SalesRow {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<SalesRow>> = Lazy::new(|| {
            Schema::builder()
                .field("date", "1", |row: &mut SalesRow| &mut row.date)
                .field("receipt", "2", |row: &mut SalesRow| &mut row.receipt)
                .field("store", "3", |row: &mut SalesRow| &mut row.store)
                .field("net", "@net", |row: &mut SalesRow| &mut row.net)
                .field("vat", "@vat", |row: &mut SalesRow| &mut row.vat)
                .field("gross", "@gross", |row: &mut SalesRow| &mut row.gross)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub sku: String,
    pub name: String,
    pub category: String,
    pub on_hand: Quantity,
    pub unit_cost: f64,
    /// Items without a list price are sold at cost
    pub price: Option<f64>,
}

impl Extract for InventoryItem {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<InventoryItem>> = Lazy::new(|| {
            Schema::builder()
                .field("sku", "@sku", |item: &mut InventoryItem| &mut item.sku)
                .field("name", "@name", |item: &mut InventoryItem| &mut item.name)
                .field("category", "@category", |item: &mut InventoryItem| &mut item.category)
                .field("on_hand", "@on-hand", |item: &mut InventoryItem| &mut item.on_hand)
                .field("unit_cost", "@unit-cost", |item: &mut InventoryItem| &mut item.unit_cost)
                .field("price", "@price", |item: &mut InventoryItem| &mut item.price)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub name: String,
    pub vat_id: String,
}

impl Extract for Supplier {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<Supplier>> = Lazy::new(|| {
            Schema::builder()
                .field("name", "@supplier", |supplier: &mut Supplier| &mut supplier.name)
                .field("vat_id", "@supplier-vat", |supplier: &mut Supplier| &mut supplier.vat_id)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub article: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount: Percent,
    pub amount: f64,
}

impl Extract for InvoiceLine {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<InvoiceLine>> = Lazy::new(|| {
            Schema::builder()
                .field("article", "@article", |line: &mut InvoiceLine| &mut line.article)
                .field("quantity", "@qty", |line: &mut InvoiceLine| &mut line.quantity)
                .field("unit_price", "@unit-price", |line: &mut InvoiceLine| &mut line.unit_price)
                .field("discount", "@discount", |line: &mut InvoiceLine| &mut line.discount)
                .field("amount", "@amount", |line: &mut InvoiceLine| &mut line.amount)
                .build()
        });
        &SCHEMA
    }
}

/// Supplier invoice with its repeated line items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcurementInvoice {
    pub supplier: Supplier,
    pub number: String,
    pub issued: Option<ReportDate>,
    pub due: Option<ReportDate>,
    pub total: f64,
    pub lines: Vec<InvoiceLine>,
}

impl ProcurementInvoice {
    pub fn lines_total(&self) -> f64 {
        self.lines.iter().map(|line| line.amount).sum()
    }
}

impl Extract for ProcurementInvoice {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<ProcurementInvoice>> = Lazy::new(|| {
            Schema::builder()
                .nested("supplier", "<self>", |invoice: &mut ProcurementInvoice| &mut invoice.supplier)
                .field("number", "@number", |invoice: &mut ProcurementInvoice| &mut invoice.number)
                .field("issued", "@issued", |invoice: &mut ProcurementInvoice| &mut invoice.issued)
                .field("due", "@due", |invoice: &mut ProcurementInvoice| &mut invoice.due)
                .field("total", "@total", |invoice: &mut ProcurementInvoice| &mut invoice.total)
                .list("lines", ".line{}", |invoice: &mut ProcurementInvoice| &mut invoice.lines)
                .build()
        });
        &SCHEMA
    }
}

/// Staff shift from the roster report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub date: Option<ReportDate>,
    pub employee: String,
    pub role: String,
    pub starts: Option<ClockTime>,
    pub ends: Option<ClockTime>,
    pub hours: f64,
}

impl Extract for Shift {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<Shift>> = Lazy::new(|| {
            Schema::builder()
                .field("date", "1", |shift: &mut Shift| &mut shift.date)
                .field("employee", "2", |shift: &mut Shift| &mut shift.employee)
                .field("role", "3", |shift: &mut Shift| &mut shift.role)
                .field("starts", "4", |shift: &mut Shift| &mut shift.starts)
                .field("ends", "5", |shift: &mut Shift| &mut shift.ends)
                .field("hours", "6", |shift: &mut Shift| &mut shift.hours)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockCountLine {
    pub sku: String,
    pub expected: f64,
    /// Entered by staff into an input field of the count sheet
    pub counted: f64,
}

impl StockCountLine {
    pub fn variance(&self) -> f64 {
        self.counted - self.expected
    }
}

impl Extract for StockCountLine {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<StockCountLine>> = Lazy::new(|| {
            Schema::builder()
                .field("sku", "@sku", |line: &mut StockCountLine| &mut line.sku)
                .field("expected", "@expected", |line: &mut StockCountLine| &mut line.expected)
                .field("counted", "@counted", |line: &mut StockCountLine| &mut line.counted)
                .build()
        });
        &SCHEMA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockCount {
    pub reference: String,
    pub location: String,
    pub date: Option<ReportDate>,
    pub lines: Vec<StockCountLine>,
}

impl Extract for StockCount {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: Lazy<Schema<StockCount>> = Lazy::new(|| {
            Schema::builder()
                .field("reference", "@reference", |count: &mut StockCount| &mut count.reference)
                .field("location", "@location", |count: &mut StockCount| &mut count.location)
                .field("date", "@date", |count: &mut StockCount| &mut count.date)
                .list("lines", ".count-line{}", |count: &mut StockCount| &mut count.lines)
                .build()
        });
        &SCHEMA
    }
}

/// The reports this crate knows how to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Sales,
    Inventory,
    Procurement,
    Shifts,
    StockCounts,
}

impl ReportKind {
    pub fn name(self) -> &'static str {
        match self {
            ReportKind::Sales => "sales",
            ReportKind::Inventory => "inventory",
            ReportKind::Procurement => "procurement",
            ReportKind::Shifts => "shifts",
            ReportKind::StockCounts => "stock_counts",
        }
    }

    /// Where the report lives on the site and how its rows are marked up
    pub fn report_spec(self) -> ReportSpec {
        match self {
            ReportKind::Sales => {
                ReportSpec::new(self.name(), "/reports/sales?page={page}", "table.report tbody tr")
            }
            ReportKind::Inventory => {
                ReportSpec::new(self.name(), "/inventory/items?page={page}", "div.item-card")
            }
            ReportKind::Procurement => {
                ReportSpec::new(self.name(), "/procurement/invoices?page={page}", "article.invoice")
            }
            ReportKind::Shifts => {
                ReportSpec::new(self.name(), "/staff/shifts?page={page}", "table.roster tbody tr")
            }
            ReportKind::StockCounts => {
                ReportSpec::new(self.name(), "/inventory/counts?page={page}", "section.stock-count")
            }
        }
    }
}
