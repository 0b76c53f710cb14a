//! Declarative HTML extraction
//!
//! Record types describe once, in a static [`Schema`], where each field lives
//! inside a row of markup. Decoding a selection then walks that table:
//! leaf fields go through [`Decode`], nested records recurse through their
//! own schema, and list fields probe a locator template (`.line{}`) until an
//! index resolves to nothing.
//!
//! ```ignore
//! impl Extract for InvoiceLine {
//!     fn schema() -> &'static Schema<Self> {
//!         static SCHEMA: Lazy<Schema<InvoiceLine>> = Lazy::new(|| {
//!             Schema::builder()
//!                 .field("article", "@article", |line| &mut line.article)
//!                 .field("amount", "@amount", |line| &mut line.amount)
//!                 .build()
//!         });
//!         &SCHEMA
//!     }
//! }
//! ```

pub mod error;
pub mod leaf;
pub mod number;
pub mod page;
pub mod rule;
pub mod schema;
pub mod selection;

pub use error::{DecodeCause, DecodeError, DecodeResult};
pub use leaf::Decode;
pub use number::{parse_decimal, parse_integer, parse_percent};
pub use page::{Page, PageRecords, last_page};
pub use rule::{Locator, Template};
pub use schema::{Schema, SchemaBuilder};
pub use selection::Selection;

use scraper::Html;

/// A record populated from markup through a static field table
pub trait Extract: Default + Sized + 'static {
    fn schema() -> &'static Schema<Self>;
}

/// Decode `T` from `selection` according to `T::schema()`.
///
/// Fields whose locator finds nothing keep their `Default` value.
pub fn extract<T: Extract>(selection: Selection<'_>) -> DecodeResult<T> {
    let mut record = T::default();
    T::schema().apply(&mut record, selection)?;
    Ok(record)
}

/// Parse `html` as a whole document and decode `T` from its root
pub fn extract_document<T: Extract>(html: &str) -> DecodeResult<T> {
    let document = Html::parse_document(html);
    extract(Selection::root(&document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    #[derive(Debug, Default, PartialEq)]
    struct Line {
        article: String,
        amount: f64,
    }

    impl Extract for Line {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: Lazy<Schema<Line>> = Lazy::new(|| {
                Schema::builder()
                    .field("article", "1", |line: &mut Line| &mut line.article)
                    .field("amount", "@amount", |line: &mut Line| &mut line.amount)
                    .build()
            });
            &SCHEMA
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Header {
        number: String,
        supplier: String,
    }

    impl Extract for Header {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: Lazy<Schema<Header>> = Lazy::new(|| {
                Schema::builder()
                    .field("number", "@number", |header: &mut Header| &mut header.number)
                    .field("supplier", ".supplier", |header: &mut Header| &mut header.supplier)
                    .build()
            });
            &SCHEMA
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Invoice {
        header: Header,
        total: f64,
        lines: Vec<Line>,
        // filled by a later pass, never by the extractor
        reviewed_by: Option<String>,
    }

    impl Extract for Invoice {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: Lazy<Schema<Invoice>> = Lazy::new(|| {
                Schema::builder()
                    .nested("header", "<self>", |invoice: &mut Invoice| &mut invoice.header)
                    .field("total", "#total", |invoice: &mut Invoice| &mut invoice.total)
                    .list("lines", ".line{}", |invoice: &mut Invoice| &mut invoice.lines)
                    .build()
            });
            &SCHEMA
        }
    }

    const INVOICE: &str = r#"
        <html><body>
          <span data-key="number">INV-0042</span>
          <span class="supplier"> Kaffee Import GmbH </span>
          <table>
            <tr class="line"><td>Beans</td><td data-key="amount">1.250,00</td></tr>
            <tr class="line1"><td>Filters</td><td data-key="amount">12,50</td></tr>
            <tr class="line2"><td>Milk</td><td data-key="amount">40.5</td></tr>
            <tr class="line4"><td>Never reached</td><td data-key="amount">1</td></tr>
          </table>
          <div id="total">1.303,00</div>
        </body></html>
    "#;

    #[test]
    fn test_nested_record_and_templated_list() {
        let invoice: Invoice = extract_document(INVOICE).unwrap();

        assert_eq!(invoice.header.number, "INV-0042");
        assert_eq!(invoice.header.supplier, "Kaffee Import GmbH");
        assert!((invoice.total - 1303.0).abs() < 1e-9);
        assert_eq!(invoice.lines.len(), 3);
        assert_eq!(invoice.lines[1].article, "Filters");
        assert!((invoice.lines[2].amount - 40.5).abs() < 1e-9);
        assert_eq!(invoice.reviewed_by, None);
    }

    #[test]
    fn test_missing_fields_keep_defaults() {
        let invoice: Invoice = extract_document("<html><body><p>empty</p></body></html>").unwrap();

        assert_eq!(invoice, Invoice::default());
    }

    #[test]
    fn test_error_reports_field_path() {
        let html = INVOICE.replace("12,50", "twelve");
        let error = extract_document::<Invoice>(&html).unwrap_err();

        assert_eq!(error.field_path, "lines[1].amount");
        assert_eq!(error.cause, DecodeCause::InvalidNumber("twelve".to_string()));
    }

    #[derive(Debug, Default)]
    struct Register {
        lines: Vec<Line>,
    }

    impl Extract for Register {
        fn schema() -> &'static Schema<Self> {
            static SCHEMA: Lazy<Schema<Register>> = Lazy::new(|| {
                Schema::builder()
                    // the `tr` alternative matches at every index
                    .list("lines", "tr, .x{}", |register: &mut Register| &mut register.lines)
                    .build()
            });
            &SCHEMA
        }
    }

    #[test]
    fn test_list_rule_ignoring_index_is_rejected() {
        let error = extract_document::<Register>(INVOICE).unwrap_err();

        assert_eq!(error.field_path, "lines");
        assert!(matches!(
            error.cause,
            DecodeCause::InvalidRule { ref rule, .. } if rule == "tr, .x{}"
        ));
    }

    #[test]
    fn test_schema_lists_mapped_fields_only() {
        let names: Vec<_> = Invoice::schema().field_names().collect();
        assert_eq!(names, vec!["header", "total", "lines"]);
    }
}
