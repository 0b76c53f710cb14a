//! Navigable handle over a parsed HTML node
//!
//! Thin wrapper around `scraper::ElementRef` exposing only what the
//! extractor needs: descendant queries, positional and keyed child lookup,
//! text content and attribute access.

use scraper::{ElementRef, Html, Selector};

/// Attribute consulted by keyed locators (`@key`)
pub const DATA_KEY_ATTRIBUTE: &str = "data-key";

/// A selection over a single element of a parsed document
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    element: ElementRef<'a>,
}

impl<'a> Selection<'a> {
    pub fn new(element: ElementRef<'a>) -> Self {
        Self { element }
    }

    /// Selection over the document root (`<html>`)
    pub fn root(document: &'a Html) -> Self {
        Self::new(document.root_element())
    }

    pub fn element(&self) -> ElementRef<'a> {
        self.element
    }

    /// Whether both selections point at the same document node
    pub fn same_node(&self, other: &Selection<'_>) -> bool {
        self.element.id() == other.element.id()
    }

    /// Tag name of the selected element, lower-cased by the parser
    pub fn tag(&self) -> &'a str {
        self.element.value().name()
    }

    /// First descendant matching `selector`
    pub fn select_first(&self, selector: &Selector) -> Option<Selection<'a>> {
        self.element.select(selector).next().map(Selection::new)
    }

    /// All descendants matching `selector`, in document order
    pub fn select_all(&self, selector: &Selector) -> Vec<Selection<'a>> {
        self.element.select(selector).map(Selection::new).collect()
    }

    /// The `n`th (1-based) direct child element, text nodes ignored
    pub fn nth_child(&self, n: usize) -> Option<Selection<'a>> {
        if n == 0 {
            return None;
        }
        self.element
            .children()
            .filter_map(ElementRef::wrap)
            .nth(n - 1)
            .map(Selection::new)
    }

    /// First descendant whose `data-key` attribute equals `key`
    pub fn keyed(&self, key: &str) -> Option<Selection<'a>> {
        self.element
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .find(|candidate| candidate.value().attr(DATA_KEY_ATTRIBUTE) == Some(key))
            .map(Selection::new)
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    /// Concatenated text of the element and its descendants, trimmed
    pub fn text(&self) -> String {
        self.element.text().collect::<String>().trim().to_string()
    }

    /// Text a human would read in this element.
    ///
    /// Form controls render their content through attributes rather than
    /// child text: inputs use `value`, selects the value of the selected
    /// option. Everything else falls back to [`Selection::text`].
    pub fn value(&self) -> String {
        match self.tag() {
            "input" => self.attr("value").unwrap_or_default().trim().to_string(),
            "select" => self
                .element
                .children()
                .filter_map(ElementRef::wrap)
                .find(|option| option.value().attr("selected").is_some())
                .map(|option| {
                    option
                        .value()
                        .attr("value")
                        .map(|value| value.trim().to_string())
                        .unwrap_or_else(|| Selection::new(option).text())
                })
                .unwrap_or_default(),
            _ => self.text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_html() -> Html {
        Html::parse_fragment(
            r#"<table><tr id="row">
                <td> first </td>
                <td data-key="net">1.234,56</td>
                <td><input data-key="qty" value=" 12 pcs "></td>
                <td><select data-key="unit"><option value="kg">Kilo</option><option value="pcs" selected>Pieces</option></select></td>
            </tr></table>"#,
        )
    }

    fn row(document: &Html) -> Selection<'_> {
        let selector = Selector::parse("#row").unwrap();
        Selection::root(document).select_first(&selector).unwrap()
    }

    #[test]
    fn test_nth_child_is_one_based_and_skips_text() {
        let document = row_html();
        let row = row(&document);

        assert_eq!(row.nth_child(1).unwrap().text(), "first");
        assert_eq!(row.nth_child(2).unwrap().text(), "1.234,56");
        assert!(row.nth_child(0).is_none());
        assert!(row.nth_child(5).is_none());
    }

    #[test]
    fn test_keyed_lookup() {
        let document = row_html();
        let row = row(&document);

        assert_eq!(row.keyed("net").unwrap().text(), "1.234,56");
        assert!(row.keyed("missing").is_none());
    }

    #[test]
    fn test_form_controls_read_values() {
        let document = row_html();
        let row = row(&document);

        assert_eq!(row.keyed("qty").unwrap().value(), "12 pcs");
        assert_eq!(row.keyed("unit").unwrap().value(), "pcs");
        assert_eq!(row.keyed("net").unwrap().value(), "1.234,56");
    }
}
