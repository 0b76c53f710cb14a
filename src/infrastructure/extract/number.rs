//! Number parsing for report cells
//!
//! The back office renders numbers in two layouts depending on the report:
//! `1.234,56` (dot groups thousands, comma is the decimal mark) and
//! `1234.56` (dot is the decimal mark, no grouping). Nothing in the markup
//! says which one a cell uses, so the layout is inferred from the digits.

use std::borrow::Cow;

use super::error::{DecodeError, DecodeResult};

/// Rewrite `text` into a form `f64::from_str` understands.
///
/// - No dot: a comma, if any, is the decimal mark.
/// - Dots present: when every dot-separated segment after the first has
///   exactly three characters before any comma, the dots group thousands
///   and are removed, and the comma becomes the decimal mark. Otherwise the
///   dot already is the decimal mark and the text is kept as is.
pub fn normalize_decimal(text: &str) -> Cow<'_, str> {
    if !text.contains('.') {
        return if text.contains(',') {
            Cow::Owned(text.replace(',', "."))
        } else {
            Cow::Borrowed(text)
        };
    }

    let grouped = text.split('.').skip(1).all(|segment| {
        let integral = segment.split(',').next().unwrap_or_default();
        integral.chars().count() == 3
    });

    if grouped {
        Cow::Owned(text.replace('.', "").replace(',', "."))
    } else {
        Cow::Borrowed(text)
    }
}

/// Parse a decimal in either of the back-office layouts
pub fn parse_decimal(text: &str) -> DecodeResult<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::invalid_number(text));
    }

    normalize_decimal(trimmed)
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| DecodeError::invalid_number(text))
}

/// Parse a percentage such as `12,34 %`, returning `12.34`
pub fn parse_percent(text: &str) -> DecodeResult<f64> {
    let trimmed = text.trim();
    let without_sign = trimmed.strip_suffix('%').unwrap_or(trimmed);
    parse_decimal(without_sign.trim()).map_err(|_| DecodeError::invalid_number(text))
}

/// Parse a whole number; a zero fractional part is accepted (`1.000` is 1000)
pub fn parse_integer(text: &str) -> DecodeResult<i64> {
    let value = parse_decimal(text)?;
    #[allow(clippy::cast_precision_loss)]
    let in_range = value >= i64::MIN as f64 && value <= i64::MAX as f64;
    if value.fract() != 0.0 || !in_range {
        return Err(DecodeError::invalid_number(text));
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(value as i64)
}
