//! Leaf decoders
//!
//! `Decode` is the escape hatch of the extractor: a type implementing it
//! reads itself straight out of a selection, bypassing schema rules. The
//! built-in implementations cover text and numbers; domain types with their
//! own textual encoding (dates, percentages, quantities) implement it too.

use super::error::{DecodeError, DecodeResult};
use super::number::{parse_decimal, parse_integer};
use super::selection::Selection;

pub trait Decode: Sized {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self>;
}

impl Decode for String {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        Ok(selection.value())
    }
}

impl Decode for f64 {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        parse_decimal(&selection.value())
    }
}

impl Decode for i64 {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        parse_integer(&selection.value())
    }
}

impl Decode for u32 {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        let text = selection.value();
        let value = parse_integer(&text)?;
        u32::try_from(value).map_err(|_| DecodeError::invalid_number(&text))
    }
}

impl Decode for bool {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        if selection.tag() == "input" {
            return Ok(selection.attr("checked").is_some());
        }
        let text = selection.value();
        match text.to_lowercase().as_str() {
            "1" | "yes" | "true" | "ja" | "x" => Ok(true),
            "" | "0" | "no" | "false" | "nein" | "-" => Ok(false),
            _ => Err(DecodeError::invalid_value(&text, "not a boolean")),
        }
    }
}

/// Empty cells decode to `None`
impl<T: Decode> Decode for Option<T> {
    fn decode(selection: Selection<'_>) -> DecodeResult<Self> {
        if selection.value().is_empty() {
            Ok(None)
        } else {
            T::decode(selection).map(Some)
        }
    }
}
