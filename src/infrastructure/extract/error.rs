//! Decode error types
//!
//! Every failure carries the struct path of the field that produced it
//! (`lines[2].quantity`), so callers can log a precise location and decide
//! whether to skip the record or the whole page.

use thiserror::Error;

/// Why a single field could not be decoded
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeCause {
    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("invalid date {0:?}")]
    InvalidDate(String),

    #[error("invalid value {text:?}: {reason}")]
    InvalidValue { text: String, reason: String },

    #[error("invalid field rule {rule:?}: {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// A field failed to decode
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to decode `{field_path}`: {cause}")]
pub struct DecodeError {
    pub field_path: String,
    pub cause: DecodeCause,
}

impl DecodeError {
    /// Error raised by a leaf decoder; the path is filled in while unwinding
    pub fn new(cause: DecodeCause) -> Self {
        Self {
            field_path: String::new(),
            cause,
        }
    }

    pub fn invalid_number(text: &str) -> Self {
        Self::new(DecodeCause::InvalidNumber(text.to_string()))
    }

    pub fn invalid_date(text: &str) -> Self {
        Self::new(DecodeCause::InvalidDate(text.to_string()))
    }

    pub fn invalid_value(text: &str, reason: impl Into<String>) -> Self {
        Self::new(DecodeCause::InvalidValue {
            text: text.to_string(),
            reason: reason.into(),
        })
    }

    pub fn invalid_rule(rule: &str, reason: impl Into<String>) -> Self {
        Self::new(DecodeCause::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        })
    }

    /// Prefix the path with the enclosing field name
    #[must_use]
    pub fn within(mut self, segment: &str) -> Self {
        self.field_path = if self.field_path.is_empty() {
            segment.to_string()
        } else {
            format!("{segment}.{}", self.field_path)
        };
        self
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;
