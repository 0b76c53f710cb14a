//! Field mapping rules
//!
//! A rule string is classified once, when a type's schema is built:
//!
//! | rule          | meaning                                                   |
//! |---------------|-----------------------------------------------------------|
//! | `<self>`      | the current selection, unchanged                          |
//! | `3`           | the 3rd direct child element (1-based)                    |
//! | `@net`        | first descendant with `data-key="net"`                    |
//! | `td.total`    | first descendant matching the CSS selector                |
//! | `.line{}`     | list template: `.line`, `.line1`, `.line2`, ...           |

use scraper::Selector;

use super::error::{DecodeError, DecodeResult};
use super::selection::Selection;

pub const SELF_RULE: &str = "<self>";
pub const KEYED_PREFIX: char = '@';
pub const REPEAT_PLACEHOLDER: &str = "{}";

/// How a field locates its sub-selection inside the parent selection
#[derive(Debug, Clone)]
pub enum Locator {
    SelfNode,
    Nth(usize),
    Keyed(String),
    Css(Box<Selector>),
    /// Rule that failed to classify; reported when the field is decoded
    Invalid { rule: String, reason: String },
}

impl Locator {
    /// Classify a rule string; never fails, bad rules become `Invalid`
    pub fn parse(rule: &str) -> Self {
        Self::try_parse(rule).unwrap_or_else(|reason| Locator::Invalid {
            rule: rule.to_string(),
            reason,
        })
    }

    fn try_parse(rule: &str) -> Result<Self, String> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err("empty rule".to_string());
        }
        if rule == SELF_RULE {
            return Ok(Locator::SelfNode);
        }
        if rule.contains(REPEAT_PLACEHOLDER) {
            return Err("repetition placeholder outside a list field".to_string());
        }
        if rule.bytes().all(|byte| byte.is_ascii_digit()) {
            return match rule.parse::<usize>() {
                Ok(0) => Err("positions are 1-based".to_string()),
                Ok(position) => Ok(Locator::Nth(position)),
                Err(e) => Err(e.to_string()),
            };
        }
        if let Some(key) = rule.strip_prefix(KEYED_PREFIX) {
            if key.is_empty() {
                return Err("empty key".to_string());
            }
            return Ok(Locator::Keyed(key.to_string()));
        }
        Selector::parse(rule)
            .map(|selector| Locator::Css(Box::new(selector)))
            .map_err(|e| format!("invalid selector: {e}"))
    }

    /// Narrow `selection`; `Ok(None)` means the field is absent
    pub fn resolve<'a>(&self, selection: Selection<'a>) -> DecodeResult<Option<Selection<'a>>> {
        Ok(match self {
            Locator::SelfNode => Some(selection),
            Locator::Nth(position) => selection.nth_child(*position),
            Locator::Keyed(key) => selection.keyed(key),
            Locator::Css(selector) => selection.select_first(selector),
            Locator::Invalid { rule, reason } => {
                return Err(DecodeError::invalid_rule(rule, reason.clone()));
            }
        })
    }
}

/// Locator template for repeated sub-records
#[derive(Debug, Clone)]
pub struct Template {
    rule: String,
    prefix: String,
    suffix: String,
    error: Option<String>,
}

impl Template {
    pub fn parse(rule: &str) -> Self {
        let rule = rule.trim().to_string();
        let (prefix, suffix, error) = match rule.matches(REPEAT_PLACEHOLDER).count() {
            1 => {
                let (prefix, suffix) = rule
                    .split_once(REPEAT_PLACEHOLDER)
                    .unwrap_or((rule.as_str(), ""));
                (prefix.to_string(), suffix.to_string(), None)
            }
            count => (
                String::new(),
                String::new(),
                Some(format!(
                    "list rule needs exactly one placeholder, found {count}"
                )),
            ),
        };

        let mut template = Self {
            rule,
            prefix,
            suffix,
            error,
        };

        if template.error.is_none() {
            // Index 0 renders an empty placeholder, so the rule must also
            // hold up on its own, e.g. `td{}` would become a bare `td`.
            for probe in [0, 1] {
                if let Locator::Invalid { reason, .. } = Locator::parse(&template.render(probe)) {
                    template.error = Some(reason);
                    break;
                }
            }
        }

        template
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Index 0 renders as the empty string, N >= 1 as the literal number
    pub fn render(&self, index: usize) -> String {
        if index == 0 {
            format!("{}{}", self.prefix, self.suffix)
        } else {
            format!("{}{index}{}", self.prefix, self.suffix)
        }
    }

    pub fn locator(&self, index: usize) -> DecodeResult<Locator> {
        if let Some(reason) = &self.error {
            return Err(DecodeError::invalid_rule(&self.rule, reason.clone()));
        }
        match Locator::parse(&self.render(index)) {
            Locator::Invalid { rule, reason } => Err(DecodeError::invalid_rule(&rule, reason)),
            locator => Ok(locator),
        }
    }
}
