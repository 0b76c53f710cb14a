//! Session tokens and their liveness state

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of a session token as last observed by a probe.
///
/// `Unchecked -> Active | Expired`, `Active -> Active | Expired`.
/// `Expired` is terminal: only deleting and re-inserting the token brings
/// it back, as `Unchecked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Unchecked,
    Active,
    Expired,
}

impl TokenState {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenState::Unchecked => "unchecked",
            TokenState::Active => "active",
            TokenState::Expired => "expired",
        }
    }

    /// State after a probe observed `observed`; expiry never reverts
    #[must_use]
    pub fn transition(self, observed: TokenState) -> TokenState {
        match self {
            TokenState::Expired => TokenState::Expired,
            _ => observed,
        }
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unchecked" => Ok(TokenState::Unchecked),
            "active" => Ok(TokenState::Active),
            "expired" => Ok(TokenState::Expired),
            _ => Err(format!("Invalid TokenState: {s}")),
        }
    }
}

/// A persisted token row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub state: TokenState,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>, state: TokenState) -> Self {
        Self {
            token: token.into(),
            state,
            updated_at: None,
        }
    }

    /// Token shortened for log output
    pub fn masked(&self) -> String {
        mask_token(&self.token)
    }
}

/// First characters of a token followed by an ellipsis
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    if visible.len() < token.len() {
        format!("{visible}…")
    } else {
        visible
    }
}
