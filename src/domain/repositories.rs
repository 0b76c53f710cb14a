//! Repository interfaces
//!
//! Persistence contract for session tokens. The token manager only ever
//! reads the non-expired set and writes probe outcomes back in one batch;
//! the remaining operations serve operator administration.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::token::TokenRecord;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Tokens whose persisted state is `Unchecked` or `Active`
    async fn non_expired_tokens(&self) -> Result<Vec<String>>;

    /// Persist probe outcomes atomically; all rows are written or none.
    /// Rows already stored as `Expired` are left untouched.
    async fn upsert_token_states(&self, records: &[TokenRecord]) -> Result<()>;

    /// Add operator-supplied tokens as `Unchecked`, returning how many rows
    /// were created or revived from `Expired`
    async fn insert_tokens(&self, tokens: &[String]) -> Result<usize>;

    async fn delete_token(&self, token: &str) -> Result<bool>;

    async fn list_tokens(&self) -> Result<Vec<TokenRecord>>;
}
