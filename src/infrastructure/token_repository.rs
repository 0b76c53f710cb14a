//! SQLite implementation of the token repository
//!
//! Expiry is enforced by the upsert itself: a conflicting row already stored
//! as `expired` is never updated by a probe outcome, so two overlapping
//! refreshes cannot bring a dead token back. Only `insert_tokens` revives an
//! expired row, and only to `unchecked`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::repositories::TokenRepository;
use crate::domain::token::{TokenRecord, TokenState};

#[derive(Clone)]
pub struct SqliteTokenRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn non_expired_tokens(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT token FROM session_tokens
            WHERE state IN ('unchecked', 'active')
            ORDER BY created_at ASC, token ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("token")).collect())
    }

    async fn upsert_token_states(&self, records: &[TokenRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO session_tokens (token, state, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(token) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at
                WHERE session_tokens.state != 'expired'
                "#,
            )
            .bind(&record.token)
            .bind(record.state.as_str())
            .bind(record.updated_at.unwrap_or(now))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store state of token {}", record.masked()))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_tokens(&self, tokens: &[String]) -> Result<usize> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut stored = 0;

        for token in tokens.iter().map(|token| token.trim()).filter(|token| !token.is_empty()) {
            let result = sqlx::query(
                r#"
                INSERT INTO session_tokens (token, state, updated_at)
                VALUES (?, 'unchecked', ?)
                ON CONFLICT(token) DO UPDATE SET
                    state = 'unchecked',
                    updated_at = excluded.updated_at
                WHERE session_tokens.state = 'expired'
                "#,
            )
            .bind(token)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            stored += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn delete_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM session_tokens WHERE token = ?")
            .bind(token)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT token, state, updated_at FROM session_tokens
            ORDER BY created_at ASC, token ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let state: String = row.get("state");
                let updated_at: Option<DateTime<Utc>> = row.get("updated_at");
                Ok(TokenRecord {
                    token: row.get("token"),
                    state: state.parse::<TokenState>().map_err(anyhow::Error::msg)?,
                    updated_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use tempfile::TempDir;

    async fn repository() -> Result<(TempDir, SqliteTokenRepository)> {
        let temp_dir = tempfile::tempdir()?;
        let database_url = format!("sqlite:{}", temp_dir.path().join("tokens.db").display());
        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;
        Ok((temp_dir, SqliteTokenRepository::new(db.pool().clone())))
    }

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn state_of(records: &[TokenRecord], token: &str) -> Option<TokenState> {
        records.iter().find(|record| record.token == token).map(|record| record.state)
    }

    #[tokio::test]
    async fn test_inserted_tokens_start_unchecked() -> Result<()> {
        let (_dir, repo) = repository().await?;

        let stored = repo.insert_tokens(&tokens(&["a", " b ", "", "a"])).await?;
        assert_eq!(stored, 2);

        let listed = repo.list_tokens().await?;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|record| record.state == TokenState::Unchecked));
        assert_eq!(repo.non_expired_tokens().await?, tokens(&["a", "b"]));
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_tokens_are_excluded_and_sticky() -> Result<()> {
        let (_dir, repo) = repository().await?;
        repo.insert_tokens(&tokens(&["a", "b"])).await?;

        repo.upsert_token_states(&[
            TokenRecord::new("a", TokenState::Active),
            TokenRecord::new("b", TokenState::Expired),
        ])
        .await?;
        assert_eq!(repo.non_expired_tokens().await?, tokens(&["a"]));

        // a late success must not revive b
        repo.upsert_token_states(&[TokenRecord::new("b", TokenState::Active)]).await?;
        let listed = repo.list_tokens().await?;
        assert_eq!(state_of(&listed, "b"), Some(TokenState::Expired));
        assert!(listed.iter().all(|record| record.updated_at.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn test_reinsert_revives_expired_token_as_unchecked() -> Result<()> {
        let (_dir, repo) = repository().await?;
        repo.insert_tokens(&tokens(&["a"])).await?;
        repo.upsert_token_states(&[TokenRecord::new("a", TokenState::Expired)]).await?;

        assert_eq!(repo.insert_tokens(&tokens(&["a"])).await?, 1);
        assert_eq!(state_of(&repo.list_tokens().await?, "a"), Some(TokenState::Unchecked));
        Ok(())
    }

    #[tokio::test]
    async fn test_reinsert_leaves_active_token_alone() -> Result<()> {
        let (_dir, repo) = repository().await?;
        repo.insert_tokens(&tokens(&["a"])).await?;
        repo.upsert_token_states(&[TokenRecord::new("a", TokenState::Active)]).await?;

        assert_eq!(repo.insert_tokens(&tokens(&["a"])).await?, 0);
        assert_eq!(state_of(&repo.list_tokens().await?, "a"), Some(TokenState::Active));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_token() -> Result<()> {
        let (_dir, repo) = repository().await?;
        repo.insert_tokens(&tokens(&["a"])).await?;

        assert!(repo.delete_token("a").await?);
        assert!(!repo.delete_token("a").await?);
        assert!(repo.list_tokens().await?.is_empty());
        Ok(())
    }
}
