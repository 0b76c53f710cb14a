//! Token state machine against a real SQLite store

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use backoffice_scraper::domain::repositories::TokenRepository;
use backoffice_scraper::domain::token::{TokenRecord, TokenState};
use backoffice_scraper::infrastructure::config::{SiteConfig, TokenConfig};
use backoffice_scraper::infrastructure::database_connection::DatabaseConnection;
use backoffice_scraper::infrastructure::http_client::{FetchCause, FetchError, PageFetcher};
use backoffice_scraper::infrastructure::rate_limit::SharedRateLimiter;
use backoffice_scraper::infrastructure::token_manager::{ProbeTarget, TokenError, TokenManager, TokenSource};
use backoffice_scraper::infrastructure::token_repository::SqliteTokenRepository;

const HOME_PAGE: &str = r#"<html><body><main id="dashboard">Today</main></body></html>"#;
const LOGIN_PAGE: &str = r#"<html><body><form id="login-form"></form></body></html>"#;
const MAINTENANCE_PAGE: &str = "<html><body>Back soon</body></html>";

/// Home page as seen by each token
#[derive(Default)]
struct HomePage {
    views: Mutex<HashMap<String, &'static str>>,
    probes: Mutex<Vec<String>>,
}

impl HomePage {
    fn show(&self, token: &str, body: &'static str) {
        self.views.lock().unwrap().insert(token.to_string(), body);
    }

    fn probe_count(&self, token: &str) -> usize {
        self.probes.lock().unwrap().iter().filter(|t| *t == token).count()
    }
}

#[async_trait]
impl PageFetcher for HomePage {
    async fn fetch(&self, url: &str, token: &str, _cancel: &CancellationToken) -> Result<String, FetchError> {
        self.probes.lock().unwrap().push(token.to_string());
        self.views
            .lock()
            .unwrap()
            .get(token)
            .map(|body| body.to_string())
            .ok_or_else(|| FetchError::new(url, FetchCause::Status(500)))
    }
}

struct Fixture {
    _dir: TempDir,
    repo: Arc<SqliteTokenRepository>,
    site: Arc<HomePage>,
}

impl Fixture {
    async fn new(tokens: &[&str]) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite:{}", dir.path().join("tokens.db").display());
        let db = DatabaseConnection::new(&url).await?;
        db.migrate().await?;

        let repo = Arc::new(SqliteTokenRepository::new(db.pool().clone()));
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        repo.insert_tokens(&tokens).await?;

        Ok(Self {
            _dir: dir,
            repo,
            site: Arc::new(HomePage::default()),
        })
    }

    async fn manager(&self) -> Result<Arc<TokenManager>, TokenError> {
        TokenManager::new(
            self.repo.clone(),
            self.site.clone(),
            Arc::new(SharedRateLimiter::per_second(NonZeroU32::new(100).unwrap())),
            ProbeTarget::from_site(&SiteConfig::default()).unwrap(),
            TokenConfig::default(),
        )
        .await
    }

    async fn state(&self, token: &str) -> Option<TokenState> {
        self.repo
            .list_tokens()
            .await
            .unwrap()
            .into_iter()
            .find(|record| record.token == token)
            .map(|record| record.state)
    }
}

#[tokio::test]
async fn probes_move_tokens_through_their_states() -> Result<()> {
    let fixture = Fixture::new(&["alpha", "bravo"]).await?;
    assert_eq!(fixture.state("alpha").await, Some(TokenState::Unchecked));

    fixture.site.show("alpha", HOME_PAGE);
    fixture.site.show("bravo", HOME_PAGE);
    let manager = fixture.manager().await?;
    assert_eq!(fixture.state("alpha").await, Some(TokenState::Active));
    assert_eq!(fixture.state("bravo").await, Some(TokenState::Active));
    assert_eq!(manager.active_count().await, 2);

    // session of bravo ends
    fixture.site.show("bravo", LOGIN_PAGE);
    manager.refresh_tokens(&CancellationToken::new()).await?;
    assert_eq!(fixture.state("bravo").await, Some(TokenState::Expired));
    assert_eq!(manager.active_token().await?, "alpha");

    // even if bravo would pass again, it is never probed or reactivated
    fixture.site.show("bravo", HOME_PAGE);
    manager.refresh_tokens(&CancellationToken::new()).await?;
    assert_eq!(fixture.state("bravo").await, Some(TokenState::Expired));
    assert_eq!(fixture.site.probe_count("bravo"), 2);
    assert_eq!(fixture.repo.non_expired_tokens().await?, vec!["alpha".to_string()]);
    Ok(())
}

#[tokio::test]
async fn reinserting_expired_token_lets_it_back_in() -> Result<()> {
    let fixture = Fixture::new(&["alpha", "bravo"]).await?;
    fixture.site.show("alpha", HOME_PAGE);
    fixture.site.show("bravo", LOGIN_PAGE);
    let manager = fixture.manager().await?;
    assert_eq!(fixture.state("bravo").await, Some(TokenState::Expired));

    // operator logs in again out of band and re-adds the token
    fixture.repo.insert_tokens(&["bravo".to_string()]).await?;
    assert_eq!(fixture.state("bravo").await, Some(TokenState::Unchecked));

    fixture.site.show("bravo", HOME_PAGE);
    let summary = manager.refresh_tokens(&CancellationToken::new()).await?;
    assert_eq!(summary.active, 2);
    assert_eq!(fixture.state("bravo").await, Some(TokenState::Active));
    Ok(())
}

#[tokio::test]
async fn ambiguous_probe_leaves_store_untouched() -> Result<()> {
    let fixture = Fixture::new(&["alpha", "bravo"]).await?;
    fixture.site.show("alpha", HOME_PAGE);
    fixture.site.show("bravo", HOME_PAGE);
    let manager = fixture.manager().await?;

    fixture.site.show("alpha", LOGIN_PAGE);
    fixture.site.show("bravo", MAINTENANCE_PAGE);
    let error = manager.refresh_tokens(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(error, TokenError::Classification { .. }));
    assert_eq!(fixture.state("alpha").await, Some(TokenState::Active));
    assert_eq!(manager.active_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn manager_refuses_to_start_without_active_tokens() -> Result<()> {
    let fixture = Fixture::new(&["alpha"]).await?;
    fixture.site.show("alpha", LOGIN_PAGE);

    let result = fixture.manager().await;

    assert!(matches!(result, Err(TokenError::NoActiveTokens)));
    assert_eq!(fixture.state("alpha").await, Some(TokenState::Expired));
    Ok(())
}

#[tokio::test]
async fn late_success_cannot_overwrite_expiry() -> Result<()> {
    let fixture = Fixture::new(&["alpha"]).await?;
    fixture
        .repo
        .upsert_token_states(&[TokenRecord::new("alpha", TokenState::Expired)])
        .await?;
    fixture
        .repo
        .upsert_token_states(&[TokenRecord::new("alpha", TokenState::Active)])
        .await?;

    assert_eq!(fixture.state("alpha").await, Some(TokenState::Expired));
    Ok(())
}
