//! Session token lifecycle
//!
//! The manager owns the in-memory active set: the tokens classified `Active`
//! by the most recent successful refresh. Readers take a snapshot of the set
//! under a read lock; a refresh builds the next set off to the side and
//! replaces the whole `Arc` under the write lock, so a reader sees either the
//! old membership or the new one, never a mix.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::repositories::TokenRepository;
use crate::domain::token::{TokenRecord, TokenState, mask_token};
use crate::infrastructure::config::{AmbiguousProbePolicy, SiteConfig, TokenConfig};
use crate::infrastructure::http_client::{FetchCause, FetchError, PageFetcher};
use crate::infrastructure::rate_limit::SharedRateLimiter;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("no active session tokens")]
    NoActiveTokens,

    #[error("probe of token {token} matched neither the home nor the login page")]
    Classification { token: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("token store error: {0}")]
    Store(String),

    #[error("token refresh did not finish within {0:?}")]
    Timeout(Duration),

    #[error("token refresh cancelled")]
    Cancelled,
}

impl TokenError {
    fn store(error: anyhow::Error) -> Self {
        TokenError::Store(format!("{error:#}"))
    }
}

/// Hands out credentials to whoever needs to fetch a page
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn active_token(&self) -> Result<String, TokenError>;
}

/// Page fetched to test a token and the markers that classify the response
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub url: String,
    pub home_marker: String,
    pub login_marker: String,
}

impl ProbeTarget {
    pub fn from_site(site: &SiteConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&site.base_url)?;
        let url = base.join(&site.home_path)?;
        Ok(Self {
            url: url.to_string(),
            home_marker: site.home_marker.clone(),
            login_marker: site.login_marker.clone(),
        })
    }

    /// Login marker wins when both are present
    pub fn classify(&self, body: &str) -> Option<TokenState> {
        if body.contains(&self.login_marker) {
            Some(TokenState::Expired)
        } else if body.contains(&self.home_marker) {
            Some(TokenState::Active)
        } else {
            None
        }
    }
}

/// Outcome of one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub probed: usize,
    pub active: usize,
    pub expired: usize,
    /// Tokens left out under [`AmbiguousProbePolicy::SkipToken`]
    pub skipped: usize,
}

pub struct TokenManager {
    repository: Arc<dyn TokenRepository>,
    fetcher: Arc<dyn PageFetcher>,
    limiter: Arc<SharedRateLimiter>,
    probe: ProbeTarget,
    config: TokenConfig,
    active: RwLock<Arc<Vec<String>>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    /// Build the manager and run the first refresh.
    ///
    /// Fails when that refresh fails or leaves no active token.
    pub async fn new(
        repository: Arc<dyn TokenRepository>,
        fetcher: Arc<dyn PageFetcher>,
        limiter: Arc<SharedRateLimiter>,
        probe: ProbeTarget,
        config: TokenConfig,
    ) -> Result<Arc<Self>, TokenError> {
        let manager = Arc::new(Self {
            repository,
            fetcher,
            limiter,
            probe,
            config,
            active: RwLock::new(Arc::new(Vec::new())),
            refresh_lock: Mutex::new(()),
        });

        let summary = manager.refresh_tokens(&CancellationToken::new()).await?;
        if summary.active == 0 {
            return Err(TokenError::NoActiveTokens);
        }

        Ok(manager)
    }

    /// Snapshot of the current active set
    pub async fn active_tokens(&self) -> Arc<Vec<String>> {
        Arc::clone(&*self.active.read().await)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Probe every non-expired token and replace the active set.
    ///
    /// Refreshes on one manager never overlap; a second caller waits for the
    /// running one. On any error nothing is persisted and the previous
    /// active set stays in place.
    pub async fn refresh_tokens(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, TokenError> {
        let _serialized = self.refresh_lock.lock().await;

        let budget = self.config.refresh_timeout();
        let cancel = cancel.child_token();
        // stops in-flight limiter waits when the budget runs out
        let _stop_probes = cancel.clone().drop_guard();

        match time::timeout(budget, self.run_refresh(&cancel)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Token refresh exceeded its {:?} budget", budget);
                Err(TokenError::Timeout(budget))
            }
        }
    }

    async fn run_refresh(&self, cancel: &CancellationToken) -> Result<RefreshSummary, TokenError> {
        let tokens = self
            .repository
            .non_expired_tokens()
            .await
            .map_err(TokenError::store)?;

        debug!("Probing {} session tokens", tokens.len());

        let outcomes = join_all(tokens.iter().map(|token| self.probe_token(token, cancel))).await;

        let mut summary = RefreshSummary {
            probed: tokens.len(),
            ..RefreshSummary::default()
        };
        let mut records = Vec::with_capacity(tokens.len());

        for (token, outcome) in tokens.iter().zip(outcomes) {
            match outcome {
                Ok(state) => {
                    match state {
                        TokenState::Active => summary.active += 1,
                        TokenState::Expired => summary.expired += 1,
                        TokenState::Unchecked => {}
                    }
                    records.push(TokenRecord::new(token.clone(), TokenState::Unchecked.transition(state)));
                }
                Err(TokenError::Cancelled) => return Err(TokenError::Cancelled),
                Err(error) => match self.config.ambiguous_probe_policy {
                    AmbiguousProbePolicy::AbortBatch => {
                        warn!("Token refresh aborted: {}", error);
                        return Err(error);
                    }
                    AmbiguousProbePolicy::SkipToken => {
                        warn!("Skipping token {} this cycle: {}", mask_token(token), error);
                        summary.skipped += 1;
                    }
                },
            }
        }

        self.repository
            .upsert_token_states(&records)
            .await
            .map_err(TokenError::store)?;

        let active: Vec<String> = records
            .into_iter()
            .filter(|record| record.state == TokenState::Active)
            .map(|record| record.token)
            .collect();
        *self.active.write().await = Arc::new(active);

        info!(
            "Token refresh complete: probed={}, active={}, expired={}, skipped={}",
            summary.probed, summary.active, summary.expired, summary.skipped
        );
        Ok(summary)
    }

    async fn probe_token(&self, token: &str, cancel: &CancellationToken) -> Result<TokenState, TokenError> {
        self.limiter
            .acquire(cancel)
            .await
            .map_err(|_| TokenError::Cancelled)?;

        let body = self
            .fetcher
            .fetch(&self.probe.url, token, cancel)
            .await
            .map_err(|error| match error.cause {
                FetchCause::Cancelled => TokenError::Cancelled,
                _ => TokenError::Fetch(error),
            })?;

        let state = self.probe.classify(&body).ok_or_else(|| TokenError::Classification {
            token: mask_token(token),
        })?;

        debug!("Token {} is {}", mask_token(token), state);
        Ok(state)
    }

    /// Refresh on the configured interval until the returned handle is stopped
    pub fn spawn_refresh_cycle(self: &Arc<Self>) -> RefreshCycle {
        let manager = Arc::clone(self);
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let period = self.config.refresh_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = stop.cancelled() => {
                        debug!("Token refresh cycle shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.refresh_tokens(&stop).await {
                            warn!("Scheduled token refresh failed: {}", e);
                        }
                    }
                }
            }
        });

        info!("Token refresh cycle started, every {:?}", period);
        RefreshCycle { cancel, handle }
    }
}

#[async_trait]
impl TokenSource for TokenManager {
    /// Uniformly random member of the active set
    async fn active_token(&self) -> Result<String, TokenError> {
        let tokens = self.active_tokens().await;
        if tokens.is_empty() {
            return Err(TokenError::NoActiveTokens);
        }
        Ok(tokens[fastrand::usize(..tokens.len())].clone())
    }
}

/// Handle of a running background refresh cycle
pub struct RefreshCycle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshCycle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the cycle and wait for an in-flight refresh to wind down
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Token refresh cycle ended abnormally: {}", e);
        }
    }
}
