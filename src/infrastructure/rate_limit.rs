//! Process-wide request rate limiting
//!
//! One limiter is created at startup and shared by every crawl worker and
//! the token refresher, so the aggregate request rate against the site stays
//! capped no matter how many workers or jobs run at once.

use std::num::NonZeroU32;

use anyhow::{Context, Result};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::RateLimitConfig;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

pub struct SharedRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    requests_per_second: u32,
}

impl SharedRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        let per_second = NonZeroU32::new(config.max_requests_per_second)
            .context("Rate limit must be greater than 0")?;
        let burst = NonZeroU32::new(config.burst).context("Burst size must be greater than 0")?;
        Ok(Self::with_quota(per_second, burst))
    }

    pub fn per_second(requests: NonZeroU32) -> Self {
        Self::with_quota(requests, requests)
    }

    fn with_quota(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: RateLimiter::direct(quota),
            requests_per_second: per_second.get(),
        }
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    /// Wait for a request slot, giving up as soon as `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            () = self.limiter.until_ready() => Ok(()),
            () = cancel.cancelled() => Err(Cancelled),
        }
    }
}
