//! USD exchange-rate oracle with a short-lived cache.
//!
//! Conversions must not run on stale prices: entries older than the TTL are
//! re-fetched, and a failed fetch rejects the operation instead of falling
//! back to the stale value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use shared::constants::RATE_CACHE_TTL_SECS;
use shared::Asset;

use crate::cryptopay::PayProvider;
use crate::errors::{AppError, Result};

#[derive(Clone, Copy)]
struct CachedRate {
    rate: f64,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct RateOracle {
    provider: Arc<dyn PayProvider>,
    cache: Arc<RwLock<HashMap<Asset, CachedRate>>>,
    ttl: Duration,
}

impl RateOracle {
    pub fn new(provider: Arc<dyn PayProvider>) -> Self {
        Self {
            provider,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(RATE_CACHE_TTL_SECS),
        }
    }

    /// Current USD price of one unit of `asset`.
    pub async fn usd_rate(&self, asset: Asset) -> Result<f64> {
        if let Some(cached) = self.cache.read().await.get(&asset) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.rate);
            }
        }
        self.refresh().await?;

        self.cache
            .read()
            .await
            .get(&asset)
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.rate)
            .ok_or(AppError::RateUnavailable)
    }

    async fn refresh(&self) -> Result<()> {
        let rates = self.provider.get_rates().await.map_err(|e| {
            tracing::warn!(error = %e, "Exchange rate fetch failed");
            metrics::counter!("rate_fetch_failures_total").increment(1);
            AppError::RateUnavailable
        })?;

        let now = Instant::now();
        let mut cache = self.cache.write().await;
        for rate in rates {
            let Ok(asset) = rate.source.parse::<Asset>() else {
                continue;
            };
            if rate.rate.is_finite() && rate.rate > 0.0 {
                cache.insert(
                    asset,
                    CachedRate {
                        rate: rate.rate,
                        fetched_at: now,
                    },
                );
            }
        }
        Ok(())
    }
}
