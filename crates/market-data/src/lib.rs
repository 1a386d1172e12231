use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::sync::Arc;

use arena_core::{ArenaConfig, ArenaError, Bar, MarketDataUpstream, Symbol};

pub mod calendar;
pub mod upstream;

pub use calendar::MarketCalendar;
pub use upstream::HttpMarketData;

const BARS_TTL_SECS: i64 = 300;

struct CachedPrice {
    price: f64,
    fetched_at: DateTime<Utc>,
}

struct CachedBars {
    bars: Vec<Bar>,
    fetched_at: DateTime<Utc>,
}

/// Symbol-validating gateway to the market data upstream.
///
/// Last prices are cached for five minutes, in memory and best-effort in
/// the store's `price_cache` table so a restart does not hammer the
/// upstream. Upstream failure is reported as absence, never as an error.
pub struct MarketDataProvider {
    upstream: Arc<dyn MarketDataUpstream>,
    calendar: MarketCalendar,
    pool: Option<SqlitePool>,
    price_ttl_secs: i64,
    prices: DashMap<String, CachedPrice>,
    bars: DashMap<String, CachedBars>,
}

impl MarketDataProvider {
    pub fn new(
        upstream: Arc<dyn MarketDataUpstream>,
        config: &ArenaConfig,
    ) -> Result<Self, ArenaError> {
        Ok(Self {
            upstream,
            calendar: MarketCalendar::from_config(config)?,
            pool: None,
            price_ttl_secs: config.price_cache_ttl_secs,
            prices: DashMap::new(),
            bars: DashMap::new(),
        })
    }

    /// Attach the persistent store so cached prices survive restarts.
    pub fn with_pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    pub fn validate_symbol(&self, raw: &str) -> Result<Symbol, ArenaError> {
        Symbol::parse(raw)
    }

    pub fn is_trading_day(&self, instant: DateTime<Utc>) -> bool {
        self.calendar.is_trading_day(instant)
    }

    pub fn is_market_open(&self, instant: DateTime<Utc>) -> bool {
        self.calendar.is_market_open(instant)
    }

    /// Last price for a universe symbol, or absence when the upstream has
    /// nothing fresh and no cached value exists.
    pub async fn current_price(&self, symbol: &Symbol) -> Result<Option<f64>, ArenaError> {
        let key = symbol.as_str().to_string();
        let now = Utc::now();

        if let Some(entry) = self.prices.get(&key) {
            if (now - entry.fetched_at).num_seconds() < self.price_ttl_secs {
                return Ok(Some(entry.price));
            }
        }

        if let Some(price) = self.load_persisted_price(&key, now).await {
            self.prices.insert(
                key,
                CachedPrice {
                    price,
                    fetched_at: now,
                },
            );
            return Ok(Some(price));
        }

        match self.upstream.quote(symbol.as_str()).await {
            Ok(Some(quote)) => {
                self.prices.insert(
                    key.clone(),
                    CachedPrice {
                        price: quote.price,
                        fetched_at: now,
                    },
                );
                self.persist_price(&key, quote.price, now).await;
                Ok(Some(quote.price))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "quote upstream failed");
                // A stale cached price beats nothing for valuation purposes
                Ok(self.prices.get(&key).map(|entry| entry.price))
            }
        }
    }

    /// Daily OHLCV window, cached briefly per (symbol, days).
    pub async fn history(&self, symbol: &Symbol, days: u32) -> Result<Option<Vec<Bar>>, ArenaError> {
        let key = format!("{}:{}", symbol, days);
        if let Some(entry) = self.bars.get(&key) {
            if (Utc::now() - entry.fetched_at).num_seconds() < BARS_TTL_SECS {
                return Ok(Some(entry.bars.clone()));
            }
        }

        match self.upstream.history(symbol.as_str(), days).await {
            Ok(Some(bars)) => {
                self.bars.insert(
                    key,
                    CachedBars {
                        bars: bars.clone(),
                        fetched_at: Utc::now(),
                    },
                );
                Ok(Some(bars))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "history upstream failed");
                Ok(None)
            }
        }
    }

    async fn load_persisted_price(&self, symbol: &str, now: DateTime<Utc>) -> Option<f64> {
        let pool = self.pool.as_ref()?;
        let row: Option<(f64, String)> =
            sqlx::query_as("SELECT price, fetched_at FROM price_cache WHERE symbol = ?")
                .bind(symbol)
                .fetch_optional(pool)
                .await
                .ok()
                .flatten();
        let (price, fetched_at) = row?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at).ok()?.with_timezone(&Utc);
        ((now - fetched_at).num_seconds() < self.price_ttl_secs).then_some(price)
    }

    async fn persist_price(&self, symbol: &str, price: f64, now: DateTime<Utc>) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let result = sqlx::query(
            "INSERT INTO price_cache (symbol, price, fetched_at) VALUES (?, ?, ?)
             ON CONFLICT(symbol) DO UPDATE SET price = excluded.price, fetched_at = excluded.fetched_at",
        )
        .bind(symbol)
        .bind(price)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await;
        if let Err(e) = result {
            tracing::debug!(symbol, error = %e, "price cache persist failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUpstream {
        calls: AtomicUsize,
        price: f64,
    }

    #[async_trait]
    impl MarketDataUpstream for CountingUpstream {
        async fn quote(&self, _symbol: &str) -> Result<Option<arena_core::Quote>, ArenaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(arena_core::Quote {
                price: self.price,
                volume: None,
                high: None,
                low: None,
                bid: None,
                ask: None,
                timestamp: Utc::now(),
            }))
        }

        async fn history(&self, symbol: &str, days: u32) -> Result<Option<Vec<Bar>>, ArenaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bars = (0..days)
                .map(|i| Bar {
                    symbol: symbol.to_string(),
                    timestamp: Utc::now() - chrono::Duration::days((days - i) as i64),
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0,
                    volume: 1_000.0,
                })
                .collect();
            Ok(Some(bars))
        }
    }

    struct FailingUpstream;

    #[async_trait]
    impl MarketDataUpstream for FailingUpstream {
        async fn quote(&self, _symbol: &str) -> Result<Option<arena_core::Quote>, ArenaError> {
            Err(ArenaError::Upstream("boom".into()))
        }

        async fn history(&self, _symbol: &str, _days: u32) -> Result<Option<Vec<Bar>>, ArenaError> {
            Err(ArenaError::Upstream("boom".into()))
        }
    }

    fn provider(upstream: Arc<dyn MarketDataUpstream>) -> MarketDataProvider {
        MarketDataProvider::new(upstream, &ArenaConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn price_is_cached_across_calls() {
        let upstream = Arc::new(CountingUpstream {
            calls: AtomicUsize::new(0),
            price: 120.5,
        });
        let provider = provider(upstream.clone());
        let symbol = Symbol::parse("SAP.DE").unwrap();

        assert_eq!(provider.current_price(&symbol).await.unwrap(), Some(120.5));
        assert_eq!(provider.current_price(&symbol).await.unwrap(), Some(120.5));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_failure_becomes_absence() {
        let provider = provider(Arc::new(FailingUpstream));
        let symbol = Symbol::parse("BMW.DE").unwrap();
        assert_eq!(provider.current_price(&symbol).await.unwrap(), None);
        assert_eq!(provider.history(&symbol, 90).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_foreign_symbols() {
        let provider = provider(Arc::new(FailingUpstream));
        assert!(provider.validate_symbol("AAPL").is_err());
        assert!(provider.validate_symbol("SAP.DE").is_ok());
    }
}
