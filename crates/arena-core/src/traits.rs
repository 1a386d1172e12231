use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArenaError;
use crate::types::{AnalystRatings, Bar, EarningsReport, Fundamentals, NewsItem, SentimentSnapshot};

/// Last-trade snapshot from the market data upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub volume: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Raw entry from a news feed before symbol matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub headline: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Time source. Injected so market-hours gating is deterministic under
/// test; production wires `SystemClock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Quote/history upstream consumed by the market data provider.
#[async_trait]
pub trait MarketDataUpstream: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, ArenaError>;

    async fn history(&self, symbol: &str, days: u32) -> Result<Option<Vec<Bar>>, ArenaError>;
}

/// Feed source consumed by the news monitor.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<Vec<FeedEntry>>, ArenaError>;
}

/// Analyst price target band.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTarget {
    pub mean: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

/// Capability set of a structured data upstream.
///
/// Implementations provide any subset; the defaults report absence so the
/// aggregator can compose partial providers without downcasting. Every
/// method enforces the upstream's own rate discipline and returns
/// `Ok(None)` when the budget is exhausted.
#[async_trait]
pub trait StructuredUpstream: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fundamentals(&self, _symbol: &str) -> Result<Option<Fundamentals>, ArenaError> {
        Ok(None)
    }

    async fn earnings(&self, _symbol: &str) -> Result<Option<EarningsReport>, ArenaError> {
        Ok(None)
    }

    async fn indicator(
        &self,
        _symbol: &str,
        _name: &str,
        _period: u32,
    ) -> Result<Option<f64>, ArenaError> {
        Ok(None)
    }

    async fn news(&self, _symbol: &str, _days: u32) -> Result<Option<Vec<NewsItem>>, ArenaError> {
        Ok(None)
    }

    async fn sentiment(&self, _symbol: &str) -> Result<Option<SentimentSnapshot>, ArenaError> {
        Ok(None)
    }

    async fn recommendation(&self, _symbol: &str) -> Result<Option<AnalystRatings>, ArenaError> {
        Ok(None)
    }

    async fn price_target(&self, _symbol: &str) -> Result<Option<PriceTarget>, ArenaError> {
        Ok(None)
    }
}
