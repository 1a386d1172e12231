use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use arena_core::{ArenaError, Bar, MarketDataUpstream, Quote};

/// Chart-API market data upstream (Yahoo-compatible endpoint).
///
/// Symbols carry the `.DE` suffix the endpoint expects, so they pass
/// through unchanged.
#[derive(Clone)]
pub struct HttpMarketData {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMarketData {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url, client }
    }

    async fn chart(&self, symbol: &str, range_days: u32) -> Result<serde_json::Value, ArenaError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}d&interval=1d",
            self.base_url, symbol, range_days
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArenaError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ArenaError::Upstream(format!(
                "chart HTTP {} for {}",
                response.status(),
                symbol
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ArenaError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl MarketDataUpstream for HttpMarketData {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, ArenaError> {
        let json = self.chart(symbol, 1).await?;
        let meta = match json
            .get("chart")
            .and_then(|v| v.get("result"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|r| r.get("meta"))
        {
            Some(meta) => meta,
            None => return Ok(None),
        };

        let price = match meta.get("regularMarketPrice").and_then(|v| v.as_f64()) {
            Some(p) if p > 0.0 => p,
            _ => return Ok(None),
        };

        Ok(Some(Quote {
            price,
            volume: meta.get("regularMarketVolume").and_then(|v| v.as_f64()),
            high: meta.get("regularMarketDayHigh").and_then(|v| v.as_f64()),
            low: meta.get("regularMarketDayLow").and_then(|v| v.as_f64()),
            bid: meta.get("bid").and_then(|v| v.as_f64()),
            ask: meta.get("ask").and_then(|v| v.as_f64()),
            timestamp: Utc::now(),
        }))
    }

    async fn history(&self, symbol: &str, days: u32) -> Result<Option<Vec<Bar>>, ArenaError> {
        let json = self.chart(symbol, days).await?;
        let result = match json
            .get("chart")
            .and_then(|v| v.get("result"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        {
            Some(r) => r,
            None => return Ok(None),
        };

        let timestamps = match result.get("timestamp").and_then(|v| v.as_array()) {
            Some(ts) => ts,
            None => return Ok(None),
        };
        let quote = match result
            .get("indicators")
            .and_then(|v| v.get("quote"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        {
            Some(q) => q,
            None => return Ok(None),
        };

        let series = |key: &str| -> Vec<Option<f64>> {
            quote
                .get(key)
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().map(|v| v.as_f64()).collect())
                .unwrap_or_default()
        };
        let opens = series("open");
        let highs = series("high");
        let lows = series("low");
        let closes = series("close");
        let volumes = series("volume");

        let mut bars = Vec::with_capacity(timestamps.len());
        for i in 0..timestamps.len() {
            let ts = timestamps[i].as_i64().and_then(|t| DateTime::from_timestamp(t, 0));
            let fields = (
                ts,
                opens.get(i).copied().flatten(),
                highs.get(i).copied().flatten(),
                lows.get(i).copied().flatten(),
                closes.get(i).copied().flatten(),
            );
            // Null entries mark non-trading intervals; skip the whole row
            if let (Some(ts), Some(open), Some(high), Some(low), Some(close)) = fields {
                bars.push(Bar {
                    symbol: symbol.to_string(),
                    timestamp: ts,
                    open,
                    high,
                    low,
                    close,
                    volume: volumes.get(i).copied().flatten().unwrap_or(0.0),
                });
            }
        }

        if bars.is_empty() {
            return Ok(None);
        }
        Ok(Some(bars))
    }
}
