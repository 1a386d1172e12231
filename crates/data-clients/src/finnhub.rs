use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::time::Duration;

use arena_core::{
    AnalystRatings, ArenaError, EarningsReport, NewsItem, PriceTarget, SentimentSnapshot,
    StructuredUpstream,
};

use crate::rate_limit::CallBudget;

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// Finnhub structured upstream: company news, sentiment, analyst
/// recommendations, price targets, earnings surprises. 60 calls/minute
/// on the free tier, enforced fail-fast.
pub struct FinnhubClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    budget: CallBudget,
}

impl FinnhubClient {
    pub fn new(api_key: String, per_minute: usize, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            budget: CallBudget::per_minute(per_minute),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Option<Value>, ArenaError> {
        if !self.budget.try_acquire() {
            tracing::debug!(path, "finnhub budget exhausted, skipping call");
            return Ok(None);
        }

        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("token", self.api_key.as_str()));

        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .query(&query)
            .send()
            .await
            .map_err(|e| ArenaError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            tracing::warn!(path, "finnhub throttled the call");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ArenaError::Upstream(format!("finnhub HTTP {status} on {path}")));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ArenaError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl StructuredUpstream for FinnhubClient {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    async fn news(&self, symbol: &str, days: u32) -> Result<Option<Vec<NewsItem>>, ArenaError> {
        let to = Utc::now().date_naive();
        let from = to - ChronoDuration::days(days as i64);
        let json = match self
            .get(
                "company-news",
                &[
                    ("symbol", symbol),
                    ("from", &from.format("%Y-%m-%d").to_string()),
                    ("to", &to.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?
        {
            Some(json) => json,
            None => return Ok(None),
        };

        let articles = match json.as_array() {
            Some(arr) => arr,
            None => return Ok(None),
        };

        let items: Vec<NewsItem> = articles
            .iter()
            .filter_map(|a| {
                let headline = a.get("headline")?.as_str()?.to_string();
                let published_at = a
                    .get("datetime")
                    .and_then(|v| v.as_i64())
                    .and_then(|t| DateTime::from_timestamp(t, 0))?;
                Some(NewsItem {
                    symbols: vec![symbol.to_string()],
                    headline,
                    source: a
                        .get("source")
                        .and_then(|v| v.as_str())
                        .unwrap_or("finnhub")
                        .to_string(),
                    url: a.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    published_at,
                    sentiment_label: None,
                })
            })
            .collect();

        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(items))
    }

    async fn sentiment(&self, symbol: &str) -> Result<Option<SentimentSnapshot>, ArenaError> {
        let json = match self.get("news-sentiment", &[("symbol", symbol)]).await? {
            Some(json) => json,
            None => return Ok(None),
        };

        let sentiment = json.get("sentiment");
        let bullish = sentiment
            .and_then(|s| s.get("bullishPercent"))
            .and_then(|v| v.as_f64());
        let bearish = sentiment
            .and_then(|s| s.get("bearishPercent"))
            .and_then(|v| v.as_f64());
        if bullish.is_none() && bearish.is_none() {
            return Ok(None);
        }

        Ok(Some(SentimentSnapshot {
            bullish_percentage: bullish.map(|v| v * 100.0),
            bearish_percentage: bearish.map(|v| v * 100.0),
            articles_analyzed: json
                .get("buzz")
                .and_then(|b| b.get("articlesInLastWeek"))
                .and_then(|v| v.as_i64())
                .map(|v| v as i32),
        }))
    }

    async fn recommendation(&self, symbol: &str) -> Result<Option<AnalystRatings>, ArenaError> {
        let json = match self.get("stock/recommendation", &[("symbol", symbol)]).await? {
            Some(json) => json,
            None => return Ok(None),
        };

        // Most recent month first
        let latest = match json.as_array().and_then(|arr| arr.first()) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let count = |key: &str| latest.get(key).and_then(|v| v.as_i64()).map(|v| v as i32);
        let buy = count("buy").map(|b| b + count("strongBuy").unwrap_or(0));
        let sell = count("sell").map(|s| s + count("strongSell").unwrap_or(0));

        Ok(Some(AnalystRatings {
            buy_count: buy,
            hold_count: count("hold"),
            sell_count: sell,
            consensus: None,
            target_mean: None,
            target_high: None,
            target_low: None,
        }))
    }

    async fn price_target(&self, symbol: &str) -> Result<Option<PriceTarget>, ArenaError> {
        let json = match self.get("stock/price-target", &[("symbol", symbol)]).await? {
            Some(json) => json,
            None => return Ok(None),
        };

        let target = PriceTarget {
            mean: json.get("targetMean").and_then(|v| v.as_f64()),
            high: json.get("targetHigh").and_then(|v| v.as_f64()),
            low: json.get("targetLow").and_then(|v| v.as_f64()),
        };
        if target.mean.is_none() && target.high.is_none() && target.low.is_none() {
            return Ok(None);
        }
        Ok(Some(target))
    }

    async fn earnings(&self, symbol: &str) -> Result<Option<EarningsReport>, ArenaError> {
        let json = match self.get("stock/earnings", &[("symbol", symbol)]).await? {
            Some(json) => json,
            None => return Ok(None),
        };

        let latest = match json.as_array().and_then(|arr| arr.first()) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        Ok(Some(EarningsReport {
            fiscal_period: latest.get("period").and_then(|v| v.as_str()).map(str::to_string),
            report_date: None,
            eps_actual: latest.get("actual").and_then(|v| v.as_f64()),
            eps_estimate: latest.get("estimate").and_then(|v| v.as_f64()),
            surprise_percentage: latest.get("surprisePercent").and_then(|v| v.as_f64()),
            revenue: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausted_budget_returns_absence_without_io() {
        let client = FinnhubClient::new("key".into(), 0, Duration::from_secs(1))
            .with_base_url("http://127.0.0.1:1".into());
        assert!(client.sentiment("SAP.DE").await.unwrap().is_none());
        assert!(client.news("SAP.DE", 7).await.unwrap().is_none());
    }
}
