use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use arena_core::{ArenaError, EarningsReport, Fundamentals, StructuredUpstream};

use crate::rate_limit::CallBudget;

const BASE_URL: &str = "https://www.alphavantage.co/query";

/// Alpha Vantage structured upstream: fundamentals, earnings, single
/// indicator values. Free tier is tightly limited (default 5/min and
/// 25/day), so every call goes through the fail-fast budget first.
pub struct AlphaVantageClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    budget: CallBudget,
}

impl AlphaVantageClient {
    pub fn new(api_key: String, per_minute: usize, per_day: usize, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            budget: CallBudget::per_minute_and_day(per_minute, per_day),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// One budgeted query. `Ok(None)` when the budget is exhausted or the
    /// upstream signalled its own throttle note.
    async fn query(&self, params: &[(&str, &str)]) -> Result<Option<Value>, ArenaError> {
        if !self.budget.try_acquire() {
            tracing::debug!("alpha vantage budget exhausted, skipping call");
            return Ok(None);
        }

        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("apikey", self.api_key.as_str()));

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| ArenaError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ArenaError::Upstream(format!(
                "alpha vantage HTTP {}",
                response.status()
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ArenaError::Upstream(e.to_string()))?;

        if json.get("Error Message").is_some() {
            return Ok(None);
        }
        if json.get("Note").is_some() || json.get("Information").is_some() {
            tracing::warn!("alpha vantage throttle note received");
            return Ok(None);
        }

        Ok(Some(json))
    }
}

/// Alpha Vantage encodes numbers as strings, with "None" and "-" for gaps.
fn num_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::String(s) if s != "None" && s != "-" => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[async_trait]
impl StructuredUpstream for AlphaVantageClient {
    fn name(&self) -> &'static str {
        "alpha_vantage"
    }

    async fn fundamentals(&self, symbol: &str) -> Result<Option<Fundamentals>, ArenaError> {
        let json = match self
            .query(&[("function", "OVERVIEW"), ("symbol", symbol)])
            .await?
        {
            Some(json) => json,
            None => return Ok(None),
        };

        if json.get("Symbol").is_none() {
            return Ok(None);
        }

        Ok(Some(Fundamentals {
            pe_ratio: num_field(&json, "PERatio"),
            pb_ratio: num_field(&json, "PriceToBookRatio"),
            profit_margin: num_field(&json, "ProfitMargin"),
            operating_margin: num_field(&json, "OperatingMarginTTM"),
            return_on_equity: num_field(&json, "ReturnOnEquityTTM"),
            dividend_yield: num_field(&json, "DividendYield"),
            eps: num_field(&json, "EPS"),
            market_cap: num_field(&json, "MarketCapitalization"),
            beta: num_field(&json, "Beta"),
        }))
    }

    async fn earnings(&self, symbol: &str) -> Result<Option<EarningsReport>, ArenaError> {
        let json = match self
            .query(&[("function", "EARNINGS"), ("symbol", symbol)])
            .await?
        {
            Some(json) => json,
            None => return Ok(None),
        };

        let latest = match json
            .get("quarterlyEarnings")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        {
            Some(q) => q,
            None => return Ok(None),
        };

        Ok(Some(EarningsReport {
            fiscal_period: latest
                .get("fiscalDateEnding")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            report_date: latest
                .get("reportedDate")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            eps_actual: num_field(latest, "reportedEPS"),
            eps_estimate: num_field(latest, "estimatedEPS"),
            surprise_percentage: num_field(latest, "surprisePercentage"),
            revenue: None,
        }))
    }

    async fn indicator(
        &self,
        symbol: &str,
        name: &str,
        period: u32,
    ) -> Result<Option<f64>, ArenaError> {
        let function = name.to_uppercase();
        let period_str = period.to_string();
        let json = match self
            .query(&[
                ("function", function.as_str()),
                ("symbol", symbol),
                ("interval", "daily"),
                ("time_period", period_str.as_str()),
                ("series_type", "close"),
            ])
            .await?
        {
            Some(json) => json,
            None => return Ok(None),
        };

        let section = format!("Technical Analysis: {function}");
        let series = match json.get(&section).and_then(|v| v.as_object()) {
            Some(obj) => obj,
            None => return Ok(None),
        };

        // Keys are dates; the lexicographically largest is the newest
        let latest = match series.keys().max() {
            Some(key) => key,
            None => return Ok(None),
        };
        Ok(series
            .get(latest)
            .and_then(|v| v.as_object())
            .and_then(|o| o.values().next())
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_numbers_parse() {
        let json = serde_json::json!({"PERatio": "18.4", "Beta": "None", "EPS": 2.5});
        assert_eq!(num_field(&json, "PERatio"), Some(18.4));
        assert_eq!(num_field(&json, "Beta"), None);
        assert_eq!(num_field(&json, "EPS"), Some(2.5));
        assert_eq!(num_field(&json, "Missing"), None);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_absence_without_io() {
        // Zero budget: the client must not even attempt the request,
        // so a nonsense URL cannot produce an error.
        let client = AlphaVantageClient::new("key".into(), 0, 0, Duration::from_secs(1))
            .with_base_url("http://127.0.0.1:1".into());
        let result = client.fundamentals("SAP.DE").await.unwrap();
        assert!(result.is_none());
    }
}
