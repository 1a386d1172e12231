use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use arena_core::{
    AnalystRatings, ArenaError, NewsItem, StockRecord, StructuredUpstream, Symbol,
};

/// Composes the structured upstreams into one normalized record.
///
/// Each section is filled by the first upstream that yields data; a
/// missing or failing upstream leaves the section absent. Nothing here
/// raises toward the orchestrator.
pub struct StructuredDataAggregator {
    upstreams: Vec<Arc<dyn StructuredUpstream>>,
    call_timeout: Duration,
}

impl StructuredDataAggregator {
    pub fn new(upstreams: Vec<Arc<dyn StructuredUpstream>>, call_timeout: Duration) -> Self {
        Self {
            upstreams,
            call_timeout,
        }
    }

    /// Fill a `StockRecord` section by section.
    pub async fn collect(&self, symbol: &Symbol) -> StockRecord {
        let mut record = StockRecord::empty(symbol.as_str());
        record.as_of = Utc::now();

        for upstream in &self.upstreams {
            if record.fundamentals.is_none() {
                record.fundamentals =
                    self.capture(upstream.name(), "fundamentals", upstream.fundamentals(symbol.as_str())).await;
            }
            if record.earnings.is_none() {
                record.earnings =
                    self.capture(upstream.name(), "earnings", upstream.earnings(symbol.as_str())).await;
            }
            if record.sentiment.is_none() {
                record.sentiment =
                    self.capture(upstream.name(), "sentiment", upstream.sentiment(symbol.as_str())).await;
            }
            if record.ratings.is_none() {
                record.ratings =
                    self.capture(upstream.name(), "recommendation", upstream.recommendation(symbol.as_str())).await;
            }
        }

        // Price targets enrich the ratings record rather than standing alone
        if let Some(ratings) = record.ratings.as_mut() {
            if ratings.target_mean.is_none() {
                for upstream in &self.upstreams {
                    if let Some(target) =
                        self.capture(upstream.name(), "price_target", upstream.price_target(symbol.as_str())).await
                    {
                        ratings.target_mean = target.mean;
                        ratings.target_high = target.high;
                        ratings.target_low = target.low;
                        break;
                    }
                }
            }
        } else {
            for upstream in &self.upstreams {
                if let Some(target) =
                    self.capture(upstream.name(), "price_target", upstream.price_target(symbol.as_str())).await
                {
                    record.ratings = Some(AnalystRatings {
                        target_mean: target.mean,
                        target_high: target.high,
                        target_low: target.low,
                        ..AnalystRatings::default()
                    });
                    break;
                }
            }
        }

        record
    }

    /// Upstream news for the symbol, merged across providers.
    pub async fn news(&self, symbol: &Symbol, days: u32) -> Vec<NewsItem> {
        let mut items = Vec::new();
        for upstream in &self.upstreams {
            if let Some(mut batch) =
                self.capture(upstream.name(), "news", upstream.news(symbol.as_str(), days)).await
            {
                items.append(&mut batch);
            }
        }
        items
    }

    /// Run one upstream call with a timeout, converting both errors and
    /// timeouts into absence.
    async fn capture<T>(
        &self,
        upstream: &str,
        what: &str,
        call: impl std::future::Future<Output = Result<Option<T>, ArenaError>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(upstream, what, error = %e, "structured upstream failed");
                None
            }
            Err(_) => {
                tracing::warn!(upstream, what, "structured upstream timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::{Fundamentals, PriceTarget, SentimentSnapshot};
    use async_trait::async_trait;

    struct FundamentalsOnly;

    #[async_trait]
    impl StructuredUpstream for FundamentalsOnly {
        fn name(&self) -> &'static str {
            "fundamentals_only"
        }

        async fn fundamentals(&self, _symbol: &str) -> Result<Option<Fundamentals>, ArenaError> {
            Ok(Some(Fundamentals {
                pe_ratio: Some(17.2),
                ..Fundamentals::default()
            }))
        }
    }

    struct SentimentAndTargets;

    #[async_trait]
    impl StructuredUpstream for SentimentAndTargets {
        fn name(&self) -> &'static str {
            "sentiment_and_targets"
        }

        async fn sentiment(&self, _symbol: &str) -> Result<Option<SentimentSnapshot>, ArenaError> {
            Ok(Some(SentimentSnapshot {
                bullish_percentage: Some(62.0),
                bearish_percentage: Some(38.0),
                articles_analyzed: Some(24),
            }))
        }

        async fn price_target(&self, _symbol: &str) -> Result<Option<PriceTarget>, ArenaError> {
            Ok(Some(PriceTarget {
                mean: Some(150.0),
                high: Some(180.0),
                low: Some(120.0),
            }))
        }
    }

    struct AlwaysErrors;

    #[async_trait]
    impl StructuredUpstream for AlwaysErrors {
        fn name(&self) -> &'static str {
            "always_errors"
        }

        async fn fundamentals(&self, _symbol: &str) -> Result<Option<Fundamentals>, ArenaError> {
            Err(ArenaError::Upstream("down".into()))
        }
    }

    #[tokio::test]
    async fn partial_capabilities_compose() {
        let aggregator = StructuredDataAggregator::new(
            vec![Arc::new(FundamentalsOnly), Arc::new(SentimentAndTargets)],
            Duration::from_secs(5),
        );
        let symbol = Symbol::parse("SAP.DE").unwrap();
        let record = aggregator.collect(&symbol).await;

        assert_eq!(record.fundamentals.unwrap().pe_ratio, Some(17.2));
        assert_eq!(record.sentiment.unwrap().bullish_percentage, Some(62.0));
        // Price target arrived without a recommendation provider
        assert_eq!(record.ratings.unwrap().target_mean, Some(150.0));
        assert!(record.earnings.is_none());
    }

    #[tokio::test]
    async fn upstream_errors_become_absences() {
        let aggregator =
            StructuredDataAggregator::new(vec![Arc::new(AlwaysErrors)], Duration::from_secs(5));
        let symbol = Symbol::parse("BMW.DE").unwrap();
        let record = aggregator.collect(&symbol).await;
        assert!(record.fundamentals.is_none());
        assert!(record.sentiment.is_none());
    }
}
