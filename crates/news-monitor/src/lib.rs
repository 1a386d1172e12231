use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use arena_core::{ArenaConfig, ArenaError, FeedEntry, FeedSource, NewsItem, Symbol, DAX_UNIVERSE};

pub mod sentiment;

struct FeedCacheEntry {
    entries: Vec<FeedEntry>,
    fetched_at: DateTime<Utc>,
}

/// Monitors news for every universe symbol and ranks symbols worth
/// researching now.
///
/// Feed results are cached per URL; a failing feed is skipped and its
/// last cached entries keep serving until the TTL runs out.
pub struct NewsMonitor {
    source: Arc<dyn FeedSource>,
    feed_urls: Vec<String>,
    feed_cache: DashMap<String, FeedCacheEntry>,
    /// Rolling index: symbol -> deduplicated items inside the lookback window.
    index: DashMap<String, Vec<NewsItem>>,
    lookback: Duration,
    feed_ttl: Duration,
    feed_timeout: StdDuration,
    min_news_threshold: usize,
}

impl NewsMonitor {
    pub fn new(source: Arc<dyn FeedSource>, config: &ArenaConfig) -> Self {
        Self {
            source,
            feed_urls: config.feed_urls.clone(),
            feed_cache: DashMap::new(),
            index: DashMap::new(),
            lookback: Duration::hours(config.momentum_lookback_hours),
            feed_ttl: Duration::seconds(config.rss_cache_ttl_secs as i64),
            feed_timeout: StdDuration::from_secs(config.feed_timeout_secs),
            min_news_threshold: config.min_news_threshold,
        }
    }

    /// Pull all configured feeds and rebuild the per-symbol index.
    /// Per-feed failures are isolated; the monitor never propagates them.
    pub async fn refresh_feeds(&self) {
        let now = Utc::now();
        for url in &self.feed_urls {
            if let Some(cached) = self.feed_cache.get(url) {
                if now - cached.fetched_at < self.feed_ttl {
                    continue;
                }
            }

            let fetched = tokio::time::timeout(self.feed_timeout, self.source.fetch(url)).await;
            match fetched {
                Ok(Ok(Some(entries))) => {
                    self.feed_cache.insert(
                        url.clone(),
                        FeedCacheEntry {
                            entries,
                            fetched_at: now,
                        },
                    );
                }
                Ok(Ok(None)) => {
                    tracing::debug!(url, "feed returned nothing");
                }
                Ok(Err(e)) => {
                    tracing::warn!(url, error = %e, "feed fetch failed, keeping last data");
                }
                Err(_) => {
                    tracing::warn!(url, "feed fetch timed out, keeping last data");
                }
            }
        }

        self.rebuild_index(now);
    }

    fn rebuild_index(&self, now: DateTime<Utc>) {
        let cutoff = now - self.lookback;
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut per_symbol: std::collections::HashMap<String, Vec<NewsItem>> =
            std::collections::HashMap::new();

        for cached in self.feed_cache.iter() {
            for entry in &cached.entries {
                if entry.published_at < cutoff {
                    continue;
                }
                let symbols = match_symbols(&entry.headline);
                if symbols.is_empty() {
                    continue;
                }
                let item = NewsItem {
                    symbols: symbols.clone(),
                    headline: entry.headline.clone(),
                    source: entry.source.clone(),
                    url: entry.url.clone(),
                    published_at: entry.published_at,
                    sentiment_label: Some(sentiment::label_text(&entry.headline).to_string()),
                };
                if !seen.insert(item.dedup_key()) {
                    continue;
                }
                for symbol in symbols {
                    per_symbol.entry(symbol).or_default().push(item.clone());
                }
            }
        }

        self.index.clear();
        for (symbol, mut items) in per_symbol {
            items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
            self.index.insert(symbol, items);
        }
    }

    /// Deduplicated items for a symbol inside the lookback window.
    pub fn items(&self, symbol: &Symbol) -> Vec<NewsItem> {
        self.index
            .get(symbol.as_str())
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// Momentum score in [0, 100]: ten points per article in the lookback
    /// window, doubled for articles younger than two hours.
    pub fn momentum(&self, symbol: &Symbol) -> u32 {
        self.momentum_at(symbol, Utc::now())
    }

    fn momentum_at(&self, symbol: &Symbol, now: DateTime<Utc>) -> u32 {
        let items = match self.index.get(symbol.as_str()) {
            Some(items) => items,
            None => return 0,
        };
        let cutoff = now - self.lookback;
        let recent_cutoff = now - Duration::hours(2);

        let mut score = 0u32;
        for item in items.iter().filter(|i| i.published_at >= cutoff) {
            score += 10;
            if item.published_at >= recent_cutoff {
                score += 10;
            }
        }
        score.min(100)
    }

    /// Symbols by momentum descending, ties broken by the most recent item.
    pub fn top_trending(&self, k: usize) -> Vec<Symbol> {
        let now = Utc::now();
        let mut ranked: Vec<(Symbol, u32, DateTime<Utc>)> = DAX_UNIVERSE
            .iter()
            .filter_map(|(raw, _)| Symbol::parse(raw).ok())
            .map(|symbol| {
                let score = self.momentum_at(&symbol, now);
                let latest = self
                    .index
                    .get(symbol.as_str())
                    .and_then(|items| items.first().map(|i| i.published_at))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                (symbol, score, latest)
            })
            .filter(|(_, score, _)| *score > 0)
            .collect();

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        ranked.into_iter().take(k).map(|(s, _, _)| s).collect()
    }

    /// Up to `k` symbols: the top five open positions by portfolio value,
    /// then trending symbols with enough news volume, both in stable order.
    pub fn select_research_set(
        &self,
        open_positions: &[(Symbol, Decimal)],
        k: usize,
    ) -> Vec<Symbol> {
        let mut positions = open_positions.to_vec();
        positions.sort_by(|a, b| b.1.cmp(&a.1));

        let mut selected: Vec<Symbol> = Vec::with_capacity(k);
        for (symbol, _) in positions.into_iter().take(5) {
            if selected.len() >= k {
                break;
            }
            if !selected.contains(&symbol) {
                selected.push(symbol);
            }
        }

        for symbol in self.top_trending(k) {
            if selected.len() >= k {
                break;
            }
            let article_count = self
                .index
                .get(symbol.as_str())
                .map(|items| items.len())
                .unwrap_or(0);
            if article_count < self.min_news_threshold {
                continue;
            }
            if !selected.contains(&symbol) {
                selected.push(symbol);
            }
        }

        selected
    }

    /// Count of monitored feeds that currently have cached data.
    pub fn live_feed_count(&self) -> usize {
        self.feed_cache.len()
    }
}

/// Match a headline against the universe by ticker token or company name.
fn match_symbols(headline: &str) -> Vec<String> {
    let lower = headline.to_lowercase();
    let tokens: HashSet<String> = headline
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_uppercase())
        .collect();

    DAX_UNIVERSE
        .iter()
        .filter(|(symbol, name)| {
            let ticker = symbol.trim_end_matches(".DE");
            tokens.contains(ticker) || lower.contains(&name.to_lowercase())
        })
        .map(|(symbol, _)| symbol.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct ScriptedFeed {
        entries: Vec<FeedEntry>,
        fail: bool,
    }

    #[async_trait]
    impl FeedSource for ScriptedFeed {
        async fn fetch(&self, _url: &str) -> Result<Option<Vec<FeedEntry>>, ArenaError> {
            if self.fail {
                return Err(ArenaError::Upstream("feed down".into()));
            }
            Ok(Some(self.entries.clone()))
        }
    }

    fn entry(headline: &str, url: &str, age_hours: i64) -> FeedEntry {
        FeedEntry {
            headline: headline.to_string(),
            source: "test-feed".to_string(),
            url: url.to_string(),
            published_at: Utc::now() - Duration::hours(age_hours),
            body: None,
        }
    }

    fn monitor_with(entries: Vec<FeedEntry>) -> NewsMonitor {
        let mut config = ArenaConfig::default();
        config.feed_urls = vec!["https://feeds.example.com/dax".to_string()];
        NewsMonitor::new(Arc::new(ScriptedFeed { entries, fail: false }), &config)
    }

    #[tokio::test]
    async fn momentum_counts_articles_with_recency_bonus() {
        let monitor = monitor_with(vec![
            entry("SAP beats earnings estimates", "https://n.example/1", 1),
            entry("SAP raises guidance after strong quarter", "https://n.example/2", 5),
            entry("SAP cloud growth accelerates", "https://n.example/3", 12),
        ]);
        monitor.refresh_feeds().await;

        let sap = Symbol::parse("SAP.DE").unwrap();
        // 3 articles x 10, one younger than 2h doubles to 20
        assert_eq!(monitor.momentum(&sap), 40);
    }

    #[tokio::test]
    async fn momentum_is_capped_at_hundred() {
        let entries: Vec<FeedEntry> = (0..15)
            .map(|i| entry("BMW rally continues", &format!("https://n.example/bmw{i}"), 1))
            .collect();
        let monitor = monitor_with(entries);
        monitor.refresh_feeds().await;
        assert_eq!(monitor.momentum(&Symbol::parse("BMW.DE").unwrap()), 100);
    }

    #[tokio::test]
    async fn items_outside_lookback_are_ignored() {
        let monitor = monitor_with(vec![
            entry("Bayer lawsuit update", "https://n.example/old", 30),
        ]);
        monitor.refresh_feeds().await;
        assert_eq!(monitor.momentum(&Symbol::parse("BAYN.DE").unwrap()), 0);
    }

    #[tokio::test]
    async fn duplicate_urls_are_deduplicated() {
        let monitor = monitor_with(vec![
            entry("Siemens wins major order", "https://n.example/same", 3),
            entry("Siemens wins major order", "https://n.example/same", 3),
        ]);
        monitor.refresh_feeds().await;
        assert_eq!(monitor.momentum(&Symbol::parse("SIE.DE").unwrap()), 10);
    }

    #[tokio::test]
    async fn failing_feed_yields_zero_momentum_not_error() {
        let mut config = ArenaConfig::default();
        config.feed_urls = vec!["https://feeds.example.com/dax".to_string()];
        let monitor = NewsMonitor::new(
            Arc::new(ScriptedFeed {
                entries: vec![],
                fail: true,
            }),
            &config,
        );
        monitor.refresh_feeds().await;
        assert_eq!(monitor.momentum(&Symbol::parse("SAP.DE").unwrap()), 0);
    }

    #[tokio::test]
    async fn research_set_puts_positions_first() {
        let monitor = monitor_with(vec![
            entry("Adidas beats on sneaker demand", "https://n.example/a1", 1),
            entry("Adidas raises outlook", "https://n.example/a2", 2),
            entry("Adidas strong quarter in Asia", "https://n.example/a3", 3),
        ]);
        monitor.refresh_feeds().await;

        let positions = vec![
            (Symbol::parse("SAP.DE").unwrap(), dec!(600)),
            (Symbol::parse("BMW.DE").unwrap(), dec!(400)),
        ];
        let set = monitor.select_research_set(&positions, 10);

        assert_eq!(set[0], Symbol::parse("SAP.DE").unwrap());
        assert_eq!(set[1], Symbol::parse("BMW.DE").unwrap());
        assert!(set.contains(&Symbol::parse("ADS.DE").unwrap()));
    }

    #[tokio::test]
    async fn quiet_symbols_stay_out_of_research_set() {
        // One article is below the default min news threshold of three
        let monitor = monitor_with(vec![
            entry("Zalando quarterly report due", "https://n.example/z1", 1),
        ]);
        monitor.refresh_feeds().await;

        let set = monitor.select_research_set(&[], 10);
        assert!(set.is_empty(), "got {set:?}");
    }

    #[tokio::test]
    async fn trending_excludes_zero_momentum() {
        let monitor = monitor_with(vec![]);
        monitor.refresh_feeds().await;
        assert!(monitor.top_trending(10).is_empty());
    }
}
