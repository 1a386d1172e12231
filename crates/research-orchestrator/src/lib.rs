use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use arena_core::{
    ArenaConfig, Briefing, ModelDescriptor, Recommendation, ResearchType, Symbol,
};
use data_clients::StructuredDataAggregator;
use decision_loop::{DecisionLoop, DecisionOutcome};
use market_data::MarketDataProvider;
use news_monitor::NewsMonitor;
use research_cache::{CacheEntry, CacheKey, FillSlot, ResearchCache};
use research_qa::QaEngine;
use research_synthesizer::{research_model_for, ResearchInputs, ResearchSynthesizer};
use technical_analysis::TechnicalAnalyzer;
use trading_engine::TradingEngine;

/// Counters emitted by one research tick.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TickReport {
    pub briefings_generated: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rejections: u64,
}

/// Drives the full per-symbol pipeline (collect, synthesize, QA, cache)
/// and the per-tick fan-out across agents.
pub struct ResearchOrchestrator {
    config: ArenaConfig,
    market: Arc<MarketDataProvider>,
    monitor: Arc<NewsMonitor>,
    aggregator: Arc<StructuredDataAggregator>,
    analyzer: TechnicalAnalyzer,
    synthesizer: Arc<ResearchSynthesizer>,
    qa: Arc<QaEngine>,
    cache: Arc<ResearchCache>,
    engine: Arc<TradingEngine>,
    decisions: Arc<DecisionLoop>,
}

impl ResearchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ArenaConfig,
        market: Arc<MarketDataProvider>,
        monitor: Arc<NewsMonitor>,
        aggregator: Arc<StructuredDataAggregator>,
        synthesizer: Arc<ResearchSynthesizer>,
        qa: Arc<QaEngine>,
        cache: Arc<ResearchCache>,
        engine: Arc<TradingEngine>,
        decisions: Arc<DecisionLoop>,
    ) -> Self {
        Self {
            config,
            market,
            monitor,
            aggregator,
            analyzer: TechnicalAnalyzer::new(),
            synthesizer,
            qa,
            cache,
            engine,
            decisions,
        }
    }

    pub fn cache(&self) -> &Arc<ResearchCache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<TradingEngine> {
        &self.engine
    }

    /// Per-symbol pipeline: cached, QA'd briefing. A QA REJECT is still
    /// stored and returned; the caller decides what to do with it.
    pub async fn research(
        &self,
        symbol: &Symbol,
        model_for_research: &str,
        force_refresh: bool,
    ) -> Briefing {
        let key = CacheKey::new(symbol.as_str(), ResearchType::Complete);

        if !force_refresh {
            if let Some(entry) = self.cache.get(&key) {
                tracing::debug!(symbol = %symbol, "briefing served from cache");
                return entry.briefing;
            }
        }

        let permit = if force_refresh {
            self.cache.begin_refresh(&key).await
        } else {
            match self.cache.begin_fill(&key).await {
                FillSlot::Ready(entry) => return entry.briefing,
                FillSlot::MustFill(permit) => permit,
                FillSlot::Busy => unreachable!("blocking fill never reports busy"),
            }
        };

        let research_model = research_model_for(model_for_research);

        // Independent sub-pipelines; any absence becomes a data gap.
        let (history, mut record, price) = tokio::join!(
            self.market.history(symbol, 90),
            self.aggregator.collect(symbol),
            self.market.current_price(symbol),
        );

        record.current_price = price.ok().flatten();
        record.technical = history.ok().flatten().and_then(|bars| {
            self.analyzer
                .analyze(&bars)
                .map_err(|e| tracing::debug!(symbol = %symbol, error = %e, "technical panel unavailable"))
                .ok()
        });

        let mut news = self.monitor.items(symbol);
        let mut seen: HashSet<(String, String)> = news.iter().map(|n| n.dedup_key()).collect();
        for item in self.aggregator.news(symbol, 7).await {
            if seen.insert(item.dedup_key()) {
                news.push(item);
            }
        }

        let inputs = ResearchInputs {
            symbol,
            record: &record,
            news: &news,
            portfolio_context: None,
        };
        let mut briefing = self.synthesizer.synthesize(&inputs, &research_model).await;

        let qa = self.qa.assess(&briefing, &research_model).await;
        if qa.recommendation == Recommendation::Reject {
            tracing::warn!(
                symbol = %symbol,
                overall = qa.overall_score,
                contradictions = qa.contradictions.len(),
                "briefing rejected by QA, stored with REJECT"
            );
        }

        let now = Utc::now();
        let ttl = Duration::seconds(self.config.cache_ttl_secs(ResearchType::Complete.as_str()));
        briefing.meta.quality_score = qa.overall_score;
        briefing.meta.recommendation = qa.recommendation;
        briefing.meta.confidence = qa.confidence;
        briefing.meta.generated_at = now;
        briefing.meta.expires_at = now + ttl;

        let entry = CacheEntry {
            key: format!("{}:{}", symbol, ResearchType::Complete.as_str()),
            symbol: symbol.to_string(),
            briefing: briefing.clone(),
            research_type: ResearchType::Complete,
            model_used: research_model,
            quality_score: qa.overall_score,
            created_at: now,
            expires_at: now + ttl,
            cost: self.config.cost_per_research,
        };
        self.cache.complete_fill(permit, entry).await;

        briefing
    }

    /// Per-tick pipeline: one shared research set, one cache fill per
    /// symbol on the canonical research model, then every agent decides
    /// against the same briefings.
    pub async fn tick_research(
        &self,
        now: DateTime<Utc>,
        agents: &[ModelDescriptor],
    ) -> anyhow::Result<TickReport> {
        if agents.is_empty() {
            return Ok(TickReport::default());
        }
        tracing::info!(at = %now, agents = agents.len(), "research tick starting");

        self.monitor.refresh_feeds().await;

        // The research set is anchored on the richest agent's positions
        let reference = self.highest_cash_agent(agents).await?;
        let positions = self.engine.get_positions(reference.id).await?;
        let mut holdings: Vec<(Symbol, Decimal)> = Vec::new();
        for position in &positions {
            if let Ok(symbol) = Symbol::parse(&position.symbol) {
                holdings.push((symbol, position.current_price * Decimal::from(position.quantity)));
            }
        }
        let research_set = self
            .monitor
            .select_research_set(&holdings, self.config.research_stock_limit);
        tracing::info!(symbols = ?research_set.iter().map(Symbol::as_str).collect::<Vec<_>>(), "research set selected");

        let before = self.cache.metrics();
        let canonical_model = reference.api_identifier.clone();
        let budget = std::time::Duration::from_secs(self.config.tick_symbol_budget_secs);

        // Bounded fan-out over the research set
        let results: Vec<(Symbol, Option<Briefing>)> = stream::iter(research_set.iter().cloned())
            .map(|symbol| {
                let canonical_model = canonical_model.clone();
                async move {
                    let outcome =
                        tokio::time::timeout(budget, self.research(&symbol, &canonical_model, false))
                            .await;
                    match outcome {
                        Ok(briefing) => (symbol, Some(briefing)),
                        Err(_) => {
                            tracing::warn!(symbol = %symbol, "symbol abandoned for this tick (budget exceeded)");
                            let fallback = self.stale_fallback(&symbol);
                            (symbol, fallback)
                        }
                    }
                }
            })
            .buffer_unordered(self.config.worker_pool_size.max(1))
            .collect()
            .await;

        let mut briefings: HashMap<String, Briefing> = HashMap::new();
        let mut ordered: Vec<Symbol> = Vec::new();
        for symbol in &research_set {
            if let Some((_, Some(briefing))) = results.iter().find(|(s, _)| s == symbol) {
                briefings.insert(symbol.as_str().to_string(), briefing.clone());
                ordered.push(symbol.clone());
            }
        }

        let after_fill = self.cache.metrics();
        let briefings_generated = after_fill.misses.saturating_sub(before.misses);
        let rejections = briefings
            .values()
            .filter(|b| b.meta.recommendation == Recommendation::Reject)
            .count() as u64;

        // Fan out per agent. The first agent consumes the in-hand
        // briefings; later agents read the shared cache, which is where
        // the cross-agent sharing (and the hit counters) shows up.
        for (index, agent) in agents.iter().enumerate() {
            let agent_briefings: Vec<Briefing> = if index == 0 {
                ordered
                    .iter()
                    .filter_map(|s| briefings.get(s.as_str()).cloned())
                    .collect()
            } else {
                ordered
                    .iter()
                    .filter_map(|symbol| {
                        let key = CacheKey::new(symbol.as_str(), ResearchType::Complete);
                        self.cache
                            .get(&key)
                            .map(|entry| entry.briefing)
                            .or_else(|| briefings.get(symbol.as_str()).cloned())
                    })
                    .collect()
            };

            if agent_briefings.is_empty() {
                tracing::info!(agent = %agent.api_identifier, "no briefings this tick, skipping decision");
                continue;
            }
            match self.decisions.run(agent, &agent_briefings).await {
                Ok(outcome) => {
                    tracing::info!(
                        agent = %agent.api_identifier,
                        decision = outcome.decision.action.as_str(),
                        traded = outcome.executed.is_some(),
                        "agent decision recorded"
                    );
                }
                Err(e) => {
                    tracing::error!(agent = %agent.api_identifier, error = %e, "agent decision failed");
                }
            }
        }

        let after = self.cache.metrics();
        Ok(TickReport {
            briefings_generated,
            cache_hits: after.hits.saturating_sub(before.hits),
            cache_misses: after.misses.saturating_sub(before.misses),
            rejections,
        })
    }

    /// One agent's decision pass over already-researched briefings,
    /// callable by the surrounding application.
    pub async fn run_agent_decision(
        &self,
        agent: &ModelDescriptor,
        briefings: &[Briefing],
    ) -> anyhow::Result<DecisionOutcome> {
        self.decisions.run(agent, briefings).await
    }

    /// Event-driven invalidation, forwarded to the cache.
    pub fn invalidate_research(&self, event_type: &str, symbols: Option<&[Symbol]>, reason: &str) {
        match symbols {
            Some(symbols) => {
                for symbol in symbols {
                    self.cache.invalidate(symbol.as_str());
                }
                tracing::info!(event_type, reason, count = symbols.len(), "symbol research invalidated");
            }
            None => {
                self.cache.invalidate_all(reason);
                tracing::warn!(event_type, reason, "market-wide research invalidated");
            }
        }
    }

    async fn highest_cash_agent<'a>(
        &self,
        agents: &'a [ModelDescriptor],
    ) -> anyhow::Result<&'a ModelDescriptor> {
        let mut best = &agents[0];
        let mut best_cash = Decimal::MIN;
        for agent in agents {
            let portfolio = self.engine.get_portfolio(agent.id).await?;
            if portfolio.cash_balance > best_cash {
                best_cash = portfolio.cash_balance;
                best = agent;
            }
        }
        Ok(best)
    }

    /// Optional degraded fallback: an expired cached briefing, used only
    /// when the tick budget killed the fresh pipeline and the operator
    /// opted in.
    fn stale_fallback(&self, symbol: &Symbol) -> Option<Briefing> {
        if !self.config.allow_stale_fallback {
            return None;
        }
        let key = CacheKey::new(symbol.as_str(), ResearchType::Complete);
        self.cache.get_stale(&key).map(|entry| {
            tracing::warn!(symbol = %symbol, "serving stale briefing as degraded fallback");
            let mut briefing = entry.briefing;
            briefing.meta.confidence = arena_core::ConfidenceLevel::Low;
            briefing
        })
    }
}
