//! End-to-end pipeline tests with scripted upstreams and a scripted LLM:
//! cache sharing across agents, QA rejection handling, cache reuse across
//! ticks.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Europe::Berlin;
use std::sync::{Arc, Mutex};

use arena_core::{
    ArenaConfig, ArenaError, Bar, Clock, FeedEntry, FeedSource, MarketDataUpstream,
    ModelDescriptor, Quote, Recommendation, ResearchType, Symbol, SECTION_KEYS,
};
use data_clients::StructuredDataAggregator;
use decision_loop::DecisionLoop;
use llm_gateway::test_support::ScriptedGateway;
use llm_gateway::LlmError;
use market_data::MarketDataProvider;
use news_monitor::NewsMonitor;
use research_cache::{CacheKey, ResearchCache};
use research_orchestrator::ResearchOrchestrator;
use research_qa::QaEngine;
use research_synthesizer::ResearchSynthesizer;
use trading_engine::{ArenaStore, TradingEngine};

struct ScriptedMarket {
    price: Mutex<f64>,
}

#[async_trait]
impl MarketDataUpstream for ScriptedMarket {
    async fn quote(&self, _symbol: &str) -> Result<Option<Quote>, ArenaError> {
        Ok(Some(Quote {
            price: *self.price.lock().unwrap(),
            volume: None,
            high: None,
            low: None,
            bid: None,
            ask: None,
            timestamp: Utc::now(),
        }))
    }

    async fn history(&self, symbol: &str, days: u32) -> Result<Option<Vec<Bar>>, ArenaError> {
        let bars = (0..days.max(60))
            .map(|i| Bar {
                symbol: symbol.to_string(),
                timestamp: Utc::now() - chrono::Duration::days((days.max(60) - i) as i64),
                open: 100.0 + i as f64 * 0.2,
                high: 101.0 + i as f64 * 0.2,
                low: 99.0 + i as f64 * 0.2,
                close: 100.0 + i as f64 * 0.2,
                volume: 10_000.0,
            })
            .collect();
        Ok(Some(bars))
    }
}

struct ScriptedFeed;

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn fetch(&self, _url: &str) -> Result<Option<Vec<FeedEntry>>, ArenaError> {
        let mk = |headline: &str, url: &str, age_hours: i64| FeedEntry {
            headline: headline.to_string(),
            source: "Reuters".to_string(),
            url: url.to_string(),
            published_at: Utc::now() - chrono::Duration::hours(age_hours),
            body: None,
        };
        Ok(Some(vec![
            mk("SAP beats earnings estimates", "https://n.example/sap1", 1),
            mk("SAP raises cloud guidance", "https://n.example/sap2", 3),
            mk("SAP expands AI partnerships", "https://n.example/sap3", 5),
        ]))
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn open_instant() -> DateTime<Utc> {
    Berlin.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap().with_timezone(&Utc)
}

fn ten_section_reply() -> String {
    let mut object = serde_json::Map::new();
    for key in SECTION_KEYS {
        object.insert(
            key.to_string(),
            serde_json::json!({"summary": format!("content for {key}")}),
        );
    }
    serde_json::Value::Object(object).to_string()
}

struct Arena {
    orchestrator: ResearchOrchestrator,
    gateway: Arc<ScriptedGateway>,
    agents: Vec<ModelDescriptor>,
    _cache_dir: tempfile::TempDir,
}

async fn arena_with_script(script: Vec<Result<String, LlmError>>) -> Arena {
    let mut config = ArenaConfig::default();
    config.price_cache_ttl_secs = 0;
    config.feed_urls = vec!["https://feeds.example.com/dax".to_string()];

    let cache_dir = tempfile::tempdir().unwrap();
    config.cache_dir = cache_dir.path().to_string_lossy().to_string();

    let gateway = Arc::new(ScriptedGateway::new(script));
    let market = Arc::new(ScriptedMarket {
        price: Mutex::new(120.0),
    });
    let provider = Arc::new(MarketDataProvider::new(market, &config).unwrap());
    let monitor = Arc::new(NewsMonitor::new(Arc::new(ScriptedFeed), &config));
    let aggregator = Arc::new(StructuredDataAggregator::new(
        vec![],
        std::time::Duration::from_secs(5),
    ));
    let synthesizer = Arc::new(ResearchSynthesizer::new(gateway.clone(), &config));
    let qa = Arc::new(QaEngine::new(gateway.clone(), &config));
    let cache = Arc::new(ResearchCache::new(cache_dir.path(), config.cost_per_research));

    let store = ArenaStore::connect("sqlite::memory:").await.unwrap();
    let engine = Arc::new(
        TradingEngine::new(store, provider.clone(), &config)
            .with_clock(Arc::new(FixedClock(open_instant()))),
    );
    let agent_a = engine.register_model("Agent A", "agent-a").await.unwrap();
    let agent_b = engine.register_model("Agent B", "agent-b").await.unwrap();

    let decisions = Arc::new(DecisionLoop::new(gateway.clone(), engine.clone(), &config));

    let orchestrator = ResearchOrchestrator::new(
        config,
        provider,
        monitor,
        aggregator,
        synthesizer,
        qa,
        cache,
        engine,
        decisions,
    );

    Arena {
        orchestrator,
        gateway,
        agents: vec![agent_a, agent_b],
        _cache_dir: cache_dir,
    }
}

/// Query-gen, synthesis, self-review, contradiction check: one full
/// research pipeline run.
fn research_script() -> Vec<Result<String, LlmError>> {
    vec![
        Ok(r#"{"queries": ["SAP earnings", "SAP outlook"]}"#.to_string()),
        Ok(ten_section_reply()),
        Ok(r#"{"accuracy": 22, "completeness": 21, "objectivity": 22, "usefulness": 20}"#.to_string()),
        Ok(r#"{"contradictions": []}"#.to_string()),
    ]
}

/// Research pipeline plus the agents' decisions.
fn happy_script() -> Vec<Result<String, LlmError>> {
    let mut script = research_script();
    script.push(Ok(
        r#"{"action": "HOLD", "reasoning": "waiting", "confidence": "MEDIUM"}"#.to_string(),
    ));
    script
}

#[tokio::test]
async fn tick_shares_one_briefing_across_agents() {
    let arena = arena_with_script(happy_script()).await;

    let report = arena
        .orchestrator
        .tick_research(open_instant(), &arena.agents)
        .await
        .unwrap();

    // One pipeline run, second agent served from the cache
    assert_eq!(report.briefings_generated, 1);
    assert_eq!(report.cache_misses, 1);
    assert_eq!(report.cache_hits, 1);
    assert_eq!(report.rejections, 0);

    // Exactly one synthesis paid for: queries + synthesis + review +
    // contradictions + two decisions
    assert_eq!(arena.gateway.calls(), 6);

    // Both agents produced exactly one reasoning entry
    for agent in &arena.agents {
        let entries = arena
            .orchestrator
            .engine()
            .latest_reasoning(agent.id, 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    // Agents reading the cache observe byte-identical briefings
    let key = CacheKey::new("SAP.DE", ResearchType::Complete);
    let first = arena.orchestrator.cache().get(&key).unwrap();
    let second = arena.orchestrator.cache().get(&key).unwrap();
    assert_eq!(
        serde_json::to_vec(&first.briefing).unwrap(),
        serde_json::to_vec(&second.briefing).unwrap()
    );
}

#[tokio::test]
async fn second_tick_reuses_cached_briefing() {
    let arena = arena_with_script(happy_script()).await;

    arena
        .orchestrator
        .tick_research(open_instant(), &arena.agents)
        .await
        .unwrap();
    let calls_after_first = arena.gateway.calls();

    let report = arena
        .orchestrator
        .tick_research(open_instant(), &arena.agents)
        .await
        .unwrap();

    assert_eq!(report.briefings_generated, 0);
    assert_eq!(report.cache_misses, 0);
    // Prefill hit plus the second agent's fetch
    assert_eq!(report.cache_hits, 2);
    // Only the two decision calls were added
    assert_eq!(arena.gateway.calls(), calls_after_first + 2);
}

#[tokio::test]
async fn rejected_briefing_is_stored_and_agents_still_decide() {
    let script = vec![
        Ok(r#"{"queries": ["SAP earnings", "SAP outlook"]}"#.to_string()),
        Ok(ten_section_reply()),
        Ok(r#"{"accuracy": 20, "completeness": 20, "objectivity": 20, "usefulness": 20}"#.to_string()),
        // Two HIGH-credibility sources disagreeing on the same quarter
        Ok(r#"{"contradictions": [{"type": "SENTIMENT", "severity": "HIGH",
             "description": "bullish earnings beat vs missed estimates, both newswires, same date",
             "sources": ["reuters", "bloomberg"]}]}"#
            .to_string()),
        Ok(r#"{"action": "HOLD", "reasoning": "research contradictory", "confidence": "LOW"}"#.to_string()),
    ];
    let arena = arena_with_script(script).await;

    let report = arena
        .orchestrator
        .tick_research(open_instant(), &arena.agents)
        .await
        .unwrap();

    assert_eq!(report.briefings_generated, 1);
    assert_eq!(report.rejections, 1);

    // Stored despite REJECT, with the verdict on the meta
    let key = CacheKey::new("SAP.DE", ResearchType::Complete);
    let entry = arena.orchestrator.cache().get(&key).unwrap();
    assert_eq!(entry.briefing.meta.recommendation, Recommendation::Reject);

    // Decisions still ran (and held)
    for agent in &arena.agents {
        let entries = arena
            .orchestrator
            .engine()
            .latest_reasoning(agent.id, 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision, "HOLD");
    }
}

#[tokio::test]
async fn force_refresh_bypasses_cache() {
    // Two full pipeline runs, no decisions involved
    let mut script = research_script();
    script.extend(research_script());
    let arena = arena_with_script(script).await;

    let symbol = Symbol::parse("SAP.DE").unwrap();
    let first = arena.orchestrator.research(&symbol, "agent-a", false).await;
    let calls_after_first = arena.gateway.calls();
    assert_eq!(calls_after_first, 4);

    let second = arena.orchestrator.research(&symbol, "agent-a", true).await;
    assert_eq!(arena.gateway.calls(), calls_after_first + 4);
    assert_eq!(first.meta.symbol, second.meta.symbol);
}

#[tokio::test]
async fn invalidation_forces_regeneration() {
    let mut script = research_script();
    script.extend(research_script());
    let arena = arena_with_script(script).await;

    let symbol = Symbol::parse("SAP.DE").unwrap();
    arena.orchestrator.research(&symbol, "agent-a", false).await;

    arena
        .orchestrator
        .invalidate_research("geopolitical", Some(std::slice::from_ref(&symbol)), "sudden escalation");

    let key = CacheKey::new("SAP.DE", ResearchType::Complete);
    assert!(arena.orchestrator.cache().get(&key).is_none());

    arena.orchestrator.research(&symbol, "agent-a", false).await;
    assert_eq!(arena.gateway.calls(), 8);
}
