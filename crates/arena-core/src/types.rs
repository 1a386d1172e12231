use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ArenaError;
use crate::universe::is_dax_symbol;

/// Validated XETRA symbol in the `XXXX.DE` form, member of the DAX universe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, ArenaError> {
        let candidate = raw.trim().to_uppercase();
        if !candidate.ends_with(".DE") || !is_dax_symbol(&candidate) {
            return Err(ArenaError::UnknownSymbol(raw.to_string()));
        }
        Ok(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Symbol {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One competing agent: a trading model with exactly one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: i64,
    pub display_name: String,
    /// Opaque identifier consumed by the LLM gateway.
    pub api_identifier: String,
    pub starting_balance: Decimal,
}

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A news item from a feed or a structured news upstream.
///
/// Deduplicated by url, then by (source, headline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub symbols: Vec<String>,
    pub headline: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub sentiment_label: Option<String>,
}

impl NewsItem {
    /// Identity used for deduplication.
    pub fn dedup_key(&self) -> (String, String) {
        if self.url.is_empty() {
            (self.source.clone(), self.headline.clone())
        } else {
            (self.url.clone(), String::new())
        }
    }
}

/// Normalized fundamentals across upstreams. Missing fields are explicit
/// absences, never zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fundamentals {
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub profit_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub eps: Option<f64>,
    pub market_cap: Option<f64>,
    pub beta: Option<f64>,
}

/// Latest reported quarter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarningsReport {
    pub fiscal_period: Option<String>,
    pub report_date: Option<String>,
    pub eps_actual: Option<f64>,
    pub eps_estimate: Option<f64>,
    pub surprise_percentage: Option<f64>,
    pub revenue: Option<f64>,
}

/// Aggregated analyst view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystRatings {
    pub buy_count: Option<i32>,
    pub hold_count: Option<i32>,
    pub sell_count: Option<i32>,
    pub consensus: Option<String>,
    pub target_mean: Option<f64>,
    pub target_high: Option<f64>,
    pub target_low: Option<f64>,
}

/// News/social sentiment split.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub bullish_percentage: Option<f64>,
    pub bearish_percentage: Option<f64>,
    pub articles_analyzed: Option<i32>,
}

/// Overall directional read derived from the indicator panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketSignal {
    Bullish,
    Bearish,
    Neutral,
}

impl MarketSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketSignal::Bullish => "BULLISH",
            MarketSignal::Bearish => "BEARISH",
            MarketSignal::Neutral => "NEUTRAL",
        }
    }
}

/// Computed indicator panel for one symbol, latest values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    pub adx_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub obv: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub week_52_high: Option<f64>,
    pub week_52_low: Option<f64>,
    pub change_1d_percentage: Option<f64>,
    pub change_5d_percentage: Option<f64>,
    pub change_20d_percentage: Option<f64>,
    pub overall_signal: Option<MarketSignal>,
}

/// Aggregated, normalized view of everything the structured upstreams and
/// the technical analyzer know about one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecord {
    pub symbol: String,
    pub current_price: Option<f64>,
    pub fundamentals: Option<Fundamentals>,
    pub earnings: Option<EarningsReport>,
    pub ratings: Option<AnalystRatings>,
    pub sentiment: Option<SentimentSnapshot>,
    pub technical: Option<TechnicalSnapshot>,
    pub as_of: DateTime<Utc>,
}

impl StockRecord {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            current_price: None,
            fundamentals: None,
            earnings: None,
            ratings: None,
            sentiment: None,
            technical: None,
            as_of: Utc::now(),
        }
    }
}

/// Trade side as persisted and validated by the trading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// Action an agent may emit per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionAction {
    Buy,
    Sell,
    Hold,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Buy => "BUY",
            DecisionAction::Sell => "SELL",
            DecisionAction::Hold => "HOLD",
        }
    }
}

/// Confidence tier used by briefings, QA, and decisions alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
        }
    }
}

/// Structured trading decision parsed from an agent's LLM output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: DecisionAction,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub reasoning: String,
    pub confidence: ConfidenceLevel,
    #[serde(default)]
    pub market_outlook: Option<String>,
    #[serde(default)]
    pub risk_assessment: Option<String>,
    #[serde(default)]
    pub uncertainty_acknowledged: Option<bool>,
    #[serde(default)]
    pub data_freshness: Option<String>,
    #[serde(default)]
    pub source_reliability: Option<String>,
}

impl TradeDecision {
    /// The fallback emitted whenever the agent output cannot be used.
    pub fn hold(reason: &str) -> Self {
        Self {
            action: DecisionAction::Hold,
            symbol: None,
            quantity: None,
            reasoning: reason.to_string(),
            confidence: ConfidenceLevel::Low,
            market_outlook: None,
            risk_assessment: None,
            uncertainty_acknowledged: None,
            data_freshness: None,
            source_reliability: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_validation() {
        assert!(Symbol::parse("SAP.DE").is_ok());
        assert!(Symbol::parse("sap.de").is_ok());
        assert!(Symbol::parse("AAPL").is_err());
        assert!(Symbol::parse("NOPE.DE").is_err());
    }

    #[test]
    fn decision_wire_format_round_trip() {
        let raw = r#"{
            "action": "BUY",
            "symbol": "SAP.DE",
            "quantity": 5,
            "reasoning": "strong earnings",
            "confidence": "HIGH",
            "market_outlook": "positive"
        }"#;
        let decision: TradeDecision = serde_json::from_str(raw).unwrap();
        assert_eq!(decision.action, DecisionAction::Buy);
        assert_eq!(decision.quantity, Some(5));
        assert_eq!(decision.confidence, ConfidenceLevel::High);
    }

    #[test]
    fn unknown_decision_fields_are_ignored() {
        let raw = r#"{"action": "HOLD", "confidence": "LOW", "brand_new_field": 1}"#;
        let decision: TradeDecision = serde_json::from_str(raw).unwrap();
        assert_eq!(decision.action, DecisionAction::Hold);
    }

    #[test]
    fn news_dedup_prefers_url() {
        let item = NewsItem {
            symbols: vec!["SAP.DE".into()],
            headline: "SAP beats estimates".into(),
            source: "Reuters".into(),
            url: "https://example.com/1".into(),
            published_at: Utc::now(),
            sentiment_label: None,
        };
        assert_eq!(item.dedup_key().0, "https://example.com/1");
    }
}
