use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;

/// Process-wide configuration, read once at startup and injected into the
/// components. All monetary values are EUR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    // Trading
    pub starting_capital: Decimal,     // per model
    pub trading_fee: Decimal,          // flat, per trade
    pub market_open_hour: u32,         // exchange-local
    pub market_close_hour: u32,
    pub market_close_minute: u32,
    pub timezone: String,              // exchange timezone
    pub holidays: Vec<NaiveDate>,

    // Research selection
    pub research_stock_limit: usize,
    pub momentum_lookback_hours: i64,
    pub min_news_threshold: usize,
    pub rss_cache_ttl_secs: u64,
    pub feed_urls: Vec<String>,
    pub price_cache_ttl_secs: i64,

    // Cache TTLs per research type (seconds)
    pub cache_ttl_complete_secs: i64,
    pub cache_ttl_technical_secs: i64,
    pub cache_ttl_financial_secs: i64,
    pub cache_ttl_web_secs: i64,
    pub cache_dir: String,
    pub cost_per_research: f64,

    // Timeouts (seconds)
    pub feed_timeout_secs: u64,
    pub structured_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub tick_symbol_budget_secs: u64,

    // Orchestration
    pub worker_pool_size: usize,
    pub allow_stale_fallback: bool,
    pub active_models: Vec<String>,

    // Upstream credentials and budgets
    pub alpha_vantage_api_key: String,
    pub alpha_vantage_per_minute: usize,
    pub alpha_vantage_per_day: usize,
    pub finnhub_api_key: String,
    pub finnhub_per_minute: usize,
    pub market_data_base_url: String,
    pub llm_base_url: String,
    pub llm_api_key: String,

    // Persistence
    pub database_url: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()).parse()?)
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ArenaConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let holidays = env::var("MARKET_HOLIDAYS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            .collect();

        Ok(Self {
            starting_capital: env_or("STARTING_CAPITAL", "1000")?,
            trading_fee: env_or("TRADING_FEE", "5")?,
            market_open_hour: env_or("MARKET_OPEN_HOUR", "9")?,
            market_close_hour: env_or("MARKET_CLOSE_HOUR", "17")?,
            market_close_minute: env_or("MARKET_CLOSE_MINUTE", "30")?,
            timezone: env::var("TIMEZONE").unwrap_or_else(|_| "Europe/Berlin".to_string()),
            holidays,

            research_stock_limit: env_or("RESEARCH_STOCK_LIMIT", "10")?,
            momentum_lookback_hours: env_or("MOMENTUM_LOOKBACK_HOURS", "24")?,
            min_news_threshold: env_or("MIN_NEWS_THRESHOLD", "3")?,
            rss_cache_ttl_secs: env_or("RSS_CACHE_TTL", "3600")?,
            feed_urls: env_list("FEED_URLS", ""),
            price_cache_ttl_secs: env_or("PRICE_CACHE_TTL", "300")?,

            cache_ttl_complete_secs: env_or("CACHE_TTL_COMPLETE", "7200")?,
            cache_ttl_technical_secs: env_or("CACHE_TTL_TECHNICAL", "3600")?,
            cache_ttl_financial_secs: env_or("CACHE_TTL_FINANCIAL", "14400")?,
            cache_ttl_web_secs: env_or("CACHE_TTL_WEB", "7200")?,
            cache_dir: env::var("RESEARCH_CACHE_DIR").unwrap_or_else(|_| "research_cache".to_string()),
            cost_per_research: env_or("COST_PER_RESEARCH", "0.05")?,

            feed_timeout_secs: env_or("FEED_TIMEOUT", "15")?,
            structured_timeout_secs: env_or("STRUCTURED_TIMEOUT", "30")?,
            llm_timeout_secs: env_or("LLM_TIMEOUT", "60")?,
            tick_symbol_budget_secs: env_or("TICK_SYMBOL_BUDGET", "180")?,

            worker_pool_size: env_or("RESEARCH_WORKERS", "4")?,
            allow_stale_fallback: env_or("ALLOW_STALE_FALLBACK", "false")?,
            active_models: env_list("ACTIVE_MODELS", ""),

            alpha_vantage_api_key: env::var("ALPHA_VANTAGE_API_KEY").unwrap_or_default(),
            alpha_vantage_per_minute: env_or("ALPHA_VANTAGE_PER_MINUTE", "5")?,
            alpha_vantage_per_day: env_or("ALPHA_VANTAGE_PER_DAY", "25")?,
            finnhub_api_key: env::var("FINNHUB_API_KEY").unwrap_or_default(),
            finnhub_per_minute: env_or("FINNHUB_PER_MINUTE", "60")?,
            market_data_base_url: env::var("MARKET_DATA_BASE_URL")
                .unwrap_or_else(|_| "https://query1.finance.yahoo.com".to_string()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),

            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:arena.db".to_string()),
        })
    }

    /// Cache TTL in seconds for a research type key.
    pub fn cache_ttl_secs(&self, research_type: &str) -> i64 {
        match research_type {
            "technical" => self.cache_ttl_technical_secs,
            "financial" => self.cache_ttl_financial_secs,
            "web" => self.cache_ttl_web_secs,
            _ => self.cache_ttl_complete_secs,
        }
    }
}

impl Default for ArenaConfig {
    /// Built-in defaults, independent of the environment. Used by tests.
    fn default() -> Self {
        Self {
            starting_capital: Decimal::new(1000, 0),
            trading_fee: Decimal::new(5, 0),
            market_open_hour: 9,
            market_close_hour: 17,
            market_close_minute: 30,
            timezone: "Europe/Berlin".to_string(),
            holidays: Vec::new(),
            research_stock_limit: 10,
            momentum_lookback_hours: 24,
            min_news_threshold: 3,
            rss_cache_ttl_secs: 3600,
            feed_urls: Vec::new(),
            price_cache_ttl_secs: 300,
            cache_ttl_complete_secs: 7200,
            cache_ttl_technical_secs: 3600,
            cache_ttl_financial_secs: 14400,
            cache_ttl_web_secs: 7200,
            cache_dir: "research_cache".to_string(),
            cost_per_research: 0.05,
            feed_timeout_secs: 15,
            structured_timeout_secs: 30,
            llm_timeout_secs: 60,
            tick_symbol_budget_secs: 180,
            worker_pool_size: 4,
            allow_stale_fallback: false,
            active_models: Vec::new(),
            alpha_vantage_api_key: String::new(),
            alpha_vantage_per_minute: 5,
            alpha_vantage_per_day: 25,
            finnhub_api_key: String::new(),
            finnhub_per_minute: 60,
            market_data_base_url: String::new(),
            llm_base_url: String::new(),
            llm_api_key: String::new(),
            database_url: "sqlite::memory:".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_contract() {
        let config = ArenaConfig::default();
        assert_eq!(config.starting_capital, dec!(1000));
        assert_eq!(config.trading_fee, dec!(5));
        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.research_stock_limit, 10);
        assert_eq!(config.cache_ttl_secs("complete"), 7200);
        assert_eq!(config.cache_ttl_secs("technical"), 3600);
        assert_eq!(config.cache_ttl_secs("financial"), 14400);
        assert_eq!(config.cache_ttl_secs("web"), 7200);
        assert!(!config.allow_stale_fallback);
    }
}
