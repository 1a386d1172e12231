use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Monetary round-trip through the store's REAL columns: two fractional
/// digits, EUR.
pub fn money(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default().round_dp(2)
}

pub fn to_db(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PortfolioRow {
    pub model_id: i64,
    pub cash_balance: f64,
    pub total_value: f64,
    pub realized_pl: f64,
    pub total_pl: f64,
    pub total_pl_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub model_id: i64,
    pub cash_balance: Decimal,
    pub total_value: Decimal,
    pub realized_pl: Decimal,
    pub total_pl: Decimal,
    pub total_pl_percentage: Decimal,
}

impl From<PortfolioRow> for Portfolio {
    fn from(row: PortfolioRow) -> Self {
        Self {
            model_id: row.model_id,
            cash_balance: money(row.cash_balance),
            total_value: money(row.total_value),
            realized_pl: money(row.realized_pl),
            total_pl: money(row.total_pl),
            total_pl_percentage: money(row.total_pl_percentage),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PositionRow {
    pub model_id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: f64,
    pub current_price: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_percentage: f64,
    pub opened_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub model_id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pl: Decimal,
    pub unrealized_pl_percentage: Decimal,
    pub opened_at: String,
    pub updated_at: String,
}

impl From<PositionRow> for Position {
    fn from(row: PositionRow) -> Self {
        Self {
            model_id: row.model_id,
            symbol: row.symbol,
            quantity: row.quantity,
            avg_price: money(row.avg_price),
            current_price: money(row.current_price),
            unrealized_pl: money(row.unrealized_pl),
            unrealized_pl_percentage: money(row.unrealized_pl_percentage),
            opened_at: row.opened_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub model_id: i64,
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub price: f64,
    pub fee: f64,
    pub total: f64,
    pub status: String,
    pub realized_pl: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub model_id: i64,
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub price: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
    pub status: String,
    pub realized_pl: Option<Decimal>,
    pub timestamp: String,
}

impl From<TradeRow> for Trade {
    fn from(row: TradeRow) -> Self {
        Self {
            id: row.id,
            model_id: row.model_id,
            symbol: row.symbol,
            side: row.side,
            quantity: row.quantity,
            price: money(row.price),
            fee: money(row.fee),
            total: money(row.total),
            status: row.status,
            realized_pl: row.realized_pl.map(money),
            timestamp: row.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReasoningRow {
    pub id: i64,
    pub model_id: i64,
    pub timestamp: String,
    pub research_content: String,
    pub decision: String,
    pub reasoning_text: String,
    pub confidence: String,
    pub raw_response: String,
}

/// Aggregated trading performance for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_fees_paid: Decimal,
    pub roi_percentage: f64,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub trade: Trade,
    pub portfolio: Portfolio,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn money_rounds_to_cents() {
        assert_eq!(money(120.004), dec!(120.00));
        assert_eq!(money(120.006), dec!(120.01));
        assert_eq!(money(f64::NAN), dec!(0));
    }
}
