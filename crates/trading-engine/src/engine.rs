use dashmap::DashMap;
use rust_decimal::Decimal;
use sqlx::Sqlite;
use std::sync::Arc;
use tokio::sync::Mutex;

use arena_core::{ArenaConfig, Clock, ModelDescriptor, Symbol, SystemClock, TradeSide};
use market_data::MarketDataProvider;

use crate::error::TradeError;
use crate::models::*;
use crate::store::ArenaStore;

/// Sole mutator of portfolio, position and trade state.
///
/// Every execution runs under the owning model's lock and inside one
/// SQLite transaction: cash change, position change and trade append
/// commit together or not at all. Different models trade in parallel.
pub struct TradingEngine {
    store: ArenaStore,
    market: Arc<MarketDataProvider>,
    clock: Arc<dyn Clock>,
    fee: Decimal,
    default_starting_balance: Decimal,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl TradingEngine {
    pub fn new(store: ArenaStore, market: Arc<MarketDataProvider>, config: &ArenaConfig) -> Self {
        Self {
            store,
            market,
            clock: Arc::new(SystemClock),
            fee: config.trading_fee,
            default_starting_balance: config.starting_capital,
            locks: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &ArenaStore {
        &self.store
    }

    fn model_lock(&self, model_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(model_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create the model row once; repeated calls return the existing
    /// descriptor. The portfolio is initialized alongside.
    pub async fn register_model(
        &self,
        display_name: &str,
        api_identifier: &str,
    ) -> Result<ModelDescriptor, TradeError> {
        sqlx::query(
            "INSERT INTO models (display_name, api_identifier, starting_balance)
             VALUES (?, ?, ?) ON CONFLICT(api_identifier) DO NOTHING",
        )
        .bind(display_name)
        .bind(api_identifier)
        .bind(to_db(self.default_starting_balance))
        .execute(self.store.pool())
        .await?;

        let (id, display_name, api_identifier, starting_balance): (i64, String, String, f64) =
            sqlx::query_as(
                "SELECT id, display_name, api_identifier, starting_balance
                 FROM models WHERE api_identifier = ?",
            )
            .bind(api_identifier)
            .fetch_one(self.store.pool())
            .await?;

        self.initialize(id).await?;

        Ok(ModelDescriptor {
            id,
            display_name,
            api_identifier,
            starting_balance: money(starting_balance),
        })
    }

    /// Idempotent portfolio creation with `cash = starting_balance`.
    pub async fn initialize(&self, model_id: i64) -> Result<Portfolio, TradeError> {
        let starting = self.starting_balance(model_id).await?;
        sqlx::query(
            "INSERT INTO portfolios (model_id, cash_balance, total_value)
             VALUES (?, ?, ?) ON CONFLICT(model_id) DO NOTHING",
        )
        .bind(model_id)
        .bind(to_db(starting))
        .bind(to_db(starting))
        .execute(self.store.pool())
        .await?;

        self.get_portfolio(model_id).await
    }

    async fn starting_balance(&self, model_id: i64) -> Result<Decimal, TradeError> {
        let row: Option<(f64,)> = sqlx::query_as("SELECT starting_balance FROM models WHERE id = ?")
            .bind(model_id)
            .fetch_optional(self.store.pool())
            .await?;
        row.map(|(v,)| money(v)).ok_or(TradeError::UnknownModel(model_id))
    }

    /// Shared pre-trade validation: market hours, symbol, quantity.
    fn validate_order(&self, symbol_raw: &str, quantity: i64) -> Result<Symbol, TradeError> {
        if !self.market.is_market_open(self.clock.now()) {
            return Err(TradeError::MarketClosed);
        }
        let symbol = Symbol::parse(symbol_raw)
            .map_err(|_| TradeError::UnknownSymbol(symbol_raw.to_string()))?;
        if quantity <= 0 {
            return Err(TradeError::InvalidQuantity(quantity));
        }
        Ok(symbol)
    }

    async fn execution_price(&self, symbol: &Symbol) -> Result<Decimal, TradeError> {
        self.market
            .current_price(symbol)
            .await
            .ok()
            .flatten()
            .map(money)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| TradeError::PriceUnavailable(symbol.to_string()))
    }

    pub async fn execute_buy(
        &self,
        model_id: i64,
        symbol_raw: &str,
        quantity: i64,
    ) -> Result<ExecResult, TradeError> {
        let lock = self.model_lock(model_id);
        let _guard = lock.lock().await;

        let symbol = self.validate_order(symbol_raw, quantity)?;
        let price = self.execution_price(&symbol).await?;
        let starting = self.starting_balance(model_id).await?;
        let now = self.clock.now().to_rfc3339();

        let gross = price * Decimal::from(quantity);
        let total = money_exact(gross + self.fee);

        let mut tx = self.store.pool().begin().await?;

        let portfolio: PortfolioRow =
            sqlx::query_as("SELECT model_id, cash_balance, total_value, realized_pl, total_pl, total_pl_percentage FROM portfolios WHERE model_id = ?")
                .bind(model_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(TradeError::UnknownModel(model_id))?;

        let cash = money(portfolio.cash_balance);
        if cash < total {
            return Err(TradeError::InsufficientFunds {
                needed: total,
                available: cash,
            });
        }
        let new_cash = cash - total;

        let existing: Option<PositionRow> = sqlx::query_as(
            "SELECT model_id, symbol, quantity, avg_price, current_price, unrealized_pl, unrealized_pl_percentage, opened_at, updated_at
             FROM positions WHERE model_id = ? AND symbol = ?",
        )
        .bind(model_id)
        .bind(symbol.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(position) => {
                let old_qty = Decimal::from(position.quantity);
                let new_qty = position.quantity + quantity;
                let avg = ((money(position.avg_price) * old_qty) + gross)
                    / Decimal::from(new_qty);
                let avg = avg.round_dp(2);
                let unrealized = ((price - avg) * Decimal::from(new_qty)).round_dp(2);
                let unrealized_pct = pl_percentage(unrealized, avg, new_qty);
                sqlx::query(
                    "UPDATE positions SET quantity = ?, avg_price = ?, current_price = ?,
                     unrealized_pl = ?, unrealized_pl_percentage = ?, updated_at = ?
                     WHERE model_id = ? AND symbol = ?",
                )
                .bind(new_qty)
                .bind(to_db(avg))
                .bind(to_db(price))
                .bind(to_db(unrealized))
                .bind(to_db(unrealized_pct))
                .bind(&now)
                .bind(model_id)
                .bind(symbol.as_str())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO positions (model_id, symbol, quantity, avg_price, current_price,
                     unrealized_pl, unrealized_pl_percentage, opened_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)",
                )
                .bind(model_id)
                .bind(symbol.as_str())
                .bind(quantity)
                .bind(to_db(price))
                .bind(to_db(price))
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }

        let trade_id = self
            .append_trade(&mut tx, model_id, &symbol, TradeSide::Buy, quantity, price, total, None, &now)
            .await?;

        self.refresh_portfolio_totals(&mut tx, model_id, new_cash, money(portfolio.realized_pl), starting, &now)
            .await?;

        tx.commit().await?;

        self.exec_result(model_id, trade_id).await
    }

    pub async fn execute_sell(
        &self,
        model_id: i64,
        symbol_raw: &str,
        quantity: i64,
    ) -> Result<ExecResult, TradeError> {
        let lock = self.model_lock(model_id);
        let _guard = lock.lock().await;

        let symbol = self.validate_order(symbol_raw, quantity)?;
        let price = self.execution_price(&symbol).await?;
        let starting = self.starting_balance(model_id).await?;
        let now = self.clock.now().to_rfc3339();

        let mut tx = self.store.pool().begin().await?;

        let portfolio: PortfolioRow =
            sqlx::query_as("SELECT model_id, cash_balance, total_value, realized_pl, total_pl, total_pl_percentage FROM portfolios WHERE model_id = ?")
                .bind(model_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(TradeError::UnknownModel(model_id))?;

        let position: PositionRow = sqlx::query_as(
            "SELECT model_id, symbol, quantity, avg_price, current_price, unrealized_pl, unrealized_pl_percentage, opened_at, updated_at
             FROM positions WHERE model_id = ? AND symbol = ?",
        )
        .bind(model_id)
        .bind(symbol.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| TradeError::NoPosition(symbol.to_string()))?;

        if position.quantity < quantity {
            return Err(TradeError::InsufficientShares {
                held: position.quantity,
                requested: quantity,
            });
        }

        let avg = money(position.avg_price);
        let gross = price * Decimal::from(quantity);
        let proceeds = money_exact(gross - self.fee);
        let realized = money_exact((price - avg) * Decimal::from(quantity) - self.fee);
        let new_cash = money(portfolio.cash_balance) + proceeds;
        let new_realized_total = money(portfolio.realized_pl) + realized;

        let remaining = position.quantity - quantity;
        if remaining == 0 {
            sqlx::query("DELETE FROM positions WHERE model_id = ? AND symbol = ?")
                .bind(model_id)
                .bind(symbol.as_str())
                .execute(&mut *tx)
                .await?;
        } else {
            let unrealized = ((price - avg) * Decimal::from(remaining)).round_dp(2);
            let unrealized_pct = pl_percentage(unrealized, avg, remaining);
            sqlx::query(
                "UPDATE positions SET quantity = ?, current_price = ?, unrealized_pl = ?,
                 unrealized_pl_percentage = ?, updated_at = ?
                 WHERE model_id = ? AND symbol = ?",
            )
            .bind(remaining)
            .bind(to_db(price))
            .bind(to_db(unrealized))
            .bind(to_db(unrealized_pct))
            .bind(&now)
            .bind(model_id)
            .bind(symbol.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let trade_id = self
            .append_trade(
                &mut tx,
                model_id,
                &symbol,
                TradeSide::Sell,
                quantity,
                price,
                proceeds,
                Some(realized),
                &now,
            )
            .await?;

        self.refresh_portfolio_totals(&mut tx, model_id, new_cash, new_realized_total, starting, &now)
            .await?;

        tx.commit().await?;

        self.exec_result(model_id, trade_id).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_trade(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        model_id: i64,
        symbol: &Symbol,
        side: TradeSide,
        quantity: i64,
        price: Decimal,
        total: Decimal,
        realized_pl: Option<Decimal>,
        now: &str,
    ) -> Result<i64, TradeError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO trades (model_id, symbol, side, quantity, price, fee, total, status, realized_pl, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'EXECUTED', ?, ?) RETURNING id",
        )
        .bind(model_id)
        .bind(symbol.as_str())
        .bind(side.as_str())
        .bind(quantity)
        .bind(to_db(price))
        .bind(to_db(self.fee))
        .bind(to_db(total))
        .bind(realized_pl.map(to_db))
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    /// Recompute `total_value`, `total_pl` and its percentage from the
    /// positions visible inside the transaction.
    async fn refresh_portfolio_totals(
        &self,
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        model_id: i64,
        cash: Decimal,
        realized: Decimal,
        starting: Decimal,
        now: &str,
    ) -> Result<(), TradeError> {
        let positions: Vec<(i64, f64)> =
            sqlx::query_as("SELECT quantity, current_price FROM positions WHERE model_id = ?")
                .bind(model_id)
                .fetch_all(&mut **tx)
                .await?;

        let market_value: Decimal = positions
            .iter()
            .map(|(qty, price)| Decimal::from(*qty) * money(*price))
            .sum();
        let total_value = (cash + market_value).round_dp(2);
        let total_pl = (total_value - starting).round_dp(2);
        let total_pl_percentage = if starting > Decimal::ZERO {
            (total_pl / starting * Decimal::from(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };

        sqlx::query(
            "UPDATE portfolios SET cash_balance = ?, total_value = ?, realized_pl = ?,
             total_pl = ?, total_pl_percentage = ?, updated_at = ? WHERE model_id = ?",
        )
        .bind(to_db(cash))
        .bind(to_db(total_value))
        .bind(to_db(realized))
        .bind(to_db(total_pl))
        .bind(to_db(total_pl_percentage))
        .bind(now)
        .bind(model_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn exec_result(&self, model_id: i64, trade_id: i64) -> Result<ExecResult, TradeError> {
        let trade: TradeRow = sqlx::query_as("SELECT id, model_id, symbol, side, quantity, price, fee, total, status, realized_pl, timestamp FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_one(self.store.pool())
            .await?;
        let portfolio = self.get_portfolio(model_id).await?;
        Ok(ExecResult {
            trade: trade.into(),
            portfolio,
        })
    }

    /// Mark every position to the latest price and refresh the totals.
    pub async fn revalue(&self, model_id: i64) -> Result<Portfolio, TradeError> {
        let lock = self.model_lock(model_id);
        let _guard = lock.lock().await;

        let starting = self.starting_balance(model_id).await?;
        let now = self.clock.now().to_rfc3339();
        let positions = self.get_positions(model_id).await?;

        let mut tx = self.store.pool().begin().await?;
        for position in &positions {
            let symbol = match Symbol::parse(&position.symbol) {
                Ok(s) => s,
                Err(_) => continue,
            };
            // A missing fresh price keeps the previous mark
            let price = match self.market.current_price(&symbol).await {
                Ok(Some(p)) => money(p),
                _ => position.current_price,
            };
            let unrealized = ((price - position.avg_price) * Decimal::from(position.quantity)).round_dp(2);
            let unrealized_pct = pl_percentage(unrealized, position.avg_price, position.quantity);
            sqlx::query(
                "UPDATE positions SET current_price = ?, unrealized_pl = ?,
                 unrealized_pl_percentage = ?, updated_at = ? WHERE model_id = ? AND symbol = ?",
            )
            .bind(to_db(price))
            .bind(to_db(unrealized))
            .bind(to_db(unrealized_pct))
            .bind(&now)
            .bind(model_id)
            .bind(&position.symbol)
            .execute(&mut *tx)
            .await?;
        }

        let portfolio: PortfolioRow =
            sqlx::query_as("SELECT model_id, cash_balance, total_value, realized_pl, total_pl, total_pl_percentage FROM portfolios WHERE model_id = ?")
                .bind(model_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(TradeError::UnknownModel(model_id))?;

        self.refresh_portfolio_totals(
            &mut tx,
            model_id,
            money(portfolio.cash_balance),
            money(portfolio.realized_pl),
            starting,
            &now,
        )
        .await?;
        tx.commit().await?;

        self.get_portfolio(model_id).await
    }

    pub async fn get_portfolio(&self, model_id: i64) -> Result<Portfolio, TradeError> {
        let row: PortfolioRow =
            sqlx::query_as("SELECT model_id, cash_balance, total_value, realized_pl, total_pl, total_pl_percentage FROM portfolios WHERE model_id = ?")
                .bind(model_id)
                .fetch_optional(self.store.pool())
                .await?
                .ok_or(TradeError::UnknownModel(model_id))?;
        Ok(row.into())
    }

    pub async fn get_positions(&self, model_id: i64) -> Result<Vec<Position>, TradeError> {
        let rows: Vec<PositionRow> = sqlx::query_as(
            "SELECT model_id, symbol, quantity, avg_price, current_price, unrealized_pl, unrealized_pl_percentage, opened_at, updated_at
             FROM positions WHERE model_id = ? ORDER BY symbol",
        )
        .bind(model_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(Position::from).collect())
    }

    pub async fn get_trades(
        &self,
        model_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Trade>, TradeError> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            "SELECT id, model_id, symbol, side, quantity, price, fee, total, status, realized_pl, timestamp
             FROM trades WHERE model_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(model_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(Trade::from).collect())
    }

    pub async fn metrics(&self, model_id: i64) -> Result<PerformanceMetrics, TradeError> {
        let trades = self.get_trades(model_id, 0, i64::MAX).await?;
        let total_trades = trades.len();
        let winning_trades = trades
            .iter()
            .filter(|t| t.realized_pl.is_some_and(|pl| pl > Decimal::ZERO))
            .count();
        let losing_trades = trades
            .iter()
            .filter(|t| t.realized_pl.is_some_and(|pl| pl < Decimal::ZERO))
            .count();
        let closed = winning_trades + losing_trades;
        let win_rate = if closed > 0 {
            winning_trades as f64 / closed as f64 * 100.0
        } else {
            0.0
        };
        let total_fees_paid: Decimal = trades.iter().map(|t| t.fee).sum();

        let portfolio = self.get_portfolio(model_id).await?;
        let starting = self.starting_balance(model_id).await?;
        let roi_percentage = if starting > Decimal::ZERO {
            to_db((portfolio.total_pl / starting * Decimal::from(100)).round_dp(2))
        } else {
            0.0
        };

        Ok(PerformanceMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_fees_paid,
            roi_percentage,
        })
    }

    /// Append-only audit log of every decision attempt.
    pub async fn append_reasoning(
        &self,
        model_id: i64,
        research_content: &str,
        decision: &str,
        reasoning_text: &str,
        confidence: &str,
        raw_response: &str,
    ) -> Result<i64, TradeError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO reasoning_log (model_id, timestamp, research_content, decision, reasoning_text, confidence, raw_response)
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(model_id)
        .bind(self.clock.now().to_rfc3339())
        .bind(research_content)
        .bind(decision)
        .bind(reasoning_text)
        .bind(confidence)
        .bind(raw_response)
        .fetch_one(self.store.pool())
        .await?;
        Ok(id)
    }

    pub async fn latest_reasoning(
        &self,
        model_id: i64,
        n: i64,
    ) -> Result<Vec<ReasoningRow>, TradeError> {
        let rows: Vec<ReasoningRow> = sqlx::query_as(
            "SELECT id, model_id, timestamp, research_content, decision, reasoning_text, confidence, raw_response
             FROM reasoning_log WHERE model_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(model_id)
        .bind(n)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }
}

/// Keep exact cents; the inputs are already 2dp so sums stay 2dp.
fn money_exact(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn pl_percentage(pl: Decimal, avg_price: Decimal, quantity: i64) -> Decimal {
    let basis = avg_price * Decimal::from(quantity);
    if basis > Decimal::ZERO {
        (pl / basis * Decimal::from(100)).round_dp(2)
    } else {
        Decimal::ZERO
    }
}
