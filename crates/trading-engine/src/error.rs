use rust_decimal::Decimal;
use thiserror::Error;

/// Typed failures of the trading engine. Validation failures are part of
/// the normal contract and surface to the decision loop; database errors
/// abort the transaction and roll everything back.
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("market closed")]
    MarketClosed,

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("no position in {0}")]
    NoPosition(String),

    #[error("insufficient shares: have {held}, tried to sell {requested}")]
    InsufficientShares { held: i64, requested: i64 },

    #[error("no current price for {0}")]
    PriceUnavailable(String),

    #[error("unknown model: {0}")]
    UnknownModel(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TradeError {
    /// Validation failures are expected and recorded; everything else is
    /// an operational fault.
    pub fn is_validation(&self) -> bool {
        !matches!(self, TradeError::Database(_))
    }
}
