pub mod aggregator;
pub mod alpha_vantage;
pub mod finnhub;
pub mod rate_limit;

pub use aggregator::StructuredDataAggregator;
pub use alpha_vantage::AlphaVantageClient;
pub use finnhub::FinnhubClient;
pub use rate_limit::{CallBudget, MinInterval};
