pub mod briefing;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod universe;

pub use briefing::{Briefing, BriefingMeta, Recommendation, ResearchType, Section, SECTION_KEYS};
pub use config::ArenaConfig;
pub use error::ArenaError;
pub use traits::{
    Clock, FeedEntry, FeedSource, MarketDataUpstream, PriceTarget, Quote, StructuredUpstream,
    SystemClock,
};
pub use types::*;
pub use universe::{company_name, is_dax_symbol, DAX_UNIVERSE};
