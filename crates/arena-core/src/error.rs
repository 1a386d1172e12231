use thiserror::Error;

/// Errors raised by the research side of the arena.
///
/// Upstream absence is NOT an error: leaves signal it with `Ok(None)` and
/// the orchestrator turns it into a data gap. These variants cover the
/// conditions that a caller may want to branch on or log.
#[derive(Error, Debug)]
pub enum ArenaError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timeout after {0}s")]
    Timeout(u64),
}
