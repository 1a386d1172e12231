use trading_engine::{Portfolio, Position};

/// System prompt for the per-agent trading decision.
pub fn decision_system_prompt() -> &'static str {
    "You are an autonomous equity trader competing in a paper-trading arena on the \
     DAX-40 universe. You receive research briefings and your current portfolio, and \
     you respond with ONE trading decision.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"action\": \"BUY\"|\"SELL\"|\"HOLD\",\n\
      \"symbol\": \"XXXX.DE\" (required for BUY/SELL),\n\
      \"quantity\": <positive integer, whole shares, required for BUY/SELL>,\n\
      \"reasoning\": \"<your reasoning>\",\n\
      \"confidence\": \"HIGH\"|\"MEDIUM\"|\"LOW\",\n\
      \"market_outlook\": \"<optional>\",\n\
      \"risk_assessment\": \"<optional>\",\n\
      \"uncertainty_acknowledged\": <optional bool>,\n\
      \"data_freshness\": \"<optional>\",\n\
      \"source_reliability\": \"<optional>\"}\n\n\
     Rules: market orders only, a flat fee applies per trade, no short selling, no \
     margin. BUY only what your cash covers including the fee; SELL only shares you \
     hold. When the research is rejected, contradictory or stale, HOLD is a sound \
     decision."
}

/// Portfolio context block embedded in the decision prompt.
pub fn portfolio_context(portfolio: &Portfolio, positions: &[Position]) -> String {
    let mut out = format!(
        "Cash: EUR {}\nTotal value: EUR {}\nRealized P&L: EUR {}\nTotal P&L: EUR {} ({}%)\n",
        portfolio.cash_balance,
        portfolio.total_value,
        portfolio.realized_pl,
        portfolio.total_pl,
        portfolio.total_pl_percentage,
    );
    if positions.is_empty() {
        out.push_str("Open positions: none\n");
    } else {
        out.push_str("Open positions:\n");
        for position in positions {
            out.push_str(&format!(
                "- {} x{} @ EUR {} (now EUR {}, unrealized {} / {}%)\n",
                position.symbol,
                position.quantity,
                position.avg_price,
                position.current_price,
                position.unrealized_pl,
                position.unrealized_pl_percentage,
            ));
        }
    }
    out
}
