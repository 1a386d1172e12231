/// Keyword-based headline sentiment. Deliberately coarse: it feeds the
/// briefing's news breakdown, not any trading decision directly.
const POSITIVE_KEYWORDS: &[&str] = &[
    "surges", "rally", "gains", "profit", "growth", "beats", "exceeds", "strong",
    "bullish", "upgrade", "optimistic", "record", "soars", "raises guidance",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "falls", "plunges", "losses", "decline", "weak", "misses", "cuts", "drops",
    "bearish", "downgrade", "pessimistic", "warning", "crashes", "profit warning",
    "recall", "probe", "lawsuit",
];

/// Score in [-1, 1] from keyword hits.
pub fn score_text(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let positive: i32 = POSITIVE_KEYWORDS.iter().map(|kw| lower.matches(kw).count() as i32).sum();
    let negative: i32 = NEGATIVE_KEYWORDS.iter().map(|kw| lower.matches(kw).count() as i32).sum();
    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    ((positive - negative) as f64 / total as f64).clamp(-1.0, 1.0)
}

/// Label attached to a news item.
pub fn label_text(text: &str) -> &'static str {
    let score = score_text(text);
    if score > 0.2 {
        "positive"
    } else if score < -0.2 {
        "negative"
    } else {
        "neutral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_headline() {
        assert_eq!(label_text("SAP surges on strong cloud growth, beats estimates"), "positive");
    }

    #[test]
    fn negative_headline() {
        assert_eq!(label_text("Bayer plunges after profit warning and lawsuit risk"), "negative");
    }

    #[test]
    fn neutral_headline() {
        assert_eq!(label_text("Siemens to hold annual general meeting in February"), "neutral");
    }
}
