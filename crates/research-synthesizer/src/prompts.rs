use arena_core::SECTION_KEYS;

/// System prompt for the synthesis step: emit exactly the ten-section
/// JSON object, nothing else.
pub fn synthesis_system_prompt() -> String {
    format!(
        "You are an equity research synthesizer for XETRA-listed German stocks. \
         You receive structured market data, computed technical indicators and a set of \
         news items, each tagged with a source credibility tier (HIGH, MEDIUM, LOW).\n\n\
         Produce a research briefing as a single JSON object with EXACTLY these \
         top-level keys:\n{}\n\n\
         Section requirements:\n\
         - recent_events: categorized events; every entry carries a date and concrete numbers.\n\
         - sentiment_analysis: overall label plus analyst and news breakdowns with counts or percentages.\n\
         - risk_factors: each with severity LOW, MEDIUM or HIGH and a timeframe.\n\
         - technical_analysis: summary of the indicator panel you were given.\n\
         - fundamental_metrics: the reported metrics, never invented ones.\n\
         - opportunities: each with an expected timeline and impact.\n\
         - contextual_information: sector comparison, peers, volatility regime, macro factors.\n\
         - uncertainty_quantification: per-data-point confidence, data freshness ages, \
         explicitly enumerated data gaps, forecast ranges.\n\
         - source_quality_assessment: credibility breakdown of the sources used and any \
         contradictions you noticed between them.\n\
         - key_takeaways: 5 to 7 items, tagged actionable or time-sensitive where relevant.\n\n\
         Rules:\n\
         - A claim supported only by LOW-credibility sources may colour a section but must \
         never be its sole basis; say so explicitly when it happens.\n\
         - If you lack data for a section, set it to {{\"gap\": \"<what is missing>\"}}.\n\
         - Respond with ONLY the JSON object. No markdown fences, no commentary.",
        SECTION_KEYS.join(", ")
    )
}

/// Follow-up system message for the single repair attempt.
pub fn repair_system_prompt() -> &'static str {
    "Your previous reply was not valid JSON. Respond again with ONLY the JSON object, \
     with exactly the required top-level keys and no surrounding text."
}

/// System prompt for query generation.
pub fn query_system_prompt() -> &'static str {
    "You generate targeted research queries for an equity research pipeline. \
     Respond with ONLY a JSON object of the form {\"queries\": [\"...\"]} containing \
     2 to 5 short search queries. Focus on the data gaps you are told about."
}

/// Deterministic fallback queries when query generation fails.
pub fn fallback_queries(symbol: &str, company: Option<&str>) -> Vec<String> {
    let subject = company.unwrap_or(symbol);
    vec![
        format!("{subject} earnings"),
        format!("{subject} risk factors"),
        format!("{subject} analyst outlook"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_prompt_names_every_section() {
        let prompt = synthesis_system_prompt();
        for key in SECTION_KEYS {
            assert!(prompt.contains(key), "prompt missing section {key}");
        }
        assert!(prompt.contains("ONLY the JSON object"));
    }

    #[test]
    fn fallback_queries_use_company_name_when_known() {
        let queries = fallback_queries("SAP.DE", Some("SAP"));
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "SAP earnings");

        let queries = fallback_queries("XXXX.DE", None);
        assert_eq!(queries[1], "XXXX.DE risk factors");
    }
}
