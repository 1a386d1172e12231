/// Trading-model to research-model pairing. Synthesis runs on the
/// cheaper family sibling; the contract is identical either way, this is
/// purely a cost lever. Unknown trading models research as themselves.
const RESEARCH_PAIRS: &[(&str, &str)] = &[
    ("gpt-5", "gpt-5-mini"),
    ("gpt-4.1", "gpt-4.1-mini"),
    ("gpt-4o", "gpt-4o-mini"),
    ("o3", "o4-mini"),
    ("claude-opus", "claude-3-5-haiku"),
    ("claude-sonnet", "claude-3-5-haiku"),
    ("claude-3-7-sonnet", "claude-3-5-haiku"),
    ("gemini-2.5-pro", "gemini-2.5-flash"),
    ("gemini-1.5-pro", "gemini-1.5-flash"),
    ("mistral-large", "mistral-small"),
    ("deepseek-reasoner", "deepseek-chat"),
];

/// Longest matching prefix wins, so `gpt-4.1` does not shadow `gpt-4.1-mini`
/// callers picking an already-cheap model.
pub fn research_model_for(trading_model: &str) -> String {
    RESEARCH_PAIRS
        .iter()
        .filter(|(prefix, _)| trading_model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, research)| research.to_string())
        .unwrap_or_else(|| trading_model.to_string())
}
