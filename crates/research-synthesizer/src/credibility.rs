/// Source credibility tier. Assigned from a static allow-list; claims
/// from LOW sources are retained but may not be the sole basis of a
/// briefing section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredibilityTier {
    High,
    Medium,
    Low,
}

impl CredibilityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredibilityTier::High => "HIGH",
            CredibilityTier::Medium => "MEDIUM",
            CredibilityTier::Low => "LOW",
        }
    }
}

/// Established newswires and regulator channels.
const HIGH_CREDIBILITY: &[&str] = &[
    "reuters",
    "bloomberg",
    "dpa",
    "dpa-afx",
    "afp",
    "associated press",
    "bundesanzeiger",
    "bafin",
    "sec.gov",
    "ad-hoc",
];

/// Broad finance publishers.
const MEDIUM_CREDIBILITY: &[&str] = &[
    "handelsblatt",
    "faz",
    "wirtschaftswoche",
    "manager magazin",
    "boerse-online",
    "financial times",
    "wall street journal",
    "cnbc",
    "marketwatch",
    "yahoo finance",
    "finanzen.net",
];

/// Tier a source name or URL against the allow-list.
pub fn assess(source: &str) -> CredibilityTier {
    let lower = source.to_lowercase();
    if HIGH_CREDIBILITY.iter().any(|s| lower.contains(s)) {
        CredibilityTier::High
    } else if MEDIUM_CREDIBILITY.iter().any(|s| lower.contains(s)) {
        CredibilityTier::Medium
    } else {
        CredibilityTier::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newswires_are_high() {
        assert_eq!(assess("Reuters"), CredibilityTier::High);
        assert_eq!(assess("https://www.bloomberg.com/news/x"), CredibilityTier::High);
        assert_eq!(assess("dpa-AFX"), CredibilityTier::High);
    }

    #[test]
    fn finance_publishers_are_medium() {
        assert_eq!(assess("Handelsblatt"), CredibilityTier::Medium);
        assert_eq!(assess("MarketWatch"), CredibilityTier::Medium);
    }

    #[test]
    fn unknown_sources_are_low() {
        assert_eq!(assess("stocks4u.blog"), CredibilityTier::Low);
        assert_eq!(assess(""), CredibilityTier::Low);
    }
}
