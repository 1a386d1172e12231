use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ConfidenceLevel;

/// Cache-key dimension: what kind of research a briefing carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchType {
    Complete,
    Technical,
    Financial,
    Web,
}

impl ResearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchType::Complete => "complete",
            ResearchType::Technical => "technical",
            ResearchType::Financial => "financial",
            ResearchType::Web => "web",
        }
    }
}

/// QA verdict on a briefing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Use,
    Reject,
}

/// One briefing section: either synthesized content or an explicit gap.
///
/// The `Gap` variant serializes as `{"gap": "<reason>"}` and must stay
/// first so deserialization prefers it over the catch-all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Section {
    Gap { gap: String },
    Filled(Value),
}

impl Section {
    pub fn gap(reason: &str) -> Self {
        Section::Gap {
            gap: reason.to_string(),
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, Section::Gap { .. })
    }

    /// A section counts as populated when it is filled with non-empty content.
    pub fn is_populated(&self) -> bool {
        match self {
            Section::Gap { .. } => false,
            Section::Filled(value) => match value {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
                _ => true,
            },
        }
    }
}

/// The ten required section keys, in presentation order. This list is the
/// wire contract: every stored briefing has exactly these top-level keys
/// plus `meta`.
pub const SECTION_KEYS: [&str; 10] = [
    "recent_events",
    "sentiment_analysis",
    "risk_factors",
    "technical_analysis",
    "fundamental_metrics",
    "opportunities",
    "contextual_information",
    "uncertainty_quantification",
    "source_quality_assessment",
    "key_takeaways",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefingMeta {
    pub symbol: String,
    pub research_type: ResearchType,
    pub model_used: String,
    pub quality_score: f64,
    pub recommendation: Recommendation,
    pub confidence: ConfidenceLevel,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The structured research artifact consumed by agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub recent_events: Section,
    pub sentiment_analysis: Section,
    pub risk_factors: Section,
    pub technical_analysis: Section,
    pub fundamental_metrics: Section,
    pub opportunities: Section,
    pub contextual_information: Section,
    pub uncertainty_quantification: Section,
    pub source_quality_assessment: Section,
    pub key_takeaways: Section,
    pub meta: BriefingMeta,
}

impl Briefing {
    /// Degraded briefing: every section is the same explicit gap, overall
    /// confidence LOW. Still well-formed per the template.
    pub fn degraded(symbol: &str, research_type: ResearchType, model_used: &str, reason: &str) -> Self {
        let meta = BriefingMeta {
            symbol: symbol.to_string(),
            research_type,
            model_used: model_used.to_string(),
            quality_score: 0.0,
            recommendation: Recommendation::Reject,
            confidence: ConfidenceLevel::Low,
            generated_at: Utc::now(),
            expires_at: Utc::now(),
        };
        Self {
            recent_events: Section::gap(reason),
            sentiment_analysis: Section::gap(reason),
            risk_factors: Section::gap(reason),
            technical_analysis: Section::gap(reason),
            fundamental_metrics: Section::gap(reason),
            opportunities: Section::gap(reason),
            contextual_information: Section::gap(reason),
            uncertainty_quantification: Section::gap(reason),
            source_quality_assessment: Section::gap(reason),
            key_takeaways: Section::gap(reason),
            meta,
        }
    }

    /// Sections paired with their wire keys, in contract order.
    pub fn sections(&self) -> [(&'static str, &Section); 10] {
        [
            ("recent_events", &self.recent_events),
            ("sentiment_analysis", &self.sentiment_analysis),
            ("risk_factors", &self.risk_factors),
            ("technical_analysis", &self.technical_analysis),
            ("fundamental_metrics", &self.fundamental_metrics),
            ("opportunities", &self.opportunities),
            ("contextual_information", &self.contextual_information),
            ("uncertainty_quantification", &self.uncertainty_quantification),
            ("source_quality_assessment", &self.source_quality_assessment),
            ("key_takeaways", &self.key_takeaways),
        ]
    }

    /// Formatted-for-LLM rendering used by the decision prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Research briefing for {} (quality {:.0}/100, recommendation {:?}, confidence {:?})\n\n",
            self.meta.symbol, self.meta.quality_score, self.meta.recommendation, self.meta.confidence
        ));
        for (key, section) in self.sections() {
            let title = key.replace('_', " ");
            match section {
                Section::Gap { gap } => {
                    out.push_str(&format!("## {title}\n[data gap: {gap}]\n\n"));
                }
                Section::Filled(value) => {
                    let body = serde_json::to_string_pretty(value).unwrap_or_default();
                    out.push_str(&format!("## {title}\n{body}\n\n"));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_gap_wire_format() {
        let gap = Section::gap("no data");
        let json = serde_json::to_string(&gap).unwrap();
        assert_eq!(json, r#"{"gap":"no data"}"#);

        let parsed: Section = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_gap());
    }

    #[test]
    fn populated_rules() {
        assert!(!Section::Filled(Value::Null).is_populated());
        assert!(!Section::Filled(Value::String("  ".into())).is_populated());
        assert!(!Section::Filled(serde_json::json!([])).is_populated());
        assert!(Section::Filled(serde_json::json!({"k": 1})).is_populated());
        assert!(!Section::gap("x").is_populated());
    }

    #[test]
    fn degraded_briefing_is_well_formed() {
        let briefing = Briefing::degraded("SAP.DE", ResearchType::Complete, "test-model", "llm timeout");
        let json = serde_json::to_value(&briefing).unwrap();
        for key in SECTION_KEYS {
            assert!(json.get(key).is_some(), "missing section {key}");
            assert!(json[key].get("gap").is_some(), "section {key} not a gap");
        }
        assert_eq!(json["meta"]["recommendation"], "REJECT");
        assert_eq!(json["meta"]["confidence"], "LOW");
    }

    #[test]
    fn briefing_round_trip_preserves_structure() {
        let mut briefing = Briefing::degraded("BMW.DE", ResearchType::Complete, "m", "gap");
        briefing.key_takeaways = Section::Filled(serde_json::json!([
            {"takeaway": "watch earnings", "actionable": true}
        ]));
        let bytes = serde_json::to_string(&briefing).unwrap();
        let back: Briefing = serde_json::from_str(&bytes).unwrap();
        assert_eq!(briefing, back);
    }

    #[test]
    fn unknown_wire_fields_are_ignored() {
        let briefing = Briefing::degraded("SAP.DE", ResearchType::Web, "m", "gap");
        let mut json = serde_json::to_value(&briefing).unwrap();
        json["future_extension"] = serde_json::json!({"v": 2});
        let back: Briefing = serde_json::from_value(json).unwrap();
        assert_eq!(back.meta.symbol, "SAP.DE");
    }
}
