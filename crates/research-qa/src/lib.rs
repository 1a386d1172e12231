use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use arena_core::{ArenaConfig, Briefing, ConfidenceLevel, Recommendation};
use llm_gateway::{chat_with_retry, ChatMessage, ChatOptions, LlmGateway};

const RETRY_ATTEMPTS: u32 = 3;
const QUALITY_PASS_THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContradictionKind {
    Factual,
    Sentiment,
    Data,
    Uncertainty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Confidence penalty contributed by one contradiction.
    fn confidence_penalty(&self) -> f64 {
        match self {
            Severity::High => 40.0,
            Severity::Medium => 20.0,
            Severity::Low => 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    #[serde(rename = "type")]
    pub kind: ContradictionKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Sub-scores of the LLM self-review, each in [0, 25].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReviewScores {
    pub accuracy: f64,
    pub completeness: f64,
    pub objectivity: f64,
    pub usefulness: f64,
}

impl ReviewScores {
    fn clamped(self) -> Self {
        let clamp = |v: f64| v.clamp(0.0, 25.0);
        Self {
            accuracy: clamp(self.accuracy),
            completeness: clamp(self.completeness),
            objectivity: clamp(self.objectivity),
            usefulness: clamp(self.usefulness),
        }
    }

    pub fn total(&self) -> f64 {
        self.accuracy + self.completeness + self.objectivity + self.usefulness
    }
}

#[derive(Debug, Clone)]
pub struct QaResult {
    pub template_ok: bool,
    /// Percent of required sections populated (a gap is conforming but
    /// not populated).
    pub template_completeness: f64,
    pub quality_score: f64,
    pub quality_pass: bool,
    pub review_scores: Option<ReviewScores>,
    pub contradictions: Vec<Contradiction>,
    /// Set when any HIGH-severity contradiction was found.
    pub manual_review: bool,
    pub overall_score: f64,
    pub recommendation: Recommendation,
    pub confidence: ConfidenceLevel,
}

/// Three-stage quality gate: local template validation, LLM self-review,
/// LLM contradiction detection. Never retried beyond the transport-level
/// backoff; a failed LLM stage scores zero / reports nothing.
pub struct QaEngine {
    gateway: Arc<dyn LlmGateway>,
    llm_timeout: Duration,
}

impl QaEngine {
    pub fn new(gateway: Arc<dyn LlmGateway>, config: &ArenaConfig) -> Self {
        Self {
            gateway,
            llm_timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    fn options(&self) -> ChatOptions {
        ChatOptions {
            temperature: Some(0.0),
            max_tokens: Some(1024),
            timeout: Some(self.llm_timeout),
        }
    }

    /// Stage 1, local: every section present and either populated or an
    /// explicit gap; completeness is the populated share.
    pub fn validate_template(briefing: &Briefing) -> (bool, f64) {
        let sections = briefing.sections();
        let conforming = sections.iter().all(|(_, s)| s.is_gap() || s.is_populated());
        let populated = sections.iter().filter(|(_, s)| s.is_populated()).count();
        let completeness = populated as f64 / sections.len() as f64 * 100.0;
        (conforming, completeness)
    }

    /// Stage 2: sub-scores in {accuracy, completeness, objectivity,
    /// usefulness}, each 0-25. `None` when the reviewer model fails.
    pub async fn self_review(&self, briefing: &Briefing, review_model: &str) -> Option<ReviewScores> {
        let system = "You are a research quality reviewer. Score the briefing you are given \
             on four dimensions, each an integer from 0 to 25: accuracy, completeness, \
             objectivity, usefulness. Respond with ONLY a JSON object of the form \
             {\"accuracy\": n, \"completeness\": n, \"objectivity\": n, \"usefulness\": n}.";
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(briefing.to_prompt_text()),
        ];

        let response = chat_with_retry(
            self.gateway.as_ref(),
            review_model,
            &messages,
            &self.options(),
            RETRY_ATTEMPTS,
        )
        .await;

        let content = match response {
            Ok(r) => r.content,
            Err(e) => {
                tracing::warn!(symbol = %briefing.meta.symbol, error = %e, "self-review failed");
                return None;
            }
        };

        let json = llm_gateway::extract_json(&content).ok()?;
        serde_json::from_str::<ReviewScores>(&json)
            .ok()
            .map(ReviewScores::clamped)
    }

    /// Stage 3: typed contradictions. An unusable reply reports none.
    pub async fn detect_contradictions(
        &self,
        briefing: &Briefing,
        review_model: &str,
    ) -> Vec<Contradiction> {
        let system = "You detect contradictions inside an equity research briefing. \
             Compare claims across sections and across cited sources. Respond with ONLY a \
             JSON object {\"contradictions\": [{\"type\": \"FACTUAL\"|\"SENTIMENT\"|\"DATA\"|\"UNCERTAINTY\", \
             \"severity\": \"LOW\"|\"MEDIUM\"|\"HIGH\", \"description\": \"...\", \
             \"sources\": [\"...\"]}]}. An empty list is a valid answer.";
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(briefing.to_prompt_text()),
        ];

        let response = chat_with_retry(
            self.gateway.as_ref(),
            review_model,
            &messages,
            &self.options(),
            RETRY_ATTEMPTS,
        )
        .await;

        let content = match response {
            Ok(r) => r.content,
            Err(e) => {
                tracing::warn!(symbol = %briefing.meta.symbol, error = %e, "contradiction detection failed");
                return Vec::new();
            }
        };

        llm_gateway::extract_json(&content)
            .ok()
            .and_then(|json| serde_json::from_str::<Value>(&json).ok())
            .and_then(|value| {
                let list = value.get("contradictions")?.as_array()?.clone();
                Some(
                    list.into_iter()
                        .filter_map(|c| serde_json::from_value::<Contradiction>(c).ok())
                        .collect(),
                )
            })
            .unwrap_or_default()
    }

    /// Full gate. `overall = 0.2 * completeness + 0.5 * quality +
    /// 0.3 * (100 - penalty)`; USE requires a conforming template, a
    /// passing review, and no HIGH-severity contradiction.
    pub async fn assess(&self, briefing: &Briefing, review_model: &str) -> QaResult {
        let (template_ok, template_completeness) = Self::validate_template(briefing);

        let review_scores = self.self_review(briefing, review_model).await;
        let quality_score = review_scores.map(|s| s.total()).unwrap_or(0.0);
        let quality_pass = quality_score >= QUALITY_PASS_THRESHOLD;

        let contradictions = self.detect_contradictions(briefing, review_model).await;
        let penalty: f64 = contradictions
            .iter()
            .map(|c| c.severity.confidence_penalty())
            .sum::<f64>()
            .min(100.0);
        let has_high = contradictions.iter().any(|c| c.severity == Severity::High);
        let has_medium_or_high = has_high
            || contradictions.iter().any(|c| c.severity == Severity::Medium);

        let overall_score =
            0.2 * template_completeness + 0.5 * quality_score + 0.3 * (100.0 - penalty);

        let recommendation = if template_ok && quality_pass && !has_high {
            Recommendation::Use
        } else {
            Recommendation::Reject
        };

        let confidence = if overall_score >= 80.0 && !has_medium_or_high {
            ConfidenceLevel::High
        } else if overall_score >= 60.0 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };

        QaResult {
            template_ok,
            template_completeness,
            quality_score,
            quality_pass,
            review_scores,
            contradictions,
            manual_review: has_high,
            overall_score,
            recommendation,
            confidence,
        }
    }
}
