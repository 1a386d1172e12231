use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use arena_core::{
    company_name, ArenaConfig, Briefing, BriefingMeta, ConfidenceLevel, NewsItem, Recommendation,
    ResearchType, Section, StockRecord, Symbol, SECTION_KEYS,
};
use llm_gateway::{chat_with_retry, ChatMessage, ChatOptions, LlmGateway};

pub mod credibility;
pub mod model_map;
pub mod prompts;

pub use credibility::{assess, CredibilityTier};
pub use model_map::research_model_for;

const RETRY_ATTEMPTS: u32 = 3;

/// Everything the synthesizer fuses into one briefing.
pub struct ResearchInputs<'a> {
    pub symbol: &'a Symbol,
    pub record: &'a StockRecord,
    pub news: &'a [NewsItem],
    pub portfolio_context: Option<&'a str>,
}

/// LLM-driven fusion of the collected records into the ten-section
/// briefing. Failures degrade, they never propagate: the caller always
/// receives a template-conforming briefing.
pub struct ResearchSynthesizer {
    gateway: Arc<dyn LlmGateway>,
    llm_timeout: Duration,
}

impl ResearchSynthesizer {
    pub fn new(gateway: Arc<dyn LlmGateway>, config: &ArenaConfig) -> Self {
        Self {
            gateway,
            llm_timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    fn options(&self) -> ChatOptions {
        ChatOptions {
            temperature: Some(0.2),
            max_tokens: Some(4096),
            timeout: Some(self.llm_timeout),
        }
    }

    /// Step (a): 2-5 targeted queries, with a deterministic template
    /// fallback when the model fails or answers garbage.
    pub async fn generate_queries(
        &self,
        symbol: &Symbol,
        data_gaps: &[String],
        portfolio_context: Option<&str>,
        research_model: &str,
    ) -> Vec<String> {
        let user = format!(
            "Symbol: {symbol}\nCompany: {}\nKnown data gaps: {}\nPortfolio context: {}",
            company_name(symbol.as_str()).unwrap_or("unknown"),
            if data_gaps.is_empty() {
                "none".to_string()
            } else {
                data_gaps.join(", ")
            },
            portfolio_context.unwrap_or("none"),
        );
        let messages = [
            ChatMessage::system(prompts::query_system_prompt()),
            ChatMessage::user(user),
        ];

        let response = chat_with_retry(
            self.gateway.as_ref(),
            research_model,
            &messages,
            &self.options(),
            RETRY_ATTEMPTS,
        )
        .await;

        let parsed = response.ok().and_then(|r| {
            let json = llm_gateway::extract_json(&r.content).ok()?;
            let value: Value = serde_json::from_str(&json).ok()?;
            let queries: Vec<String> = value
                .get("queries")?
                .as_array()?
                .iter()
                .filter_map(|q| q.as_str().map(str::to_string))
                .collect();
            (2..=5).contains(&queries.len()).then_some(queries)
        });

        match parsed {
            Some(queries) => queries,
            None => {
                tracing::debug!(symbol = %symbol, "query generation failed, using template queries");
                prompts::fallback_queries(symbol.as_str(), company_name(symbol.as_str()))
            }
        }
    }

    /// Step (b): synthesize the briefing. One repair attempt on invalid
    /// JSON; a second failure yields the degraded all-gaps briefing.
    pub async fn synthesize(
        &self,
        inputs: &ResearchInputs<'_>,
        research_model: &str,
    ) -> Briefing {
        let gaps = data_gaps(inputs.record);
        let queries = self
            .generate_queries(inputs.symbol, &gaps, inputs.portfolio_context, research_model)
            .await;

        let user_prompt = self.build_user_prompt(inputs, &queries);
        let mut messages = vec![
            ChatMessage::system(prompts::synthesis_system_prompt()),
            ChatMessage::user(user_prompt),
        ];

        for attempt in 0..2 {
            let response = chat_with_retry(
                self.gateway.as_ref(),
                research_model,
                &messages,
                &self.options(),
                RETRY_ATTEMPTS,
            )
            .await;

            let content = match response {
                Ok(r) => r.content,
                Err(e) => {
                    tracing::warn!(symbol = %inputs.symbol, error = %e, "synthesis call failed");
                    return Briefing::degraded(
                        inputs.symbol.as_str(),
                        ResearchType::Complete,
                        research_model,
                        &format!("synthesis failed: {e}"),
                    );
                }
            };

            match self.parse_briefing(&content, inputs.symbol, research_model) {
                Ok(briefing) => return briefing,
                Err(reason) if attempt == 0 => {
                    tracing::warn!(symbol = %inputs.symbol, reason, "invalid synthesis output, attempting repair");
                    messages.push(ChatMessage::assistant(content));
                    messages.push(ChatMessage::system(prompts::repair_system_prompt()));
                }
                Err(reason) => {
                    tracing::warn!(symbol = %inputs.symbol, reason, "repair attempt also failed");
                }
            }
        }

        Briefing::degraded(
            inputs.symbol.as_str(),
            ResearchType::Complete,
            research_model,
            "synthesis produced no valid JSON after repair",
        )
    }

    fn build_user_prompt(&self, inputs: &ResearchInputs<'_>, queries: &[String]) -> String {
        let record_json =
            serde_json::to_string_pretty(inputs.record).unwrap_or_else(|_| "{}".to_string());

        let mut news_block = String::new();
        for item in inputs.news {
            let tier = credibility::assess(if item.source.is_empty() {
                &item.url
            } else {
                &item.source
            });
            news_block.push_str(&format!(
                "- [{}] {} ({}, {}) {}\n",
                tier.as_str(),
                item.headline,
                item.source,
                item.published_at.format("%Y-%m-%d %H:%M UTC"),
                item.url,
            ));
        }
        if news_block.is_empty() {
            news_block.push_str("(no news items collected)\n");
        }

        format!(
            "Research target: {} ({})\nGenerated focus queries: {}\n\n\
             ## Structured record\n{}\n\n## News items with credibility tiers\n{}\n\
             ## Portfolio context\n{}\n",
            inputs.symbol,
            company_name(inputs.symbol.as_str()).unwrap_or("unknown"),
            queries.join("; "),
            record_json,
            news_block,
            inputs.portfolio_context.unwrap_or("none"),
        )
    }

    /// Interpret model output into the typed briefing. Missing sections
    /// become explicit gaps rather than parse failures; a reply that is
    /// not a JSON object at all is an error (and triggers the repair).
    fn parse_briefing(
        &self,
        content: &str,
        symbol: &Symbol,
        research_model: &str,
    ) -> Result<Briefing, String> {
        let json_text = llm_gateway::extract_json(content).map_err(|e| e.to_string())?;
        let value: Value = serde_json::from_str(&json_text).map_err(|e| e.to_string())?;
        let object = value.as_object().ok_or("synthesis output is not an object")?;

        let section = |key: &str| -> Section {
            match object.get(key) {
                Some(raw) => match serde_json::from_value::<Section>(raw.clone()) {
                    Ok(section) if section.is_gap() || section.is_populated() => section,
                    _ => Section::gap("section empty in synthesis output"),
                },
                None => Section::gap("section missing from synthesis output"),
            }
        };

        // At least half the sections must be real content, otherwise we
        // treat the reply as non-conforming and let the repair run.
        let populated = SECTION_KEYS
            .iter()
            .filter(|k| object.get(**k).is_some())
            .count();
        if populated < SECTION_KEYS.len() / 2 {
            return Err(format!("only {populated} of ten sections present"));
        }

        let now = Utc::now();
        Ok(Briefing {
            recent_events: section("recent_events"),
            sentiment_analysis: section("sentiment_analysis"),
            risk_factors: section("risk_factors"),
            technical_analysis: section("technical_analysis"),
            fundamental_metrics: section("fundamental_metrics"),
            opportunities: section("opportunities"),
            contextual_information: section("contextual_information"),
            uncertainty_quantification: section("uncertainty_quantification"),
            source_quality_assessment: section("source_quality_assessment"),
            key_takeaways: section("key_takeaways"),
            meta: BriefingMeta {
                symbol: symbol.to_string(),
                research_type: ResearchType::Complete,
                model_used: research_model.to_string(),
                quality_score: 0.0,
                recommendation: Recommendation::Use,
                confidence: ConfidenceLevel::Medium,
                generated_at: now,
                expires_at: now,
            },
        })
    }
}

/// Which parts of the record are absent, phrased for the query prompt.
fn data_gaps(record: &StockRecord) -> Vec<String> {
    let mut gaps = Vec::new();
    if record.fundamentals.is_none() {
        gaps.push("fundamentals".to_string());
    }
    if record.earnings.is_none() {
        gaps.push("latest earnings".to_string());
    }
    if record.ratings.is_none() {
        gaps.push("analyst ratings".to_string());
    }
    if record.sentiment.is_none() {
        gaps.push("sentiment".to_string());
    }
    if record.technical.is_none() {
        gaps.push("technical indicators".to_string());
    }
    gaps
}
