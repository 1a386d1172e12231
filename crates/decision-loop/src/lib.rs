use std::sync::Arc;
use std::time::Duration;

use arena_core::{
    ArenaConfig, Briefing, ConfidenceLevel, DecisionAction, ModelDescriptor, TradeDecision,
};
use llm_gateway::{chat_with_retry, ChatMessage, ChatOptions, LlmGateway};
use trading_engine::{ExecResult, TradingEngine};

pub mod prompts;

const RETRY_ATTEMPTS: u32 = 3;

/// What one decision attempt produced. Exactly one reasoning entry is
/// appended per call, whatever happens.
#[derive(Debug)]
pub struct DecisionOutcome {
    pub model_id: i64,
    pub decision: TradeDecision,
    pub executed: Option<ExecResult>,
    pub reasoning_id: i64,
}

/// Per-agent decision loop: compose briefings with portfolio state,
/// invoke the agent's trading model, parse the JSON decision and hand it
/// to the trading engine.
pub struct DecisionLoop {
    gateway: Arc<dyn LlmGateway>,
    engine: Arc<TradingEngine>,
    llm_timeout: Duration,
}

impl DecisionLoop {
    pub fn new(gateway: Arc<dyn LlmGateway>, engine: Arc<TradingEngine>, config: &ArenaConfig) -> Self {
        Self {
            gateway,
            engine,
            llm_timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    pub fn engine(&self) -> &Arc<TradingEngine> {
        &self.engine
    }

    pub async fn run(
        &self,
        model: &ModelDescriptor,
        briefings: &[Briefing],
    ) -> anyhow::Result<DecisionOutcome> {
        let research_text = briefings
            .iter()
            .map(Briefing::to_prompt_text)
            .collect::<Vec<_>>()
            .join("\n---\n");

        let portfolio = self.engine.get_portfolio(model.id).await?;
        let positions = self.engine.get_positions(model.id).await?;
        let context = prompts::portfolio_context(&portfolio, &positions);

        let user_prompt = format!(
            "## Your portfolio\n{context}\n## Research briefings\n{research_text}\n\
             Make exactly one decision for this cycle."
        );
        let messages = [
            ChatMessage::system(prompts::decision_system_prompt()),
            ChatMessage::user(user_prompt),
        ];
        let options = ChatOptions {
            temperature: Some(0.3),
            max_tokens: Some(1024),
            timeout: Some(self.llm_timeout),
        };

        let response = chat_with_retry(
            self.gateway.as_ref(),
            &model.api_identifier,
            &messages,
            &options,
            RETRY_ATTEMPTS,
        )
        .await;

        let raw_response = match &response {
            Ok(r) => r.content.clone(),
            Err(e) => format!("(llm error: {e})"),
        };

        let parsed = response
            .ok()
            .and_then(|r| llm_gateway::extract_json(&r.content).ok())
            .and_then(|json| serde_json::from_str::<TradeDecision>(&json).ok());

        let decision = match parsed {
            Some(decision) => decision,
            None => {
                tracing::warn!(model = %model.api_identifier, "unparseable decision, holding");
                TradeDecision::hold("decision output could not be parsed")
            }
        };

        let (decision, executed) = self.apply(model, decision).await;

        let reasoning_id = self
            .engine
            .append_reasoning(
                model.id,
                &research_text,
                decision.action.as_str(),
                &decision.reasoning,
                decision.confidence.as_str(),
                &raw_response,
            )
            .await?;

        Ok(DecisionOutcome {
            model_id: model.id,
            decision,
            executed,
            reasoning_id,
        })
    }

    /// Execute BUY/SELL through the engine. A rejected or malformed order
    /// is recorded as HOLD; the engine appends no trade in that case.
    async fn apply(
        &self,
        model: &ModelDescriptor,
        decision: TradeDecision,
    ) -> (TradeDecision, Option<ExecResult>) {
        let action = decision.action;
        if action == DecisionAction::Hold {
            return (decision, None);
        }

        let (symbol, quantity) = match (&decision.symbol, decision.quantity) {
            (Some(symbol), Some(quantity)) if quantity > 0 => (symbol.clone(), quantity),
            _ => {
                let hold = TradeDecision {
                    action: DecisionAction::Hold,
                    reasoning: format!(
                        "{} without valid symbol/quantity; original reasoning: {}",
                        action.as_str(),
                        decision.reasoning
                    ),
                    confidence: ConfidenceLevel::Low,
                    ..decision
                };
                return (hold, None);
            }
        };

        let result = match action {
            DecisionAction::Buy => self.engine.execute_buy(model.id, &symbol, quantity).await,
            DecisionAction::Sell => self.engine.execute_sell(model.id, &symbol, quantity).await,
            DecisionAction::Hold => unreachable!(),
        };

        match result {
            Ok(exec) => {
                tracing::info!(
                    model = %model.api_identifier,
                    action = action.as_str(),
                    symbol = %symbol,
                    quantity,
                    trade_id = exec.trade.id,
                    "trade executed"
                );
                (decision, Some(exec))
            }
            Err(e) if e.is_validation() => {
                tracing::warn!(model = %model.api_identifier, error = %e, "order rejected, holding");
                let hold = TradeDecision {
                    action: DecisionAction::Hold,
                    reasoning: format!("{} {symbol} x{quantity} rejected: {e}", action.as_str()),
                    confidence: ConfidenceLevel::Low,
                    ..decision
                };
                (hold, None)
            }
            Err(e) => {
                tracing::error!(model = %model.api_identifier, error = %e, "execution failed operationally");
                let hold = TradeDecision {
                    action: DecisionAction::Hold,
                    reasoning: format!("execution aborted: {e}"),
                    confidence: ConfidenceLevel::Low,
                    ..decision
                };
                (hold, None)
            }
        }
    }
}
