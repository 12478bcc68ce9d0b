use crate::config::{ForecastConfig, ToolCallPolicy};
use crate::error::{ForecastError, Result};
use crate::mcp::client::McpClient;
use crate::mcp::tool::tool_defs;
use crate::mcp::types::{CallToolResult, Content};
use crate::providers::provider::{
    FinishReason, LlmProvider, LlmResponse, TokenUsage, ToolCall, ToolDef, Turn,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::conversation::ConversationState;

#[async_trait]
pub trait Agent: Send + Sync {
    async fn ask(&self, question: &str) -> Result<AgentOutput>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Final text from the model; empty when it finished without any.
    pub answer: String,
    pub transcript: Vec<Turn>,
    pub tool_calls_made: usize,
    pub model_turns: usize,
    pub usage: TokenUsage,
}

/// Where the loop is while answering one question.
enum Phase {
    AwaitingModel,
    ModelRespondedWithToolCall(LlmResponse),
    ToolExecuting(Vec<(ToolCall, Value)>),
    Done(String),
}

pub struct ForecastAgent {
    provider: Box<dyn LlmProvider>,
    client: Arc<McpClient>,
    max_turns: usize,
    tool_call_policy: ToolCallPolicy,
    reinject_tool_errors: bool,
    tools: OnceCell<Vec<ToolDef>>,
}

pub struct ForecastAgentBuilder {
    provider: Box<dyn LlmProvider>,
    client: Arc<McpClient>,
    max_turns: usize,
    tool_call_policy: ToolCallPolicy,
    reinject_tool_errors: bool,
}

impl ForecastAgentBuilder {
    pub fn new(
        config: &ForecastConfig,
        provider: impl LlmProvider + 'static,
        client: Arc<McpClient>,
    ) -> Self {
        Self {
            provider: Box::new(provider),
            client,
            max_turns: config.max_turns,
            tool_call_policy: config.tool_call_policy,
            reinject_tool_errors: config.reinject_tool_errors,
        }
    }

    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn tool_call_policy(mut self, policy: ToolCallPolicy) -> Self {
        self.tool_call_policy = policy;
        self
    }

    pub fn reinject_tool_errors(mut self, reinject: bool) -> Self {
        self.reinject_tool_errors = reinject;
        self
    }

    pub fn build(self) -> ForecastAgent {
        ForecastAgent {
            provider: self.provider,
            client: self.client,
            max_turns: self.max_turns.max(1),
            tool_call_policy: self.tool_call_policy,
            reinject_tool_errors: self.reinject_tool_errors,
            tools: OnceCell::new(),
        }
    }
}

impl ForecastAgent {
    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }

    /// The provider's tools in oracle form. Fetched once, then reused for
    /// every question on this session.
    pub async fn tool_defs(&self) -> Result<&[ToolDef]> {
        let defs = self
            .tools
            .get_or_try_init(|| async {
                let descriptors = self.client.list_tools().await?;
                info!("{} tools available from {}", descriptors.len(), self.client.server_name);
                Ok::<_, ForecastError>(tool_defs(&descriptors))
            })
            .await?;
        Ok(defs)
    }

    /// Answer one question, giving up early if `cancel` fires. Cancelling
    /// closes the provider session; the agent is unusable afterwards.
    pub async fn ask_with_cancel(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentOutput> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("question cancelled, closing session with {}", self.client.server_name);
                self.client.close().await;
                Err(ForecastError::Cancelled)
            }
            output = self.answer(question) => output,
        }
    }

    async fn answer(&self, question: &str) -> Result<AgentOutput> {
        let tools = self.tool_defs().await?;
        let mut state = ConversationState::new(question);
        let mut usage = TokenUsage::default();
        let mut model_turns = 0;
        let mut tool_calls_made = 0;
        let mut phase = Phase::AwaitingModel;

        let answer = loop {
            phase = match phase {
                Phase::AwaitingModel => {
                    if model_turns == self.max_turns {
                        return Err(ForecastError::TurnLimitExceeded {
                            max_turns: self.max_turns,
                        });
                    }
                    debug!(
                        "Turn {}: calling model with {} turns",
                        model_turns,
                        state.turns().len()
                    );
                    let response = self.provider.complete(state.turns(), tools).await?;
                    model_turns += 1;
                    usage.add(&response.usage);

                    if response.tool_calls.is_empty() {
                        if response.finish_reason != FinishReason::Stop {
                            warn!(
                                "Turn {}: model finished with {:?}",
                                model_turns, response.finish_reason
                            );
                        }
                        let answer = response.content.unwrap_or_default();
                        state.push(Turn::assistant(answer.clone()));
                        Phase::Done(answer)
                    } else {
                        Phase::ModelRespondedWithToolCall(response)
                    }
                }
                Phase::ModelRespondedWithToolCall(response) => {
                    let calls = self.honored_calls(response.tool_calls);
                    // Every honored call must parse before any of them runs.
                    let parsed = calls
                        .iter()
                        .map(|c| c.parse_arguments().map(|args| (c.clone(), args)))
                        .collect::<Result<Vec<_>>>()?;
                    state.push(Turn::Assistant {
                        text: response.content,
                        tool_calls: calls,
                    });
                    Phase::ToolExecuting(parsed)
                }
                Phase::ToolExecuting(calls) => {
                    // No model turn is left to read the results.
                    if model_turns == self.max_turns {
                        return Err(ForecastError::TurnLimitExceeded {
                            max_turns: self.max_turns,
                        });
                    }
                    for (call, args) in calls {
                        tool_calls_made += 1;
                        let result = self.execute(&call, args).await?;
                        state.push(result);
                    }
                    Phase::AwaitingModel
                }
                Phase::Done(answer) => break answer,
            };
        };

        info!(
            "answered after {} model turns and {} tool calls",
            model_turns, tool_calls_made
        );
        Ok(AgentOutput {
            answer,
            transcript: state.into_turns(),
            tool_calls_made,
            model_turns,
            usage,
        })
    }

    fn honored_calls(&self, mut calls: Vec<ToolCall>) -> Vec<ToolCall> {
        match self.tool_call_policy {
            ToolCallPolicy::All => calls,
            ToolCallPolicy::FirstOnly => {
                if calls.len() > 1 {
                    let dropped: Vec<&str> = calls[1..].iter().map(|c| c.name.as_str()).collect();
                    warn!("model requested {} tool calls, ignoring {:?}", calls.len(), dropped);
                }
                calls.truncate(1);
                calls
            }
        }
    }

    async fn execute(&self, call: &ToolCall, args: Value) -> Result<Turn> {
        debug!("Calling tool: {} with args: {}", call.name, args);
        match self.client.call_tool(&call.name, args).await {
            Ok(result) => Ok(Turn::tool_result(call, result_text(&result), false)),
            Err(e) if self.reinject_tool_errors && e.is_recoverable_tool_error() => {
                warn!("{}", e);
                Ok(Turn::tool_result(call, format!("Error: {e}"), true))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Agent for ForecastAgent {
    async fn ask(&self, question: &str) -> Result<AgentOutput> {
        self.answer(question).await
    }
}

/// Text blocks verbatim; anything else serialized as JSON.
fn result_text(result: &CallToolResult) -> String {
    if result
        .content
        .iter()
        .all(|c| matches!(c, Content::Text { .. }))
    {
        result.text()
    } else {
        serde_json::to_string(&result.content).unwrap_or_else(|_| result.text())
    }
}
