use super::provider::{FinishReason, LlmProvider, LlmResponse, TokenUsage, ToolCall, ToolDef, Turn};
use crate::error::{ForecastError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 1000,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

fn build_messages(conversation: &[Turn]) -> Vec<Value> {
    conversation
        .iter()
        .map(|turn| match turn {
            Turn::User { text } => json!({ "role": "user", "content": text }),
            Turn::Assistant { text, tool_calls } => {
                let mut obj = json!({ "role": "assistant", "content": text });
                if !tool_calls.is_empty() {
                    let tc_arr: Vec<Value> = tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(tc_arr);
                }
                obj
            }
            Turn::ToolResult {
                call_id, content, ..
            } => json!({ "role": "tool", "content": content, "tool_call_id": call_id }),
        })
        .collect()
}

fn build_tools(tools: &[ToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({ "type": "function", "function": { "name": t.name, "description": t.description, "parameters": t.parameters } })
        })
        .collect()
}

/// Tool calls from a response message. A call without an id or name, or whose
/// arguments are not a JSON string, fails the whole response.
fn parse_tool_calls(message: &Value) -> Result<Vec<ToolCall>> {
    let Some(arr) = message["tool_calls"].as_array() else {
        return Ok(Vec::new());
    };
    let mut calls = Vec::with_capacity(arr.len());
    for tc in arr {
        if tc["type"].as_str().unwrap_or("function") != "function" {
            warn!("ignoring non-function tool call: {}", tc["type"]);
            continue;
        }
        let id = tc["id"]
            .as_str()
            .ok_or_else(|| ForecastError::Oracle(format!("tool call without an id: {tc}")))?;
        let name = tc["function"]["name"]
            .as_str()
            .ok_or_else(|| ForecastError::Oracle(format!("tool call without a name: {tc}")))?;
        let arguments = tc["function"]["arguments"].as_str().ok_or_else(|| {
            ForecastError::MalformedToolArguments {
                name: name.to_string(),
                reason: format!(
                    "expected arguments as a JSON string, got {}",
                    tc["function"]["arguments"]
                ),
            }
        })?;
        calls.push(ToolCall::new(id, name, arguments));
    }
    Ok(calls)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, conversation: &[Turn], tools: &[ToolDef]) -> Result<LlmResponse> {
        let msgs = build_messages(conversation);
        let tools_val = build_tools(tools);

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": msgs
        });
        if !tools_val.is_empty() {
            body["tools"] = json!(tools_val);
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("POST {} ({} turns, {} tools)", url, conversation.len(), tools.len());
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ForecastError::Oracle(format!("status {status}: {body_text}")));
        }
        let data: Value = resp.json().await?;

        let usage = {
            let u = &data["usage"];
            TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            }
        };

        let choice = data["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ForecastError::Oracle("no response received from the model".into()))?;
        let message = &choice["message"];
        let finish_reason = FinishReason::parse(choice["finish_reason"].as_str().unwrap_or("stop"));

        Ok(LlmResponse {
            content: message["content"].as_str().map(str::to_string),
            tool_calls: parse_tool_calls(message)?,
            finish_reason,
            usage,
        })
    }
}
