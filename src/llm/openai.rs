//! OpenAI 兼容 API 客户端
//!
//! 通过 reqwest 直接调用 `/chat/completions`（可配置 base_url），支持原生 tools / tool_calls；
//! 401/403 映射为 AuthFailed，429 映射为 RateLimited（Retry-After 头优先，否则交给消息文本解析）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::llm::{FinishReason, LlmClient, LlmError, LlmResponse, ToolDefinition};
use crate::memory::{Message, Role, ToolCall};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout_secs,
            usage: TokenUsage::default(),
        }
    }

    fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let tool_calls = if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|c| WireToolCall {
                                id: c.id.clone(),
                                call_type: "function".to_string(),
                                function: WireFunctionCall {
                                    name: c.name.clone(),
                                    arguments: c.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                };
                let content = if m.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(m.content.clone())
                };
                WireMessage {
                    role: role.to_string(),
                    content,
                    tool_call_id: m.tool_call_id.clone(),
                    tool_calls,
                }
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolUse,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let wire_tools = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|t| WireTool {
                        tool_type: "function".to_string(),
                        function: WireFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };
        let request = WireRequest {
            model: self.model.clone(),
            messages: Self::to_wire_messages(messages),
            tools: wire_tools,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
                    retry_after_secs,
                    message,
                },
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed(message),
                _ => LlmError::RequestFailed(format!("{}: {}", status, message)),
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = &wire.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(serde_json::Value::String(c.function.arguments)),
            })
            .collect();

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: parse_finish_reason(choice.finish_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages_carry_tool_calls() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: serde_json::json!({"path": "api/src/Main.cs"}),
        };
        let messages = vec![
            Message::system("sys"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool_result("call_1", "file body"),
        ];
        let wire = OpenAiClient::to_wire_messages(&messages);
        assert_eq!(wire[1].role, "assistant");
        assert!(wire[1].content.is_none());
        let calls = wire[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "read_file");
        assert!(calls[0].function.arguments.contains("api/src/Main.cs"));
        assert_eq!(wire[2].role, "tool");
        assert_eq!(wire[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(parse_finish_reason(Some("tool_calls")), FinishReason::ToolUse);
        assert_eq!(parse_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(parse_finish_reason(None), FinishReason::Unknown);
    }
}
