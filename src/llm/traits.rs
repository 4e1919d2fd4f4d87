//! 模型网关抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient：
//! complete(conversation, tools) 要么返回最终文本，要么返回一个或多个工具调用请求。
//! 失败以 LlmError 返回；限流时携带可选的 retry-after 秒数。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{Message, ToolCall};

/// 网关错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 限流；retry_after_secs 来自响应头或错误消息
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),
}

/// 提供给模型的工具定义（name / description / JSON Schema 参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 模型停止生成的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolUse,
    Length,
    ContentFilter,
    #[default]
    Unknown,
}

/// 一次 complete 的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    /// 纯文本回复
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }

    /// 工具调用请求（可附带说明文本）
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
            finish_reason: FinishReason::ToolUse,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 对话补全；tools 为空时不向模型提供工具
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError>;

    /// 模型名（日志用）
    fn model_name(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
