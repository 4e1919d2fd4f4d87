//! Mock LLM 客户端（用于离线运行与测试，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息，便于本地跑通流程
//! - ScriptedLlmClient：按顺序返回预置响应，并记录每次请求，供测试断言调用路径

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, LlmResponse, ToolDefinition};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(LlmResponse::text(format!("Echo from Mock: {}", last_user)))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 一次被记录的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

impl RecordedRequest {
    /// 首条 system 消息内容
    pub fn system_prompt(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// 脚本化客户端：依次弹出预置结果，脚本耗尽后返回 InvalidResponse
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条响应
    pub fn push(&self, item: Result<LlmResponse, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
