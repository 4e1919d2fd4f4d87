//! Agent 错误类型与步骤失败描述
//!
//! 与 RecoveryEngine 配合：执行引擎把步骤内抛出的 AgentError 归类为 StepError，
//! 由 recoverable 决定是继续调度后续步骤还是终止整个计划。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误
///
/// 工具失败不在此列：它们以 "Error: ..." 文本回到模型，由模型自行纠正。
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 模型回复不是期望的 JSON；各阶段就地回退，不向外传播
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// 不可恢复：继续调度后续步骤没有意义（凭据失效、工作区不可用等）
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl AgentError {
    /// 是否属于不可恢复类别；其余错误一律视为可恢复
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Fatal(_) | AgentError::Llm(LlmError::AuthFailed(_))
        )
    }
}

/// 步骤失败的类别（序列化为 StepResult.error.type）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Gateway,
    RateLimit,
    Timeout,
    Fatal,
}

/// 写入 StepResult 的错误详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    #[serde(rename = "type")]
    pub kind: StepErrorKind,
    pub message: String,
    pub tool_involved: Option<String>,
    pub recoverable: bool,
}
