//! 错误恢复引擎
//!
//! 根据 AgentError 类型给出 StepError：类别、消息、涉及的工具与是否可恢复。
//! 只有 AgentError::is_fatal 覆盖的窄类别是不可恢复的，其余默认 recoverable = true。

use crate::core::{AgentError, StepError, StepErrorKind};
use crate::llm::LlmError;

/// 语义化错误归类：将步骤执行中的错误映射为可记录的 StepError
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, err: &AgentError, tool_involved: Option<String>) -> StepError {
        let kind = match err {
            AgentError::Llm(LlmError::RateLimited { .. }) => StepErrorKind::RateLimit,
            AgentError::Llm(LlmError::Timeout(_)) => StepErrorKind::Timeout,
            AgentError::Llm(LlmError::AuthFailed(_)) => StepErrorKind::Fatal,
            // 不可解析的模型输出同样归为网关侧问题
            AgentError::Llm(_) | AgentError::JsonParseError(_) => StepErrorKind::Gateway,
            AgentError::Fatal(_) => StepErrorKind::Fatal,
        };
        StepError {
            kind,
            message: err.to_string(),
            tool_involved,
            recoverable: !err.is_fatal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_recoverable() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::RateLimited {
            retry_after_secs: Some(3),
            message: "slow down".to_string(),
        });
        let step_err = engine.classify(&err, None);
        assert_eq!(step_err.kind, StepErrorKind::RateLimit);
        assert!(step_err.recoverable);
    }

    #[test]
    fn test_gateway_failure_is_recoverable() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::RequestFailed("502 bad gateway".to_string()));
        let step_err = engine.classify(&err, Some("read_file".to_string()));
        assert_eq!(step_err.kind, StepErrorKind::Gateway);
        assert!(step_err.recoverable);
        assert_eq!(step_err.tool_involved.as_deref(), Some("read_file"));
        assert!(step_err.message.contains("502"));
    }

    #[test]
    fn test_fatal_category_is_not_recoverable() {
        let engine = RecoveryEngine::new();
        for err in [
            AgentError::Fatal("workspace unavailable".to_string()),
            AgentError::Llm(LlmError::AuthFailed("invalid key".to_string())),
        ] {
            let step_err = engine.classify(&err, None);
            assert_eq!(step_err.kind, StepErrorKind::Fatal);
            assert!(!step_err.recoverable, "{err} should not be recoverable");
        }
    }

    #[test]
    fn test_gateway_timeout_is_recoverable() {
        let engine = RecoveryEngine::new();
        let step_err = engine.classify(&AgentError::Llm(LlmError::Timeout(120)), None);
        assert_eq!(step_err.kind, StepErrorKind::Timeout);
        assert!(step_err.recoverable);
    }

    #[test]
    fn test_step_error_kinds_serialize_snake_case() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::RateLimited {
            retry_after_secs: None,
            message: "429".to_string(),
        });
        let v = serde_json::to_value(engine.classify(&err, None)).unwrap();
        assert_eq!(v["type"], "rate_limit");
        assert_eq!(v["recoverable"], true);
    }
}
