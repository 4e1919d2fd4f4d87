//! 限流重试：单次、有界
//!
//! 网关返回 RateLimited 时：优先使用错误携带的 retry-after，其次从错误消息中匹配
//! 「retry after N seconds」，都没有则用默认等待；睡眠一次、重试一次，之后无论结果如何都直接返回。

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::llm::{LlmClient, LlmError, LlmResponse, ToolDefinition};
use crate::memory::Message;

static RETRY_AFTER_RE: OnceLock<Regex> = OnceLock::new();

/// 限流等待策略
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub default_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RateLimitPolicy {
    pub fn new(default_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            default_delay: Duration::from_secs(default_delay_secs),
            max_delay: Duration::from_secs(max_delay_secs.max(default_delay_secs)),
        }
    }

    /// 计算本次限流应等待的时长
    pub fn delay_for(&self, retry_after_secs: Option<u64>, message: &str) -> Duration {
        let delay = retry_after_secs
            .map(Duration::from_secs)
            .or_else(|| parse_retry_after(message))
            .unwrap_or(self.default_delay);
        delay.min(self.max_delay)
    }
}

/// 从错误文本中解析建议等待时间，如 "Please retry after 20 seconds" / "retry after 1.5s"
pub fn parse_retry_after(text: &str) -> Option<Duration> {
    let re = RETRY_AFTER_RE.get_or_init(|| {
        Regex::new(r"(?i)(?:retry|try again)\s+(?:after|in)\s+(\d+(?:\.\d+)?)\s*(?:s\b|sec|second)")
            .expect("valid retry-after regex")
    });
    let caps = re.captures(text)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// 调用网关；遇到限流时按策略睡眠一次并重试一次
pub async fn complete_with_rate_limit_retry(
    llm: &dyn LlmClient,
    messages: &[Message],
    tools: &[ToolDefinition],
    policy: &RateLimitPolicy,
) -> Result<LlmResponse, LlmError> {
    match llm.complete(messages, tools).await {
        Err(LlmError::RateLimited {
            retry_after_secs,
            message,
        }) => {
            let delay = policy.delay_for(retry_after_secs, &message);
            tracing::warn!(
                model = %llm.model_name(),
                delay_ms = delay.as_millis() as u64,
                "Rate limited, retrying once"
            );
            tokio::time::sleep(delay).await;
            llm.complete(messages, tools).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_retry_after_variants() {
        assert_eq!(
            parse_retry_after("Rate limit reached. Please retry after 20 seconds."),
            Some(Duration::from_secs(20))
        );
        assert_eq!(
            parse_retry_after("please try again in 1.5s"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after("quota exceeded"), None);
    }

    #[test]
    fn test_delay_prefers_hint_then_message_then_default() {
        let policy = RateLimitPolicy::new(5, 60);
        assert_eq!(policy.delay_for(Some(7), "retry after 20 seconds"), Duration::from_secs(7));
        assert_eq!(policy.delay_for(None, "retry after 20 seconds"), Duration::from_secs(20));
        assert_eq!(policy.delay_for(None, "too many requests"), Duration::from_secs(5));
        assert_eq!(policy.delay_for(Some(600), ""), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exactly_once_on_rate_limit() {
        let llm = ScriptedLlmClient::new(vec![
            Err(LlmError::RateLimited {
                retry_after_secs: None,
                message: "retry after 2 seconds".to_string(),
            }),
            Ok(LlmResponse::text("ok")),
        ]);
        let start = tokio::time::Instant::now();
        let resp = complete_with_rate_limit_retry(&llm, &[], &[], &RateLimitPolicy::default())
            .await
            .unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(llm.call_count(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_rate_limit_is_returned() {
        let limited = || {
            Err(LlmError::RateLimited {
                retry_after_secs: Some(1),
                message: "busy".to_string(),
            })
        };
        let llm = ScriptedLlmClient::new(vec![limited(), limited(), Ok(LlmResponse::text("late"))]);
        let result = complete_with_rate_limit_retry(&llm, &[], &[], &RateLimitPolicy::default()).await;
        assert!(matches!(result, Err(LlmError::RateLimited { .. })));
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let llm = ScriptedLlmClient::new(vec![
            Err(LlmError::RequestFailed("boom".to_string())),
            Ok(LlmResponse::text("never")),
        ]);
        let result = complete_with_rate_limit_retry(&llm, &[], &[], &RateLimitPolicy::default()).await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
        assert_eq!(llm.call_count(), 1);
    }
}
