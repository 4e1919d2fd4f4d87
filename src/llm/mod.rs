//! LLM 层：模型网关抽象与实现（OpenAI 兼容 / Mock / Scripted）以及限流重试

pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use mock::{MockLlmClient, RecordedRequest, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{complete_with_rate_limit_retry, parse_retry_after, RateLimitPolicy};
pub use traits::{FinishReason, LlmClient, LlmError, LlmResponse, ToolDefinition};
