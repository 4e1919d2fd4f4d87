//! 有界 Agent 循环
//!
//! prompt -> 模型回复 -> 可能的工具调用 -> 继续，直到结构化 finish、哨兵、隐式完成或迭代上限。
//! 终止判断顺序：
//! 1. 模型调用内置 `finish` 工具（结构化完成）
//! 2. 其他工具调用：逐个经 ToolExecutor 执行，结果追加为 tool 消息，继续下一轮
//! 3. 回复文本含哨兵（兼容旧 prompt）：去掉哨兵后结束
//! 4. 非首轮且无工具调用：隐式完成
//! 5. 首轮无工具调用、无哨兵：追加回复与继续提示，进入下一轮
//! 6. 达到上限：以最后一次文本强制结束
//!
//! 每次网关调用都经过一次性限流重试。

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::AgentError;
use crate::llm::{complete_with_rate_limit_retry, LlmClient, RateLimitPolicy, ToolDefinition};
use crate::memory::{Message, ToolCall};
use crate::react::events::{preview, ReactEvent, ToolTraceEntry};
use crate::tools::{ToolExecutor, ToolOutcome};

/// 内置的结构化完成工具名
pub const FINISH_TOOL: &str = "finish";

/// 首轮既无工具调用也无哨兵时追加的继续提示
const CONTINUE_NUDGE: &str =
    "Continue working on the task. Use the available tools if needed, and call `finish` (or end your reply with the completion marker) when you are done.";

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 循环结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 模型调用了 finish 工具
    Structured,
    /// 回复中出现哨兵
    Sentinel,
    /// 非首轮无工具调用
    Implicit,
    /// 达到迭代上限
    IterationCap,
}

impl Termination {
    /// 模型明确宣告完成
    pub fn is_explicit(&self) -> bool {
        matches!(self, Termination::Structured | Termination::Sentinel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Structured => "structured",
            Termination::Sentinel => "sentinel",
            Termination::Implicit => "implicit",
            Termination::IterationCap => "iteration_cap",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 循环正常结束的结果
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub text: String,
    pub termination: Termination,
    pub trace: Vec<ToolTraceEntry>,
    pub iterations: usize,
    /// 模型每轮的非空回复文本（按时间顺序，未去哨兵）
    pub replies: Vec<String>,
}

impl LoopOutcome {
    /// 结果文本在前，其后是各轮回复（从新到旧）；用于在结果文本不可用时回看更早的回复
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.text.as_str()).chain(self.replies.iter().rev().map(String::as_str))
    }

    /// 成功写入过的文件（去重，保持首次出现顺序）
    pub fn files_written(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for path in self.trace.iter().filter_map(|t| t.written_path()) {
            if !files.iter().any(|f| f == path) {
                files.push(path.to_string());
            }
        }
        files
    }
}

/// 循环因网关错误中止
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LoopFailure {
    pub error: AgentError,
    /// 失败前最后调用的工具
    pub last_tool: Option<String>,
    pub trace: Vec<ToolTraceEntry>,
    pub iterations: usize,
}

impl From<LoopFailure> for AgentError {
    fn from(f: LoopFailure) -> Self {
        f.error
    }
}

/// 有界 Agent 循环：system prompt、可用工具子集、哨兵与迭代上限
pub struct AgentLoop<'a> {
    llm: &'a dyn LlmClient,
    executor: &'a ToolExecutor,
    retry: &'a RateLimitPolicy,
    system_prompt: String,
    tools: Vec<String>,
    sentinels: Vec<String>,
    max_iterations: usize,
    event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        executor: &'a ToolExecutor,
        retry: &'a RateLimitPolicy,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            executor,
            retry,
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            sentinels: Vec::new(),
            max_iterations: 1,
            event_tx: None,
        }
    }

    /// 限制本循环可用的工具（只保留注册表中存在的）
    pub fn with_tools(mut self, tools: &[String]) -> Self {
        self.tools = tools
            .iter()
            .filter(|t| self.executor.has_tool(t))
            .cloned()
            .collect();
        self
    }

    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinels.push(sentinel.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_event_tx(mut self, tx: Option<&'a UnboundedSender<ReactEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    fn send_event(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn offers_finish(&self) -> bool {
        !self.sentinels.is_empty() && !self.tools.is_empty()
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.executor.definitions(Some(&self.tools));
        if self.offers_finish() {
            defs.push(ToolDefinition {
                name: FINISH_TOOL.to_string(),
                description: "Call when the work is complete. Args: {\"outcome\": \"what was achieved\"}"
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "outcome": { "type": "string", "description": "Short description of the result" }
                    },
                    "required": ["outcome"]
                }),
            });
        }
        defs
    }

    fn strip_sentinel(&self, text: &str) -> Option<String> {
        let sentinel = self.sentinels.iter().find(|s| text.contains(s.as_str()))?;
        Some(text.replace(sentinel.as_str(), "").trim().to_string())
    }

    async fn dispatch(&self, call: &ToolCall, iteration: usize) -> ToolTraceEntry {
        self.send_event(ReactEvent::ToolCall {
            tool: call.name.clone(),
            args: call.arguments.clone(),
        });
        let outcome = if self.tools.iter().any(|t| t == &call.name) {
            self.executor.dispatch(&call.name, call.arguments.clone()).await
        } else {
            tracing::warn!(tool = %call.name, "tool not available in this loop");
            ToolOutcome {
                output: format!(
                    "Error: tool '{}' is not available here. Available tools: {}",
                    call.name,
                    if self.tools.is_empty() {
                        "(none)".to_string()
                    } else {
                        self.tools.join(", ")
                    }
                ),
                ok: false,
            }
        };
        self.send_event(ReactEvent::Observation {
            tool: call.name.clone(),
            ok: outcome.ok,
            preview: preview(&outcome.output, OBSERVATION_PREVIEW_CHARS),
        });
        let path = if outcome.ok {
            self.executor.resolved_path(&call.name, &call.arguments)
        } else {
            None
        };
        ToolTraceEntry {
            iteration,
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
            ok: outcome.ok,
            output_preview: outcome.output,
            path,
        }
    }

    fn finish(
        &self,
        text: String,
        termination: Termination,
        trace: Vec<ToolTraceEntry>,
        replies: Vec<String>,
        iterations: usize,
    ) -> LoopOutcome {
        tracing::debug!(%termination, iterations, tool_calls = trace.len(), "agent loop finished");
        self.send_event(ReactEvent::Finished {
            termination: termination.to_string(),
            iterations,
        });
        LoopOutcome {
            text,
            termination,
            trace,
            iterations,
            replies,
        }
    }

    /// 运行循环；只有网关错误会以 LoopFailure 返回，工具失败都以文本形式回到模型
    pub async fn run(&self, user_message: &str) -> Result<LoopOutcome, LoopFailure> {
        let mut messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(user_message.to_string()),
        ];
        let defs = self.tool_definitions();
        let mut trace: Vec<ToolTraceEntry> = Vec::new();
        let mut replies: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            self.send_event(ReactEvent::StepUpdate {
                iteration,
                max_iterations: self.max_iterations,
            });

            let response = match complete_with_rate_limit_retry(self.llm, &messages, &defs, self.retry).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(iteration, error = %e, "gateway call failed");
                    return Err(LoopFailure {
                        error: AgentError::Llm(e),
                        last_tool: trace.last().map(|t| t.tool.clone()),
                        trace,
                        iterations: iteration,
                    });
                }
            };
            if !response.text.trim().is_empty() {
                replies.push(response.text.clone());
            }

            if response.has_tool_calls() {
                messages.push(Message::assistant_with_tools(
                    response.text.clone(),
                    response.tool_calls.clone(),
                ));

                let mut finish_outcome: Option<String> = None;
                for call in &response.tool_calls {
                    if call.name == FINISH_TOOL && self.offers_finish() {
                        let outcome = call
                            .arguments
                            .get("outcome")
                            .and_then(|v| v.as_str())
                            .map(String::from)
                            .unwrap_or_else(|| response.text.trim().to_string());
                        messages.push(Message::tool_result(call.id.clone(), "ok"));
                        finish_outcome = Some(outcome);
                        continue;
                    }
                    let entry = self.dispatch(call, iteration).await;
                    messages.push(Message::tool_result(call.id.clone(), entry.output_preview.clone()));
                    trace.push(ToolTraceEntry {
                        output_preview: preview(&entry.output_preview, OBSERVATION_PREVIEW_CHARS),
                        ..entry
                    });
                }

                if let Some(outcome) = finish_outcome {
                    return Ok(self.finish(outcome, Termination::Structured, trace, replies, iteration));
                }
                continue;
            }

            if let Some(stripped) = self.strip_sentinel(&response.text) {
                return Ok(self.finish(stripped, Termination::Sentinel, trace, replies, iteration));
            }

            if iteration > 1 {
                return Ok(self.finish(
                    response.text.trim().to_string(),
                    Termination::Implicit,
                    trace,
                    replies,
                    iteration,
                ));
            }

            if iteration < self.max_iterations {
                messages.push(Message::assistant(response.text.clone()));
                messages.push(Message::user(CONTINUE_NUDGE));
            }
        }

        tracing::warn!(
            max_iterations = self.max_iterations,
            "agent loop reached iteration cap, forcing completion"
        );
        let last_text = replies.last().map(|t| t.trim().to_string()).unwrap_or_default();
        Ok(self.finish(
            last_text,
            Termination::IterationCap,
            trace,
            replies,
            self.max_iterations,
        ))
    }
}
