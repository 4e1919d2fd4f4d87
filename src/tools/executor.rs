//! 工具执行器（Tool Dispatcher）
//!
//! 持有 ToolRegistry 与全局超时，dispatch(tool_name, args) 在超时内调用工具；
//! 未知工具、工具报错、沙箱拒绝、超时都转成文本（ok = false），从不以错误形式抛回调用方。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::llm::ToolDefinition;
use crate::tools::{Tool, ToolRegistry};

/// 一次工具调用的结果：给模型看的文本与是否成功
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: String,
    pub ok: bool,
}

/// 工具执行器：对每次调用施加超时，并把失败映射为文本
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub async fn dispatch(&self, tool_name: &str, args: serde_json::Value) -> ToolOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let (outcome, label) = match self.registry.get(tool_name) {
            None => (
                ToolOutcome {
                    output: format!(
                        "Error: unknown tool '{}'. Available tools: {}",
                        tool_name,
                        self.registry.tool_names().join(", ")
                    ),
                    ok: false,
                },
                "unknown",
            ),
            Some(tool) => match timeout(self.timeout, tool.execute(args)).await {
                Ok(Ok(output)) => (ToolOutcome { output, ok: true }, "ok"),
                Ok(Err(e)) => (
                    ToolOutcome {
                        output: format!("Error: {}", e),
                        ok: false,
                    },
                    "error",
                ),
                Err(_) => (
                    ToolOutcome {
                        output: format!(
                            "Error: tool '{}' timed out after {}s",
                            tool_name,
                            self.timeout.as_secs()
                        ),
                        ok: false,
                    },
                    "timeout",
                ),
            },
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": outcome.ok,
            "outcome": label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    /// 工具调用涉及的文件（工作区相对路径）
    pub fn resolved_path(&self, tool_name: &str, args: &serde_json::Value) -> Option<String> {
        self.registry.get(tool_name)?.resolved_path(args)
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn read_only_tool_names(&self) -> Vec<String> {
        self.registry.read_only_names()
    }

    pub fn definitions(&self, names: Option<&[String]>) -> Vec<ToolDefinition> {
        self.registry.definitions(names)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
