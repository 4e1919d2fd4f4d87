//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找；
//! ToolExecutor 在调用时加超时，并把任何失败都转成文本结果。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolDefinition;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（tool call 中的 function name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 只读工具不修改工作区，可用于研究 / 规划阶段
    fn read_only(&self) -> bool {
        false
    }

    /// 参数中的文件路径经沙箱解析后的工作区相对形式（`repo/relative/path`）；
    /// 不操作单个文件的工具返回 None
    fn resolved_path(&self, _args: &Value) -> Option<String> {
        None
    }

    /// 执行工具；Err 中的文字会原样交还给模型
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 已排序的工具名，保证 prompt 与 catalog 稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn read_only_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|t| t.read_only())
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// 生成提供给模型的工具定义；names 为 None 时返回全部
    pub fn definitions(&self, names: Option<&[String]>) -> Vec<ToolDefinition> {
        let selected = match names {
            Some(names) => names
                .iter()
                .filter(|n| self.tools.contains_key(n.as_str()))
                .cloned()
                .collect(),
            None => self.tool_names(),
        };
        selected
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的 Available tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                let desc = self.tools.get(&name)?.description().to_string();
                Some((name, desc))
            })
            .collect()
    }
}
