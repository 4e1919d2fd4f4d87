//! Agent 循环过程事件与工具调用轨迹

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON，供 CLI 或前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 循环迭代更新（当前第几轮）
    StepUpdate { iteration: usize, max_iterations: usize },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 循环结束
    Finished { termination: String, iterations: usize },
}

/// 一次工具调用的记录；执行引擎据此推导修改过的文件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolTraceEntry {
    pub iteration: usize,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub ok: bool,
    pub output_preview: String,
    /// 成功调用所涉及文件的工作区相对路径（经沙箱解析，`./a` 与 `a` 归为同一项）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ToolTraceEntry {
    /// 成功的 write_file 调用写入的路径
    pub fn written_path(&self) -> Option<&str> {
        self.path_of("write_file")
    }

    /// 成功的 read_file 调用读取的路径
    pub fn read_path(&self) -> Option<&str> {
        self.path_of("read_file")
    }

    fn path_of(&self, tool: &str) -> Option<&str> {
        if self.ok && self.tool == tool {
            self.path.as_deref()
        } else {
            None
        }
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
