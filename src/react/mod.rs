//! 认知层：有界 Agent 循环、过程事件与 JSON 提取

pub mod events;
pub mod json;
pub mod loop_;

pub use events::{ReactEvent, ToolTraceEntry};
pub use json::{extract_json_object, parse_json, strip_code_fences};
pub use loop_::{AgentLoop, LoopFailure, LoopOutcome, Termination, FINISH_TOOL};
