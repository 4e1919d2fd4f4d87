//! 记忆层：单次请求内的对话消息

pub mod conversation;

pub use conversation::{Message, Role, ToolCall};
