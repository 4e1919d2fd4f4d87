//! 安全沙箱：所有文件系统与进程副作用执行前的纯校验函数
//!
//! - validate_path：路径必须落在工作区内，且原始输入不得含 `..` 段，也不得位于系统目录
//! - validate_size：读写统一的字节上限
//! - is_text_file：排除二进制 / 媒体扩展名
//! - validate_command：先查危险模式，再查白名单
//!
//! 校验失败返回 SandboxViolation（而不是 panic / 中断阶段），由工具层转成文本交还给模型。

pub mod command;
pub mod path;
pub mod policy;

pub use policy::{SandboxViolation, SecurityPolicy};
