//! Bee Code - 多仓库编码助手编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、编排状态、会话存储、编排器
//! - **llm**: 模型网关抽象与实现（OpenAI 兼容 / Mock / Scripted）与限流重试
//! - **memory**: 对话消息模型
//! - **observability**: tracing 初始化
//! - **pipeline**: 意图分类、规划、执行、研究、汇总
//! - **react**: 有界 Agent 循环
//! - **sandbox**: 路径 / 大小 / 文件类型 / 命令校验
//! - **tools**: 沙箱内的文件、搜索、命令与 Git 工具及调度器
//! - **workflow**: 计划数据模型与依赖校验

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod react;
pub mod sandbox;
pub mod tools;
pub mod workflow;

pub use crate::core::{OrchestrationState, Orchestrator, SessionStatus};
