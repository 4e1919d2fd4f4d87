//! 编排流水线的各阶段：意图分类、规划、执行、研究、汇总
//!
//! 每个阶段都通过 StageContext 构造有界 Agent 循环，共享同一个网关、工具执行器与限流策略。

pub mod executor;
pub mod intent;
pub mod planner;
pub mod prompts;
pub mod research;
pub mod summary;

use tokio::sync::mpsc::UnboundedSender;

use crate::llm::{LlmClient, RateLimitPolicy};
use crate::react::{AgentLoop, ReactEvent};
use crate::tools::ToolExecutor;

pub use executor::ExecutionEngine;
pub use intent::{classify_intent, parse_intent};
pub use planner::{fallback_plan, parse_plan, plan_task, select_plan, PlanDraft};
pub use research::{research, ResearchOutcome};
pub use summary::{
    question_fallback, summarize_question, summarize_task, task_fallback,
};

/// 阶段共享的依赖
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub llm: &'a dyn LlmClient,
    pub executor: &'a ToolExecutor,
    pub retry: &'a RateLimitPolicy,
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> StageContext<'a> {
    pub fn new(llm: &'a dyn LlmClient, executor: &'a ToolExecutor, retry: &'a RateLimitPolicy) -> Self {
        Self {
            llm,
            executor,
            retry,
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: Option<&'a UnboundedSender<ReactEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    pub fn agent_loop(&self, system_prompt: impl Into<String>) -> AgentLoop<'a> {
        AgentLoop::new(self.llm, self.executor, self.retry, system_prompt).with_event_tx(self.event_tx)
    }
}
