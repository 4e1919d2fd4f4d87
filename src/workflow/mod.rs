//! 编排数据模型与计划依赖图

pub mod graph;
pub mod types;

pub use graph::{dependencies_met, is_repo_relative_path, validate_plan, PlanGraph, PlanValidationError};
pub use types::{
    ExecutionPlan, FilesChanged, Intent, IntentResult, PlanStep, StepId, StepResult, StepStatus,
    SummaryMetrics, SummaryResult,
};
