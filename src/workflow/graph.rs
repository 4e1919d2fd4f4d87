//! 计划依赖图与计划校验
//!
//! 使用邻接表和入度表做拓扑排序；validate_plan 是执行前的硬性前置条件。

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::workflow::types::{ExecutionPlan, PlanStep, StepId, StepResult};

/// 计划不合法的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("plan has no steps")]
    Empty,

    #[error("plan has {count} steps, limit is {max}")]
    TooManySteps { count: usize, max: usize },

    #[error("step id must be positive")]
    NonPositiveId,

    #[error("duplicate step id {0}")]
    DuplicateId(StepId),

    #[error("step ids not in ascending order ({previous} then {current})")]
    NotAscending { previous: StepId, current: StepId },

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("step {step} depends on step {dependency}, which does not come before it")]
    ForwardDependency { step: StepId, dependency: StepId },

    #[error("dependency cycle detected")]
    Cycle,

    #[error("step {step} has invalid target file '{path}' (expected repo/relative/path)")]
    InvalidTargetFile { step: StepId, path: String },

    #[error("step {step} uses unavailable tool '{tool}'")]
    UnknownTool { step: StepId, tool: String },
}

/// 计划依赖图
pub struct PlanGraph {
    /// 邻接表：步骤 -> 依赖它的步骤
    pub adjacency: HashMap<StepId, Vec<StepId>>,
    /// 入度表：步骤 -> 依赖数
    pub in_degree: HashMap<StepId, usize>,
}

impl PlanGraph {
    pub fn new(steps: &[PlanStep]) -> Self {
        let mut adjacency: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut in_degree: HashMap<StepId, usize> = HashMap::new();
        for step in steps {
            in_degree.entry(step.step_id).or_insert(0);
            adjacency.entry(step.step_id).or_default();
        }
        for step in steps {
            for dep in &step.dependencies {
                adjacency.entry(*dep).or_default().push(step.step_id);
                *in_degree.entry(step.step_id).or_insert(0) += 1;
            }
        }
        Self { adjacency, in_degree }
    }

    /// Kahn 拓扑排序（同层按 id 升序）；存在环时返回 None
    pub fn topological_order(&self) -> Option<Vec<StepId>> {
        let mut in_degree = self.in_degree.clone();
        let mut ready: Vec<StepId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());
        while !ready.is_empty() {
            ready.sort_unstable_by(|a, b| b.cmp(a));
            let Some(id) = ready.pop() else { break };
            order.push(id);
            for next in self.adjacency.get(&id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(*next);
                    }
                }
            }
        }
        (order.len() == in_degree.len()).then_some(order)
    }
}

/// `repo/relative/path`：非空、非绝对、无 `..`、至少两段
pub fn is_repo_relative_path(path: &str) -> bool {
    let p = path.trim();
    if p.is_empty() || p.starts_with('/') || p.starts_with('\\') || p.contains(':') {
        return false;
    }
    let segments: Vec<&str> = p.split(['/', '\\']).collect();
    segments.len() >= 2 && segments.iter().all(|s| !s.is_empty() && *s != ".." && *s != ".")
}

/// 校验计划；available_tools 为注册表中的工具名
pub fn validate_plan(
    plan: &ExecutionPlan,
    max_steps: usize,
    available_tools: &[String],
) -> Result<(), PlanValidationError> {
    if plan.steps.is_empty() {
        return Err(PlanValidationError::Empty);
    }
    if plan.steps.len() > max_steps {
        return Err(PlanValidationError::TooManySteps {
            count: plan.steps.len(),
            max: max_steps,
        });
    }

    let mut seen: HashSet<StepId> = HashSet::new();
    let mut previous: Option<StepId> = None;
    for step in &plan.steps {
        if step.step_id == 0 {
            return Err(PlanValidationError::NonPositiveId);
        }
        if !seen.insert(step.step_id) {
            return Err(PlanValidationError::DuplicateId(step.step_id));
        }
        if let Some(prev) = previous {
            if step.step_id < prev {
                return Err(PlanValidationError::NotAscending {
                    previous: prev,
                    current: step.step_id,
                });
            }
        }
        previous = Some(step.step_id);
    }

    for step in &plan.steps {
        for dep in &step.dependencies {
            if !seen.contains(dep) {
                return Err(PlanValidationError::UnknownDependency {
                    step: step.step_id,
                    dependency: *dep,
                });
            }
            if *dep >= step.step_id {
                return Err(PlanValidationError::ForwardDependency {
                    step: step.step_id,
                    dependency: *dep,
                });
            }
        }
        if let Some(path) = step.target_files.iter().find(|p| !is_repo_relative_path(p)) {
            return Err(PlanValidationError::InvalidTargetFile {
                step: step.step_id,
                path: path.clone(),
            });
        }
        if let Some(tool) = step.tools.iter().find(|t| !available_tools.contains(*t)) {
            return Err(PlanValidationError::UnknownTool {
                step: step.step_id,
                tool: tool.clone(),
            });
        }
    }

    if PlanGraph::new(&plan.steps).topological_order().is_none() {
        return Err(PlanValidationError::Cycle);
    }
    Ok(())
}

/// 所有依赖都已 Completed
pub fn dependencies_met(step: &PlanStep, results: &[StepResult]) -> bool {
    step.dependencies.iter().all(|dep| {
        results
            .iter()
            .any(|r| r.step_id == *dep && r.is_completed())
    })
}
