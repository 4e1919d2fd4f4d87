//! 执行引擎：按 stepId 升序逐步执行计划
//!
//! - 依赖中任一步未 Completed：记为 Skipped（"dependencies not met"），不执行
//! - 否则为该步运行一次 Agent 循环（哨兵 [STEP_COMPLETE] / finish 工具）
//! - 循环失败经 RecoveryEngine 归类为 Failed；不可恢复时停止调度，剩余步骤没有结果

use std::time::Instant;

use crate::config::OrchestratorSection;
use crate::core::RecoveryEngine;
use crate::pipeline::{prompts, StageContext};
use crate::react::LoopOutcome;
use crate::tools::WorkspaceDescriptor;
use crate::workflow::{dependencies_met, ExecutionPlan, PlanStep, StepResult, StepStatus};

/// 明确宣告完成时的置信度
const EXPLICIT_CONFIDENCE: f32 = 0.9;
/// 隐式完成或达到迭代上限时的置信度
const IMPLICIT_CONFIDENCE: f32 = 0.6;

pub struct ExecutionEngine {
    recovery: RecoveryEngine,
    step_max_iterations: usize,
    outcome_max_chars: usize,
}

impl ExecutionEngine {
    pub fn new(step_max_iterations: usize, outcome_max_chars: usize) -> Self {
        Self {
            recovery: RecoveryEngine::new(),
            step_max_iterations: step_max_iterations.max(1),
            outcome_max_chars,
        }
    }

    pub fn from_config(cfg: &OrchestratorSection) -> Self {
        Self::new(cfg.step_max_iterations, cfg.outcome_max_chars)
    }

    /// 计划中为空的工具列表表示可用全部工具
    fn step_tools(&self, ctx: &StageContext<'_>, step: &PlanStep) -> Vec<String> {
        if step.tools.is_empty() {
            ctx.executor.tool_names()
        } else {
            step.tools
                .iter()
                .filter(|t| ctx.executor.has_tool(t))
                .cloned()
                .collect()
        }
    }

    fn completed(&self, step: &PlanStep, outcome: LoopOutcome, started: Instant) -> StepResult {
        let confidence = if outcome.termination.is_explicit() {
            EXPLICIT_CONFIDENCE
        } else {
            IMPLICIT_CONFIDENCE
        };
        StepResult {
            step_id: step.step_id,
            status: StepStatus::Completed,
            execution_time: started.elapsed(),
            outcome: truncate_chars(&outcome.text, self.outcome_max_chars),
            files_modified: outcome.files_written(),
            confidence,
            error: None,
        }
    }

    /// 返回的结果按 stepId 升序，数量不超过步骤数
    pub async fn execute(
        &self,
        ctx: &StageContext<'_>,
        plan: &ExecutionPlan,
        workspace: &WorkspaceDescriptor,
    ) -> Vec<StepResult> {
        let workspace_summary = workspace.summary();
        let mut results: Vec<StepResult> = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            if !dependencies_met(step, &results) {
                tracing::info!(step = step.step_id, "dependencies not met, skipping step");
                results.push(StepResult::skipped(step.step_id, "dependencies not met"));
                continue;
            }

            let tools = self.step_tools(ctx, step);
            let dependency_results: Vec<&StepResult> = results
                .iter()
                .filter(|r| step.dependencies.contains(&r.step_id))
                .collect();
            let prompt = prompts::step_prompt(plan, step, &tools, &dependency_results, &workspace_summary);

            tracing::info!(step = step.step_id, action = %step.action, "executing step");
            let started = Instant::now();
            let run = ctx
                .agent_loop(prompt)
                .with_tools(&tools)
                .with_sentinel(prompts::STEP_COMPLETE)
                .with_max_iterations(self.step_max_iterations)
                .run(&format!("Execute step {}: {}", step.step_id, step.action))
                .await;

            match run {
                Ok(outcome) => {
                    let result = self.completed(step, outcome, started);
                    tracing::info!(
                        step = step.step_id,
                        files = result.files_modified.len(),
                        confidence = result.confidence,
                        "step completed"
                    );
                    results.push(result);
                }
                Err(failure) => {
                    let error = self.recovery.classify(&failure.error, failure.last_tool.clone());
                    let recoverable = error.recoverable;
                    tracing::warn!(
                        step = step.step_id,
                        error = %failure.error,
                        recoverable,
                        "step failed"
                    );
                    results.push(StepResult {
                        step_id: step.step_id,
                        status: StepStatus::Failed,
                        execution_time: started.elapsed(),
                        outcome: String::new(),
                        files_modified: Vec::new(),
                        confidence: 0.0,
                        error: Some(error),
                    });
                    if !recoverable {
                        tracing::warn!(
                            step = step.step_id,
                            remaining = plan.steps.len() - results.len(),
                            "non-recoverable failure, aborting remaining steps"
                        );
                        break;
                    }
                }
            }
        }
        results
    }
}

/// 按字符截断（不拆分 UTF-8）
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepErrorKind;
    use crate::llm::{LlmError, LlmResponse, RateLimitPolicy, ScriptedLlmClient};
    use crate::memory::ToolCall;
    use crate::tools::{Tool, ToolExecutor, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FakeWrite;

    #[async_trait]
    impl Tool for FakeWrite {
        fn name(&self) -> &str {
            "write_file"
        }
        fn description(&self) -> &str {
            "write"
        }
        fn resolved_path(&self, args: &Value) -> Option<String> {
            args["path"].as_str().map(String::from)
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(format!("Created {}", args["path"].as_str().unwrap_or("?")))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(FakeWrite);
        ToolExecutor::new(registry, 5)
    }

    fn step(id: u32, deps: &[u32]) -> PlanStep {
        PlanStep {
            step_id: id,
            action: format!("action {}", id),
            description: String::new(),
            tools: vec!["write_file".to_string()],
            target_files: vec![],
            dependencies: deps.to_vec(),
            expected_outcome: String::new(),
        }
    }

    fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: "p".to_string(),
            task: "task".to_string(),
            steps,
            risks: vec![],
            required_tools: vec![],
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn test_completed_step_records_files_and_confidence() {
        let llm = ScriptedLlmClient::new(vec![
            Ok(LlmResponse::tool_calls(vec![ToolCall {
                id: "c1".to_string(),
                name: "write_file".to_string(),
                arguments: json!({"path": "api/src/User.cs", "content": "x"}),
            }])),
            Ok(LlmResponse::text("Added the field. [STEP_COMPLETE]")),
        ]);
        let exec = executor();
        let policy = RateLimitPolicy::default();
        let ctx = StageContext::new(&llm, &exec, &policy);
        let engine = ExecutionEngine::new(5, 500);
        let results = engine
            .execute(&ctx, &plan(vec![step(1, &[])]), &WorkspaceDescriptor::default())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, StepStatus::Completed);
        assert_eq!(results[0].outcome, "Added the field.");
        assert_eq!(results[0].files_modified, vec!["api/src/User.cs".to_string()]);
        assert!((results[0].confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_outcome_truncated_and_implicit_confidence() {
        let long = "x".repeat(800);
        let llm = ScriptedLlmClient::new(vec![
            Ok(LlmResponse::text("thinking")),
            Ok(LlmResponse::text(long)),
        ]);
        let exec = executor();
        let policy = RateLimitPolicy::default();
        let ctx = StageContext::new(&llm, &exec, &policy);
        let results = ExecutionEngine::new(5, 500)
            .execute(&ctx, &plan(vec![step(1, &[])]), &WorkspaceDescriptor::default())
            .await;
        assert_eq!(results[0].outcome.chars().count(), 500);
        assert!((results[0].confidence - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_recoverable_failure_skips_dependents_and_continues() {
        let llm = ScriptedLlmClient::new(vec![
            Err(LlmError::RequestFailed("502".to_string())),
            Ok(LlmResponse::text("independent done [STEP_COMPLETE]")),
        ]);
        let exec = executor();
        let policy = RateLimitPolicy::default();
        let ctx = StageContext::new(&llm, &exec, &policy);
        let results = ExecutionEngine::new(5, 500)
            .execute(
                &ctx,
                &plan(vec![step(1, &[]), step(2, &[1]), step(3, &[])]),
                &WorkspaceDescriptor::default(),
            )
            .await;
        let statuses: Vec<StepStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Failed, StepStatus::Skipped, StepStatus::Completed]
        );
        let err = results[0].error.as_ref().unwrap();
        assert_eq!(err.kind, StepErrorKind::Gateway);
        assert!(err.recoverable);
        assert_eq!(results[1].outcome, "dependencies not met");
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_remaining_steps() {
        let llm = ScriptedLlmClient::new(vec![
            Ok(LlmResponse::text("step one done [STEP_COMPLETE]")),
            Err(LlmError::AuthFailed("invalid api key".to_string())),
        ]);
        let exec = executor();
        let policy = RateLimitPolicy::default();
        let ctx = StageContext::new(&llm, &exec, &policy);
        let results = ExecutionEngine::new(5, 500)
            .execute(
                &ctx,
                &plan(vec![step(1, &[]), step(2, &[1]), step(3, &[])]),
                &WorkspaceDescriptor::default(),
            )
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].status, StepStatus::Failed);
        assert!(!results[1].error.as_ref().unwrap().recoverable);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_step_prompt_carries_dependency_outcomes() {
        let llm = ScriptedLlmClient::new(vec![
            Ok(LlmResponse::text("created model [STEP_COMPLETE]")),
            Ok(LlmResponse::text("wired controller [STEP_COMPLETE]")),
        ]);
        let exec = executor();
        let policy = RateLimitPolicy::default();
        let ctx = StageContext::new(&llm, &exec, &policy);
        ExecutionEngine::new(5, 500)
            .execute(
                &ctx,
                &plan(vec![step(1, &[]), step(2, &[1])]),
                &WorkspaceDescriptor::default(),
            )
            .await;
        let second = llm.requests()[1].system_prompt().to_string();
        assert!(second.contains("- step 1: created model"));
        assert!(second.contains("Allowed tools: write_file"));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
