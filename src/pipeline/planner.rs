//! 规划阶段：带只读工具的 Agent 循环产出 JSON 计划，校验不通过一律回退为单步计划
//!
//! 计划的 JSON schema 由 schemars 从 PlanDraft 生成并写入 prompt。

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::AgentError;
use crate::pipeline::{prompts, StageContext};
use crate::react::parse_json;
use crate::tools::WorkspaceDescriptor;
use crate::workflow::{validate_plan, ExecutionPlan, PlanStep};

/// 规划阶段的回退计划 id
pub const FALLBACK_PLAN_ID: &str = "fallback";
/// 回退计划的置信度
pub const FALLBACK_CONFIDENCE: f32 = 0.3;
/// 模型未给出置信度时的默认值
const DEFAULT_PLAN_CONFIDENCE: f32 = 0.7;

/// 模型输出的计划（task 由调用方补齐）
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanDraft {
    #[serde(default)]
    pub plan_id: Option<String>,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl PlanDraft {
    pub fn into_plan(self, task: &str) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: self
                .plan_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            task: task.to_string(),
            steps: self.steps,
            risks: self.risks,
            required_tools: self.required_tools,
            confidence: self
                .confidence
                .filter(|c| c.is_finite())
                .unwrap_or(DEFAULT_PLAN_CONFIDENCE)
                .clamp(0.0, 1.0),
        }
    }
}

/// 计划 schema（JSON 文本）
pub fn plan_schema() -> String {
    let schema = schemars::schema_for!(PlanDraft);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 确定性的单步回退计划
pub fn fallback_plan(task: &str, tools: &[String]) -> ExecutionPlan {
    ExecutionPlan {
        plan_id: FALLBACK_PLAN_ID.to_string(),
        task: task.to_string(),
        steps: vec![PlanStep {
            step_id: 1,
            action: "Execute task".to_string(),
            description: task.to_string(),
            tools: tools.to_vec(),
            target_files: Vec::new(),
            dependencies: Vec::new(),
            expected_outcome: "The requested task is completed".to_string(),
        }],
        risks: Vec::new(),
        required_tools: tools.to_vec(),
        confidence: FALLBACK_CONFIDENCE,
    }
}

fn try_parse_plan(
    text: &str,
    task: &str,
    max_steps: usize,
    tools: &[String],
) -> Result<ExecutionPlan, String> {
    let plan = parse_json::<PlanDraft>(text)
        .map_err(|e| e.to_string())?
        .into_plan(task);
    validate_plan(&plan, max_steps, tools).map_err(|e| e.to_string())?;
    Ok(plan)
}

/// 解析并校验；任何失败都返回回退计划
pub fn parse_plan(text: &str, task: &str, max_steps: usize, tools: &[String]) -> ExecutionPlan {
    select_plan(std::iter::once(text), task, max_steps, tools)
}

/// 依次尝试候选文本，取第一个能解析且通过校验的计划；全部失败时返回回退计划
pub fn select_plan<'t>(
    candidates: impl IntoIterator<Item = &'t str>,
    task: &str,
    max_steps: usize,
    tools: &[String],
) -> ExecutionPlan {
    let mut last_error: Option<String> = None;
    for text in candidates {
        match try_parse_plan(text, task, max_steps, tools) {
            Ok(plan) => return plan,
            Err(e) => {
                tracing::debug!(error = %e, "plan candidate rejected");
                last_error = Some(e);
            }
        }
    }
    tracing::warn!(
        error = last_error.as_deref().unwrap_or("empty reply"),
        "no usable plan in replies, using fallback plan"
    );
    fallback_plan(task, tools)
}

/// 运行规划阶段；网关错误向上传播
pub async fn plan_task(
    ctx: &StageContext<'_>,
    task: &str,
    workspace: &WorkspaceDescriptor,
    max_steps: usize,
    max_iterations: usize,
) -> Result<ExecutionPlan, AgentError> {
    let registry = ctx.executor.registry();
    let prompt = prompts::planning_prompt(
        &workspace.summary(),
        &registry.tool_descriptions(),
        &plan_schema(),
        max_steps,
    );
    let outcome = ctx
        .agent_loop(prompt)
        .with_tools(&registry.read_only_names())
        .with_sentinel(prompts::PLAN_READY)
        .with_max_iterations(max_iterations)
        .run(task)
        .await?;
    let plan = select_plan(outcome.candidates(), task, max_steps, &registry.tool_names());
    tracing::info!(
        plan_id = %plan.plan_id,
        steps = plan.steps.len(),
        confidence = plan.confidence,
        "plan ready"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<String> {
        vec!["read_file".to_string(), "write_file".to_string()]
    }

    #[test]
    fn test_parse_valid_plan() {
        let text = r#"```json
{"planId": "p-1", "steps": [
  {"stepId": 1, "action": "Read model", "tools": ["read_file"], "targetFiles": ["api/src/User.cs"]},
  {"stepId": 2, "action": "Add field", "tools": ["write_file"], "dependencies": [1], "targetFiles": ["api/src/User.cs"]}
], "confidence": 0.8}
```
[PLAN_READY]"#;
        let plan = parse_plan(text, "add email", 15, &tools());
        assert_eq!(plan.plan_id, "p-1");
        assert_eq!(plan.task, "add email");
        assert_eq!(plan.steps.len(), 2);
        assert!((plan.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_missing_plan_id_gets_uuid() {
        let plan = parse_plan(r#"{"steps": [{"stepId": 1, "action": "a"}]}"#, "t", 15, &tools());
        assert!(uuid::Uuid::parse_str(&plan.plan_id).is_ok());
        assert!((plan.confidence - DEFAULT_PLAN_CONFIDENCE).abs() < 1e-6);
    }

    #[test]
    fn test_parse_failure_fallback_is_deterministic() {
        let a = parse_plan("not json at all", "add tests for Y", 15, &tools());
        let b = parse_plan("{\"steps\": [", "add tests for Y", 15, &tools());
        assert_eq!(a, b);
        assert_eq!(a, fallback_plan("add tests for Y", &tools()));
        assert_eq!(a.steps.len(), 1);
        assert_eq!(a.steps[0].step_id, 1);
        assert_eq!(a.steps[0].action, "Execute task");
        assert_eq!(a.steps[0].description, "add tests for Y");
        assert!((a.confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_plan_falls_back() {
        let forward = r#"{"steps": [{"stepId": 1, "action": "a", "dependencies": [2]}, {"stepId": 2, "action": "b"}]}"#;
        assert_eq!(parse_plan(forward, "t", 15, &tools()).plan_id, FALLBACK_PLAN_ID);
        let bad_tool = r#"{"steps": [{"stepId": 1, "action": "a", "tools": ["format_disk"]}]}"#;
        assert_eq!(parse_plan(bad_tool, "t", 15, &tools()).plan_id, FALLBACK_PLAN_ID);
        let too_many = r#"{"steps": [{"stepId": 1, "action": "a"}, {"stepId": 2, "action": "b"}]}"#;
        assert_eq!(parse_plan(too_many, "t", 1, &tools()).plan_id, FALLBACK_PLAN_ID);
    }

    #[test]
    fn test_earlier_reply_is_used_when_latest_is_not_a_plan() {
        let earlier = r#"{"planId": "p-2", "steps": [{"stepId": 1, "action": "Read model", "tools": ["read_file"]}]}"#;
        let plan = select_plan(["Plan is ready", earlier], "t", 15, &tools());
        assert_eq!(plan.plan_id, "p-2");

        let invalid_latest = r#"{"steps": [{"stepId": 1, "action": "a", "tools": ["format_disk"]}]}"#;
        let plan = select_plan([invalid_latest, earlier], "t", 15, &tools());
        assert_eq!(plan.plan_id, "p-2");

        let plan = select_plan(["nope", "still nope"], "t", 15, &tools());
        assert_eq!(plan, fallback_plan("t", &tools()));
    }

    #[test]
    fn test_schema_mentions_wire_fields() {
        let schema = plan_schema();
        assert!(schema.contains("stepId"));
        assert!(schema.contains("targetFiles"));
    }
}
