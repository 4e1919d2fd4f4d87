//! 编排数据模型
//!
//! IntentResult、PlanStep、ExecutionPlan、StepResult、SummaryResult；对外序列化统一为 camelCase。

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::StepError;

pub type StepId = u32;

/// 请求意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Intent {
    Question,
    Task,
    Greeting,
    Unclear,
}

impl Intent {
    /// 大小写不敏感解析，未知值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "question" => Some(Intent::Question),
            "task" => Some(Intent::Task),
            "greeting" => Some(Intent::Greeting),
            "unclear" => Some(Intent::Unclear),
            _ => None,
        }
    }
}

/// 意图分类结果，每个请求产生一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f32,
    pub reasoning: String,
}

/// 计划中的一步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// 正整数，计划内唯一且递增
    pub step_id: StepId,
    pub action: String,
    #[serde(default)]
    pub description: String,
    /// 本步允许使用的工具
    #[serde(default)]
    pub tools: Vec<String>,
    /// `repo/relative/path` 形式
    #[serde(default)]
    pub target_files: Vec<String>,
    /// 依赖的 stepId，每个都必须小于本步 id
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    #[serde(default)]
    pub expected_outcome: String,
}

/// 执行计划：规划阶段产出，之后只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub task: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    pub confidence: f32,
}

impl ExecutionPlan {
    pub fn step(&self, step_id: StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

/// 单步执行结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    #[serde(with = "duration_millis", rename = "executionTimeMs")]
    pub execution_time: Duration,
    pub outcome: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepResult {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// 依赖未满足时的跳过结果
    pub fn skipped(step_id: StepId, reason: impl Into<String>) -> Self {
        Self {
            step_id,
            status: StepStatus::Skipped,
            execution_time: Duration::ZERO,
            outcome: reason.into(),
            files_modified: Vec::new(),
            confidence: 0.0,
            error: None,
        }
    }
}

/// 文件变更汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesChanged {
    #[serde(default)]
    pub created: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub deleted: Vec<String>,
}

/// 执行指标，总是由 StepResult 重新计算
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetrics {
    pub steps_completed: usize,
    pub steps_total: usize,
    pub success_rate: f32,
}

impl SummaryMetrics {
    pub fn from_results(results: &[StepResult], steps_total: usize) -> Self {
        let steps_completed = results.iter().filter(|r| r.is_completed()).count();
        let success_rate = if steps_total == 0 {
            0.0
        } else {
            steps_completed as f32 / steps_total as f32
        };
        Self {
            steps_completed,
            steps_total,
            success_rate,
        }
    }
}

/// 请求的最终产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    pub summary: String,
    /// 任务流程：完成了什么
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accomplishments: Vec<String>,
    /// 问答流程：关键发现
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub files_changed: FilesChanged,
    #[serde(default)]
    pub metrics: SummaryMetrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_referenced: Vec<String>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepErrorKind;

    #[test]
    fn test_intent_parse_is_case_insensitive() {
        assert_eq!(Intent::parse("TASK"), Some(Intent::Task));
        assert_eq!(Intent::parse(" question "), Some(Intent::Question));
        assert_eq!(Intent::parse("chitchat"), None);
    }

    #[test]
    fn test_plan_step_defaults_missing_fields() {
        let step: PlanStep =
            serde_json::from_str(r#"{"stepId": 2, "action": "Add field", "dependencies": [1]}"#).unwrap();
        assert_eq!(step.step_id, 2);
        assert!(step.tools.is_empty());
        assert_eq!(step.dependencies, vec![1]);
    }

    #[test]
    fn test_step_result_wire_shape() {
        let result = StepResult {
            step_id: 2,
            status: StepStatus::Failed,
            execution_time: Duration::from_millis(1500),
            outcome: String::new(),
            files_modified: vec![],
            confidence: 0.0,
            error: Some(StepError {
                kind: StepErrorKind::Fatal,
                message: "auth".to_string(),
                tool_involved: None,
                recoverable: false,
            }),
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["stepId"], 2);
        assert_eq!(v["status"], "Failed");
        assert_eq!(v["executionTimeMs"], 1500);
        assert_eq!(v["error"]["type"], "fatal");
        assert_eq!(v["error"]["recoverable"], false);
    }

    #[test]
    fn test_metrics_from_results() {
        let results = vec![
            StepResult {
                step_id: 1,
                status: StepStatus::Completed,
                execution_time: Duration::ZERO,
                outcome: "ok".to_string(),
                files_modified: vec![],
                confidence: 0.9,
                error: None,
            },
            StepResult::skipped(2, "dependencies not met"),
        ];
        let m = SummaryMetrics::from_results(&results, 4);
        assert_eq!(m.steps_completed, 1);
        assert_eq!(m.steps_total, 4);
        assert!((m.success_rate - 0.25).abs() < f32::EPSILON);
        assert_eq!(SummaryMetrics::from_results(&[], 0).success_rate, 0.0);
    }
}
