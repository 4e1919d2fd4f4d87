//! 单次请求的编排状态
//!
//! 生命周期：创建时 Working，各阶段原地修改，到达终态（Complete / Error / NeedsClarification）后冻结。

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{ExecutionPlan, IntentResult, StepResult, SummaryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Working,
    Complete,
    Error,
    NeedsClarification,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Working)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationState {
    pub session_id: String,
    pub original_input: String,
    pub intent: Option<IntentResult>,
    pub plan: Option<ExecutionPlan>,
    pub step_results: Vec<StepResult>,
    pub summary: Option<SummaryResult>,
    pub final_response: String,
    pub status: SessionStatus,
    /// 各阶段耗时（intent / planning / execution / research / summary / total）
    #[serde(with = "metrics_millis", rename = "metricsMs")]
    pub metrics: BTreeMap<String, Duration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationState {
    pub fn new(session_id: impl Into<String>, input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            original_input: input.into(),
            intent: None,
            plan: None,
            step_results: Vec::new(),
            summary: None,
            final_response: String::new(),
            status: SessionStatus::Working,
            metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 累加某阶段耗时；终态后忽略
    pub fn record_metric(&mut self, stage: &str, elapsed: Duration) {
        if self.status.is_terminal() {
            tracing::debug!(session_id = %self.session_id, stage, "metric after terminal state ignored");
            return;
        }
        *self.metrics.entry(stage.to_string()).or_default() += elapsed;
        self.updated_at = Utc::now();
    }

    fn finish(&mut self, status: SessionStatus, response: String) {
        if self.status.is_terminal() {
            tracing::warn!(session_id = %self.session_id, status = ?self.status, "state already terminal");
            return;
        }
        self.status = status;
        self.final_response = response;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, response: impl Into<String>) {
        self.finish(SessionStatus::Complete, response.into());
    }

    /// 错误信息即最终回复，不编造汇总
    pub fn fail(&mut self, message: impl Into<String>) {
        self.finish(SessionStatus::Error, message.into());
    }

    pub fn needs_clarification(&mut self, question: impl Into<String>) {
        self.finish(SessionStatus::NeedsClarification, question.into());
    }
}

mod metrics_millis {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &BTreeMap<String, Duration>, s: S) -> Result<S::Ok, S::Error> {
        m.iter()
            .map(|(k, v)| (k.clone(), v.as_millis() as u64))
            .collect::<BTreeMap<String, u64>>()
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Duration>, D::Error> {
        let raw = BTreeMap::<String, u64>::deserialize(d)?;
        Ok(raw.into_iter().map(|(k, v)| (k, Duration::from_millis(v))).collect())
    }
}
