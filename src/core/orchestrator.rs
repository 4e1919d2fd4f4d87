//! 编排器：单次请求的状态机
//!
//! 输入 -> 意图分类 -> { 规划 -> 执行 -> 汇总 } | { 研究 -> 汇总 } | 固定回复。
//! 路由是对 Intent 的封闭 match；任何从阶段中逃逸的错误都把会话置为 Error，错误信息即最终回复。
//! 状态在创建时与到达终态时写入 SessionStore。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::config::{AppConfig, OrchestratorSection};
use crate::core::session_store::{MemorySessionStore, SessionStore};
use crate::core::state::OrchestrationState;
use crate::core::AgentError;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RateLimitPolicy};
use crate::pipeline::{self, ExecutionEngine, StageContext};
use crate::react::ReactEvent;
use crate::sandbox::SecurityPolicy;
use crate::tools::{default_registry, ToolExecutor, WorkspaceDescriptor, WorkspaceLocks};
use crate::workflow::{Intent, SummaryResult};

const GREETING_REPLY: &str = "Hello! I can answer questions about the code in this workspace or make changes across its repositories. What would you like to do?";
const UNCLEAR_REPLY: &str = "I'm not sure what you'd like me to do. Ask a question about the code, or describe a change you want made.";
const CLARIFY_REPLY: &str = "Could you clarify your request? Tell me which repository or files it concerns and whether you want an explanation or a code change.";

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if provider != "mock" && !key.trim().is_empty() => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &key,
                cfg.llm.request_timeout_secs,
            ))
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not set or provider=mock, using mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 流水线正常结束时的终态回复
enum Reply {
    Complete(String),
    NeedsClarification(String),
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    retry: RateLimitPolicy,
    engine: ExecutionEngine,
    config: OrchestratorSection,
    workspace_root: PathBuf,
    sessions: Arc<dyn SessionStore>,
    event_tx: Option<UnboundedSender<ReactEvent>>,
}

impl Orchestrator {
    /// 按配置组装：沙箱策略、仓库锁、工具注册表、会话存储
    pub fn new(cfg: &AppConfig, llm: Arc<dyn LlmClient>, workspace_root: impl AsRef<Path>) -> Self {
        let workspace_root = workspace_root.as_ref().to_path_buf();
        let policy = Arc::new(SecurityPolicy::from_config(&workspace_root, cfg));
        let locks = Arc::new(WorkspaceLocks::new(&workspace_root));
        let registry = default_registry(cfg, policy, locks);
        let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(
            Duration::from_secs(cfg.session.ttl_secs),
            cfg.session.max_sessions,
        ));
        Self::with_parts(llm, executor, workspace_root, cfg.orchestrator.clone(), sessions)
    }

    pub fn with_parts(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        workspace_root: PathBuf,
        config: OrchestratorSection,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            llm,
            executor,
            retry: RateLimitPolicy::new(
                config.rate_limit_default_delay_secs,
                config.rate_limit_max_delay_secs,
            ),
            engine: ExecutionEngine::from_config(&config),
            config,
            workspace_root,
            sessions,
            event_tx: None,
        }
    }

    /// 设置循环过程事件的接收端
    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub async fn process(&self, input: &str) -> OrchestrationState {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.process_in_session(&session_id, input).await
    }

    pub async fn process_in_session(&self, session_id: &str, input: &str) -> OrchestrationState {
        let expired = self.sessions.cleanup_expired();
        if expired > 0 {
            tracing::debug!(expired, "expired sessions cleaned up");
        }

        let mut state = OrchestrationState::new(session_id, input);
        self.sessions.put(state.clone());
        tracing::info!(session_id = %session_id, "request started");

        let started = Instant::now();
        let result = self.run_pipeline(&mut state).await;
        // total 在终态之前记录，终态后状态冻结
        state.record_metric("total", started.elapsed());
        match result {
            Ok(Reply::Complete(response)) => state.complete(response),
            Ok(Reply::NeedsClarification(question)) => state.needs_clarification(question),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "pipeline failed");
                state.fail(e.to_string());
            }
        }

        tracing::info!(
            session_id = %session_id,
            status = ?state.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );
        self.sessions.put(state.clone());
        state
    }

    async fn scan_workspace(&self) -> Result<WorkspaceDescriptor, AgentError> {
        let root = self.workspace_root.clone();
        tokio::task::spawn_blocking(move || WorkspaceDescriptor::scan(root))
            .await
            .map_err(|e| AgentError::Fatal(format!("workspace scan failed: {}", e)))
    }

    async fn run_pipeline(&self, state: &mut OrchestrationState) -> Result<Reply, AgentError> {
        let ctx = StageContext::new(self.llm.as_ref(), &self.executor, &self.retry)
            .with_event_tx(self.event_tx.as_ref());
        let input = state.original_input.clone();

        let t = Instant::now();
        let intent = pipeline::classify_intent(&ctx, &input).await?;
        state.record_metric("intent", t.elapsed());
        state.intent = Some(intent.clone());

        let reply = match intent.intent {
            Intent::Task => {
                let workspace = self.scan_workspace().await?;

                let t = Instant::now();
                let plan = pipeline::plan_task(
                    &ctx,
                    &input,
                    &workspace,
                    self.config.max_plan_steps,
                    self.config.planning_max_iterations,
                )
                .await?;
                state.record_metric("planning", t.elapsed());
                state.plan = Some(plan.clone());

                let t = Instant::now();
                let results = self.engine.execute(&ctx, &plan, &workspace).await;
                state.record_metric("execution", t.elapsed());
                state.step_results = results;

                let t = Instant::now();
                let summary = pipeline::summarize_task(&ctx, &plan, &state.step_results).await?;
                state.record_metric("summary", t.elapsed());
                let response = render_response(&summary);
                state.summary = Some(summary);
                Reply::Complete(response)
            }
            Intent::Question => {
                let workspace = self.scan_workspace().await?;

                let t = Instant::now();
                let research = pipeline::research(
                    &ctx,
                    &input,
                    &workspace,
                    self.config.research_max_iterations,
                )
                .await?;
                state.record_metric("research", t.elapsed());

                let t = Instant::now();
                let summary = pipeline::summarize_question(&ctx, &input, &research).await?;
                state.record_metric("summary", t.elapsed());
                let response = render_response(&summary);
                state.summary = Some(summary);
                Reply::Complete(response)
            }
            Intent::Greeting => Reply::Complete(GREETING_REPLY.to_string()),
            Intent::Unclear if intent.confidence < self.config.clarification_threshold => {
                Reply::NeedsClarification(CLARIFY_REPLY.to_string())
            }
            Intent::Unclear => Reply::Complete(UNCLEAR_REPLY.to_string()),
        };
        Ok(reply)
    }
}

fn push_section(out: &mut String, title: &str, items: &[String], skip: &str) {
    let items: Vec<&String> = items.iter().filter(|i| i.trim() != skip).collect();
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n\n{}:", title));
    for item in items {
        out.push_str(&format!("\n- {}", item));
    }
}

/// 汇总渲染为给用户的文字回复
fn render_response(summary: &SummaryResult) -> String {
    let head = summary.summary.trim();
    let mut out = head.to_string();
    push_section(&mut out, "Accomplished", &summary.accomplishments, head);
    push_section(&mut out, "Key findings", &summary.key_findings, head);
    let mut changed: Vec<String> = Vec::new();
    changed.extend(summary.files_changed.created.iter().map(|f| format!("created {}", f)));
    changed.extend(summary.files_changed.modified.iter().map(|f| format!("modified {}", f)));
    changed.extend(summary.files_changed.deleted.iter().map(|f| format!("deleted {}", f)));
    push_section(&mut out, "Files", &changed, head);
    push_section(&mut out, "Next steps", &summary.next_steps, head);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::SessionStatus;
    use crate::llm::{LlmError, LlmResponse, ScriptedLlmClient};
    use crate::tools::ToolRegistry;

    fn orchestrator(llm: Arc<ScriptedLlmClient>) -> Orchestrator {
        let sessions: Arc<dyn SessionStore> =
            Arc::new(MemorySessionStore::new(Duration::from_secs(60), 16));
        Orchestrator::with_parts(
            llm,
            ToolExecutor::new(ToolRegistry::new(), 5),
            PathBuf::from("/nonexistent-bee-workspace"),
            OrchestratorSection::default(),
            sessions,
        )
    }

    #[tokio::test]
    async fn test_greeting_gets_canned_reply() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(LlmResponse::text(
            r#"{"intent": "Greeting", "confidence": 0.99, "reasoning": "hi"}"#,
        ))]));
        let orch = orchestrator(llm.clone());
        let state = orch.process_in_session("s1", "hello!").await;
        assert_eq!(state.status, SessionStatus::Complete);
        assert_eq!(state.final_response, GREETING_REPLY);
        assert!(state.plan.is_none());
        assert_eq!(llm.call_count(), 1);
        assert!(state.metrics["total"] >= state.metrics["intent"]);
        let stored = orch.sessions().get("s1").unwrap();
        assert_eq!(stored.status, SessionStatus::Complete);
        assert_eq!(stored.metrics, state.metrics);
        assert_eq!(stored.updated_at, state.updated_at);
    }

    #[tokio::test]
    async fn test_unparseable_intent_is_unclear_and_complete() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(LlmResponse::text("hmm"))]));
        let state = orchestrator(llm).process("???").await;
        assert_eq!(state.intent.as_ref().unwrap().intent, Intent::Unclear);
        assert_eq!(state.status, SessionStatus::Complete);
        assert_eq!(state.final_response, UNCLEAR_REPLY);
    }

    #[tokio::test]
    async fn test_low_confidence_unclear_needs_clarification() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(LlmResponse::text(
            r#"{"intent": "Unclear", "confidence": 0.1, "reasoning": "vague"}"#,
        ))]));
        let state = orchestrator(llm).process("do the thing").await;
        assert_eq!(state.status, SessionStatus::NeedsClarification);
        assert_eq!(state.final_response, CLARIFY_REPLY);
        assert!(state.metrics.contains_key("total"));
    }

    #[tokio::test]
    async fn test_gateway_error_sets_error_status() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::RequestFailed(
            "connection refused".to_string(),
        ))]));
        let state = orchestrator(llm).process("hello").await;
        assert_eq!(state.status, SessionStatus::Error);
        assert!(state.final_response.contains("connection refused"));
        assert!(state.summary.is_none());
        assert!(state.metrics.contains_key("total"));
    }

    #[test]
    fn test_render_response_lists_sections() {
        let summary = SummaryResult {
            summary: "Done".to_string(),
            accomplishments: vec!["Step 1: added field".to_string()],
            next_steps: vec!["Run tests".to_string()],
            ..Default::default()
        };
        let text = render_response(&summary);
        assert!(text.starts_with("Done"));
        assert!(text.contains("Accomplished:\n- Step 1: added field"));
        assert!(text.contains("Next steps:\n- Run tests"));
    }
}
