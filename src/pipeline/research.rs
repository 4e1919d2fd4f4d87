//! 研究阶段（问答流程）：只读工具的 Agent 循环，哨兵 [RESEARCH_COMPLETE]

use crate::core::AgentError;
use crate::pipeline::{prompts, StageContext};
use crate::react::{LoopOutcome, Termination};
use crate::tools::WorkspaceDescriptor;

/// 研究结果：回答文本与读过的文件
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub text: String,
    pub files_referenced: Vec<String>,
    pub termination: Termination,
}

/// 研究回答文本：结构化结束时取 finish outcome 与各轮回复中最长的一段（outcome 可能只是收尾语）
fn research_answer(outcome: &LoopOutcome) -> String {
    if outcome.termination != Termination::Structured {
        return outcome.text.clone();
    }
    outcome
        .candidates()
        .map(|t| t.replace(prompts::RESEARCH_COMPLETE, "").trim().to_string())
        .fold(String::new(), |best, t| {
            if t.chars().count() > best.chars().count() {
                t
            } else {
                best
            }
        })
}

pub async fn research(
    ctx: &StageContext<'_>,
    question: &str,
    workspace: &WorkspaceDescriptor,
    max_iterations: usize,
) -> Result<ResearchOutcome, AgentError> {
    let outcome = ctx
        .agent_loop(prompts::research_prompt(&workspace.summary()))
        .with_tools(&ctx.executor.read_only_tool_names())
        .with_sentinel(prompts::RESEARCH_COMPLETE)
        .with_max_iterations(max_iterations)
        .run(question)
        .await?;

    let mut files_referenced: Vec<String> = Vec::new();
    for path in outcome.trace.iter().filter_map(|t| t.read_path()) {
        if !files_referenced.iter().any(|f| f == path) {
            files_referenced.push(path.to_string());
        }
    }
    tracing::info!(
        termination = %outcome.termination,
        tool_calls = outcome.trace.len(),
        files = files_referenced.len(),
        "research finished"
    );
    Ok(ResearchOutcome {
        text: research_answer(&outcome),
        files_referenced,
        termination: outcome.termination,
    })
}
