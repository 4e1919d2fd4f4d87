//! 汇总阶段：单轮无工具，模型输出 JSON SummaryResult
//!
//! 解析失败时使用确定性回退；无论是否解析成功，指标都由 StepResult 重新计算。

use crate::core::AgentError;
use crate::pipeline::research::ResearchOutcome;
use crate::pipeline::{prompts, StageContext};
use crate::react::parse_json;
use crate::workflow::{
    ExecutionPlan, FilesChanged, StepResult, StepStatus, SummaryMetrics, SummaryResult,
};

fn files_modified_union(results: &[StepResult]) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for f in results.iter().flat_map(|r| r.files_modified.iter()) {
        if !files.contains(f) {
            files.push(f.clone());
        }
    }
    files
}

/// 任务流程的回退汇总：数字全部来自 StepResult
pub fn task_fallback(plan: &ExecutionPlan, results: &[StepResult]) -> SummaryResult {
    let metrics = SummaryMetrics::from_results(results, plan.steps.len());
    let accomplishments: Vec<String> = results
        .iter()
        .filter(|r| r.is_completed())
        .map(|r| {
            let action = plan.step(r.step_id).map(|s| s.action.as_str()).unwrap_or("");
            if r.outcome.is_empty() {
                format!("Step {}: {}", r.step_id, action)
            } else {
                format!("Step {}: {}", r.step_id, r.outcome)
            }
        })
        .collect();

    let mut next_steps = Vec::new();
    for step in &plan.steps {
        match results.iter().find(|r| r.step_id == step.step_id) {
            Some(r) if r.status == StepStatus::Failed => {
                let reason = r.error.as_ref().map(|e| e.message.as_str()).unwrap_or("unknown error");
                next_steps.push(format!("Retry step {} ({}): {}", step.step_id, step.action, reason));
            }
            Some(r) if r.status == StepStatus::Skipped => {
                next_steps.push(format!("Step {} ({}) was skipped: {}", step.step_id, step.action, r.outcome));
            }
            None => next_steps.push(format!("Step {} ({}) was not attempted", step.step_id, step.action)),
            _ => {}
        }
    }

    SummaryResult {
        summary: format!(
            "Completed {} of {} steps for: {}",
            metrics.steps_completed, metrics.steps_total, plan.task
        ),
        accomplishments,
        files_changed: FilesChanged {
            modified: files_modified_union(results),
            ..Default::default()
        },
        metrics,
        next_steps,
        ..Default::default()
    }
}

/// 问答流程的回退汇总：原始研究文本即唯一发现
pub fn question_fallback(research: &ResearchOutcome) -> SummaryResult {
    SummaryResult {
        summary: research.text.clone(),
        key_findings: vec![research.text.clone()],
        files_referenced: research.files_referenced.clone(),
        ..Default::default()
    }
}

fn render_results(plan: &ExecutionPlan, results: &[StepResult]) -> String {
    let mut out = format!("Task: {}\nPlan ({} steps):\n", plan.task, plan.steps.len());
    for step in &plan.steps {
        let line = match results.iter().find(|r| r.step_id == step.step_id) {
            Some(r) => {
                let mut l = format!("- step {} [{:?}] {}: {}", step.step_id, r.status, step.action, r.outcome);
                if let Some(e) = &r.error {
                    l.push_str(&format!(" (error: {})", e.message));
                }
                if !r.files_modified.is_empty() {
                    l.push_str(&format!(" files: {}", r.files_modified.join(", ")));
                }
                l
            }
            None => format!("- step {} [NotAttempted] {}", step.step_id, step.action),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub async fn summarize_task(
    ctx: &StageContext<'_>,
    plan: &ExecutionPlan,
    results: &[StepResult],
) -> Result<SummaryResult, AgentError> {
    let outcome = ctx
        .agent_loop(prompts::task_summary_prompt())
        .with_max_iterations(1)
        .run(&render_results(plan, results))
        .await?;

    let mut summary = match parse_json::<SummaryResult>(&outcome.text) {
        Ok(s) if !s.summary.trim().is_empty() => s,
        Ok(_) => {
            tracing::warn!("summary reply has empty summary, using fallback");
            return Ok(task_fallback(plan, results));
        }
        Err(e) => {
            tracing::warn!(error = %e, "summary reply not parseable, using fallback");
            return Ok(task_fallback(plan, results));
        }
    };
    summary.metrics = SummaryMetrics::from_results(results, plan.steps.len());
    for f in files_modified_union(results) {
        if !summary.files_changed.created.contains(&f) && !summary.files_changed.modified.contains(&f) {
            summary.files_changed.modified.push(f);
        }
    }
    Ok(summary)
}

pub async fn summarize_question(
    ctx: &StageContext<'_>,
    question: &str,
    research: &ResearchOutcome,
) -> Result<SummaryResult, AgentError> {
    let input = format!("Question: {}\n\nResearch answer:\n{}", question, research.text);
    let outcome = ctx
        .agent_loop(prompts::question_summary_prompt())
        .with_max_iterations(1)
        .run(&input)
        .await?;

    let mut summary = match parse_json::<SummaryResult>(&outcome.text) {
        Ok(s) if !s.summary.trim().is_empty() => s,
        Ok(_) => return Ok(question_fallback(research)),
        Err(e) => {
            tracing::warn!(error = %e, "summary reply not parseable, using fallback");
            return Ok(question_fallback(research));
        }
    };
    summary.metrics = SummaryMetrics::default();
    for f in &research.files_referenced {
        if !summary.files_referenced.contains(f) {
            summary.files_referenced.push(f.clone());
        }
    }
    Ok(summary)
}
