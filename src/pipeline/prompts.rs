//! 各阶段的 system prompt 与哨兵

use crate::workflow::{ExecutionPlan, PlanStep, StepResult};

pub const PLAN_READY: &str = "[PLAN_READY]";
pub const STEP_COMPLETE: &str = "[STEP_COMPLETE]";
pub const RESEARCH_COMPLETE: &str = "[RESEARCH_COMPLETE]";

pub fn intent_prompt() -> String {
    r#"You classify requests sent to a coding assistant that works on a multi-repository workspace.

Categories:
- Question: the user wants information or an explanation about the code, nothing should change.
- Task: the user wants the code, tests, configuration or repository state to change.
- Greeting: small talk, thanks, hello.
- Unclear: none of the above, or too vague to act on.

Reply with exactly one JSON object and nothing else:
{"intent": "Question" | "Task" | "Greeting" | "Unclear", "confidence": 0.0-1.0, "reasoning": "one sentence"}"#
        .to_string()
}

pub fn planning_prompt(
    workspace_summary: &str,
    tools: &[(String, String)],
    plan_schema: &str,
    max_steps: usize,
) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|(name, desc)| format!("- {}: {}", name, desc))
        .collect();
    format!(
        r#"You are the planner of a coding assistant. Break the user's task into an ordered execution plan.

{workspace}
Tools the executor can use:
{tools}

Rules:
- At most {max} steps, stepId starting at 1 and increasing.
- A step may only depend on steps with a smaller stepId.
- targetFiles use the form repo/relative/path (repository directory first).
- Each step lists only the tools it needs, by exact name.
- You may inspect the workspace with the read-only tools before answering.

When the plan is ready, reply with a single JSON object matching this schema, followed by {marker}.
If you call the `finish` tool instead, put the JSON plan in `outcome`:
{schema}"#,
        workspace = workspace_summary,
        tools = tool_lines.join("\n"),
        max = max_steps,
        marker = PLAN_READY,
        schema = plan_schema,
    )
}

pub fn step_prompt(
    plan: &ExecutionPlan,
    step: &PlanStep,
    tools: &[String],
    dependency_results: &[&StepResult],
    workspace_summary: &str,
) -> String {
    let mut prompt = format!(
        "You are executing one step of a plan for the task: {}\n\n{}\nStep {}: {}\n",
        plan.task, workspace_summary, step.step_id, step.action
    );
    if !step.description.is_empty() {
        prompt.push_str(&format!("Description: {}\n", step.description));
    }
    if !step.expected_outcome.is_empty() {
        prompt.push_str(&format!("Expected outcome: {}\n", step.expected_outcome));
    }
    if !step.target_files.is_empty() {
        prompt.push_str(&format!("Target files: {}\n", step.target_files.join(", ")));
    }
    prompt.push_str(&format!("Allowed tools: {}\n", tools.join(", ")));
    if !dependency_results.is_empty() {
        prompt.push_str("\nResults of the steps this one depends on:\n");
        for r in dependency_results {
            prompt.push_str(&format!("- step {}: {}\n", r.step_id, r.outcome));
        }
    }
    prompt.push_str(&format!(
        "\nPaths are relative to the workspace root (repo/relative/path). Write complete file contents. \
When the step is done, call the `finish` tool with a short outcome, or end your reply with {}.",
        STEP_COMPLETE
    ));
    prompt
}

pub fn research_prompt(workspace_summary: &str) -> String {
    format!(
        "You answer questions about a multi-repository codebase. Nothing may be modified.\n\n{}\n\
Use the read-only tools to look at the relevant code, then answer precisely, citing files as repo/relative/path. \
When your answer is complete, call the `finish` tool with the complete answer as `outcome`, or end your reply with {}.",
        workspace_summary, RESEARCH_COMPLETE
    )
}

pub fn task_summary_prompt() -> String {
    r#"Summarize the execution of a coding task for the user. Reply with exactly one JSON object:
{"summary": "...", "accomplishments": ["..."], "filesChanged": {"created": [], "modified": [], "deleted": []}, "nextSteps": ["..."]}"#
        .to_string()
}

pub fn question_summary_prompt() -> String {
    r#"Summarize the research answer for the user. Reply with exactly one JSON object:
{"summary": "...", "keyFindings": ["..."], "filesReferenced": ["repo/relative/path"]}"#
        .to_string()
}
