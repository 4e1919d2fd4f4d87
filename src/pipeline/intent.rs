//! 意图分类：单轮、无工具，解析失败时回退为 {Unclear, 0.5, "parse error"}

use serde::Deserialize;

use crate::core::AgentError;
use crate::pipeline::{prompts, StageContext};
use crate::react::parse_json;
use crate::workflow::{Intent, IntentResult};

#[derive(Debug, Deserialize)]
struct IntentDraft {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn fallback() -> IntentResult {
    IntentResult {
        intent: Intent::Unclear,
        confidence: 0.5,
        reasoning: "parse error".to_string(),
    }
}

/// 解析模型回复；任何格式问题都得到确定性的回退结果
pub fn parse_intent(text: &str) -> IntentResult {
    let draft: IntentDraft = match parse_json(text) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "intent reply not parseable, using fallback");
            return fallback();
        }
    };
    let Some(intent) = Intent::parse(&draft.intent) else {
        tracing::warn!(intent = %draft.intent, "unknown intent label, using fallback");
        return fallback();
    };
    let confidence = draft
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    IntentResult {
        intent,
        confidence,
        reasoning: draft.reasoning.unwrap_or_default(),
    }
}

/// 网关错误向上传播，解析错误就地回退
pub async fn classify_intent(ctx: &StageContext<'_>, input: &str) -> Result<IntentResult, AgentError> {
    let outcome = ctx
        .agent_loop(prompts::intent_prompt())
        .with_max_iterations(1)
        .run(input)
        .await?;
    let result = parse_intent(&outcome.text);
    tracing::info!(intent = ?result.intent, confidence = result.confidence, "intent classified");
    Ok(result)
}
