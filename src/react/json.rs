//! 从模型回复中提取 JSON：去掉 ```json 代码块包裹，截取第一个 `{` 到最后一个 `}`

use serde::de::DeserializeOwned;

use crate::core::AgentError;
use crate::react::events::preview;

/// 去掉 Markdown 代码块（```json ... ``` 或 ``` ... ```）
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[start + 3..];
    // 跳过语言标记（json / JSON / 空）
    let rest = match rest.find('\n') {
        Some(nl) if rest[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &rest[nl + 1..],
        _ => rest,
    };
    match rest.find("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// 提取 JSON 对象文本；找不到成对花括号时返回 None
pub fn extract_json_object(text: &str) -> Option<&str> {
    let body = strip_code_fences(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

/// 提取并反序列化；失败时返回 AgentError::JsonParseError
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    let json_str = extract_json_object(text)
        .ok_or_else(|| AgentError::JsonParseError("no JSON object in response".to_string()))?;
    serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, preview(json_str, 200))))
}
