use crate::executor::ExecutorError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced json pattern is valid")
});

/// Plain prompt/response LLM client.
///
/// Used where the engine itself needs a model's judgement: LLM-judged
/// guardrails and [`crate::CompletionManager`].
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ExecutorError>;
}

/// Pull a JSON object out of a model response.
///
/// Accepts a bare object, an object inside a fenced code block, or an object
/// embedded in surrounding prose.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(value);
    }

    if let Some(caps) = FENCED_JSON_RE.captures(trimmed) {
        if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(&caps[1]) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value),
        _ => None,
    }
}
