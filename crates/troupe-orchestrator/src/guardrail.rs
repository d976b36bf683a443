use crate::types::{GuardrailResult, TaskOutput};
use regex::Regex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};
use troupe_agent::{extract_json, CompletionClient};

#[allow(clippy::expect_used)]
static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**VERDICT\**\s*:\s*\**\s*(PASS|FAIL)\b").expect("verdict pattern is valid")
});

#[allow(clippy::expect_used)]
static REASON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**REASON\**\s*:\s*(.+)$").expect("reason pattern is valid")
});

const JUDGE_SYSTEM: &str = "You review the output of another agent against acceptance criteria. \
Reply with JSON only: {\"valid\": true|false, \"feedback\": \"what must change\"}.";

type GuardFn = dyn Fn(&TaskOutput) -> GuardrailResult + Send + Sync;

/// Validation applied to every attempt of a task.
#[derive(Clone)]
pub enum Guardrail {
    /// Deterministic check in code.
    Predicate(Arc<GuardFn>),
    /// A model judges the output against `criteria`.
    Judged {
        criteria: String,
        client: Arc<dyn CompletionClient>,
    },
}

impl Guardrail {
    /// Guardrail from a closure.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&TaskOutput) -> GuardrailResult + Send + Sync + 'static,
    {
        Guardrail::Predicate(Arc::new(f))
    }

    /// Guardrail judged by an LLM against `criteria`.
    pub fn judged(criteria: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        Guardrail::Judged {
            criteria: criteria.into(),
            client,
        }
    }

    /// Shorthand for [`GuardrailValidator::validate`].
    pub async fn validate(&self, output: &TaskOutput) -> GuardrailResult {
        GuardrailValidator::validate(output, self).await
    }
}

impl fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guardrail::Predicate(_) => f.write_str("Predicate(<fn>)"),
            Guardrail::Judged { criteria, .. } => f
                .debug_struct("Judged")
                .field("criteria", criteria)
                .finish_non_exhaustive(),
        }
    }
}

/// Runs guardrails. Never passes an output silently: a panicking predicate,
/// an unreachable judge or an unreadable verdict all reject.
pub struct GuardrailValidator;

impl GuardrailValidator {
    /// Validate `output`; any judge failure rejects.
    pub async fn validate(output: &TaskOutput, guardrail: &Guardrail) -> GuardrailResult {
        match guardrail {
            Guardrail::Predicate(f) => match catch_unwind(AssertUnwindSafe(|| f(output))) {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(task_id = %output.task_id, "Guardrail predicate panicked");
                    GuardrailResult::reject("guardrail check panicked")
                }
            },
            Guardrail::Judged { criteria, client } => {
                let prompt = format!(
                    "Acceptance criteria:\n{criteria}\n\nOutput to review:\n{}",
                    output.raw
                );
                match client.complete(JUDGE_SYSTEM, &prompt).await {
                    Ok(response) => parse_verdict(&response),
                    Err(e) => {
                        tracing::warn!(task_id = %output.task_id, error = %e, "Guardrail judge call failed");
                        GuardrailResult::reject(format!("guardrail judge unavailable: {e}"))
                    }
                }
            }
        }
    }
}

/// Parse a judge response: JSON `{"valid", "feedback"}` or `VERDICT:` / `REASON:` lines.
pub fn parse_verdict(response: &str) -> GuardrailResult {
    if let Some(value) = extract_json(response) {
        if let Some(valid) = value.get("valid").and_then(|v| v.as_bool()) {
            let feedback = value
                .get("feedback")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);
            return if valid {
                GuardrailResult {
                    is_valid: true,
                    message: feedback,
                }
            } else {
                GuardrailResult::reject(
                    feedback.unwrap_or_else(|| "rejected by guardrail judge".to_string()),
                )
            };
        }
    }

    if let Some(caps) = VERDICT_RE.captures(response) {
        let reason = REASON_RE
            .captures(response)
            .map(|c| c[1].trim().trim_matches('*').trim().to_string())
            .filter(|s| !s.is_empty());
        return if caps[1].eq_ignore_ascii_case("PASS") {
            GuardrailResult {
                is_valid: true,
                message: reason,
            }
        } else {
            GuardrailResult::reject(reason.unwrap_or_else(|| "rejected by guardrail judge".to_string()))
        };
    }

    GuardrailResult::reject(format!(
        "guardrail judge returned an unreadable verdict: {}",
        truncate(response.trim(), 120)
    ))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use troupe_agent::ExecutorError;
    use troupe_core::TaskId;

    struct Judge(Result<String, ExecutorError>);

    #[async_trait]
    impl CompletionClient for Judge {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ExecutorError> {
            assert!(prompt.contains("Acceptance criteria"));
            self.0.clone()
        }
    }

    fn output(raw: &str) -> TaskOutput {
        TaskOutput::completed(TaskId::from("t"), "a", raw)
    }

    #[tokio::test]
    async fn test_predicate_guardrail() {
        let guard = Guardrail::predicate(|o| {
            if o.raw.contains("maybe") {
                GuardrailResult::reject("answer must not contain 'maybe'")
            } else {
                GuardrailResult::accept()
            }
        });
        assert!(guard.validate(&output("yes")).await.is_valid);
        let rejected = guard.validate(&output("maybe")).await;
        assert!(!rejected.is_valid);
        assert!(rejected.message.unwrap().contains("maybe"));
    }

    #[tokio::test]
    async fn test_panicking_predicate_rejects() {
        let guard = Guardrail::predicate(|_| panic!("boom"));
        let result = guard.validate(&output("x")).await;
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_judged_guardrail_json_and_errors() {
        let pass = Guardrail::judged("be concise", Arc::new(Judge(Ok(r#"{"valid": true}"#.into()))));
        assert!(pass.validate(&output("short")).await.is_valid);

        let fail = Guardrail::judged(
            "be concise",
            Arc::new(Judge(Ok("```json\n{\"valid\": false, \"feedback\": \"too long\"}\n```".into()))),
        );
        let result = fail.validate(&output("long")).await;
        assert_eq!(result, GuardrailResult::reject("too long"));

        let down = Guardrail::judged("x", Arc::new(Judge(Err(ExecutorError::retryable("503")))));
        let result = down.validate(&output("x")).await;
        assert!(!result.is_valid);
        assert!(result.message.unwrap().contains("503"));
    }

    #[test]
    fn test_parse_verdict_line_format() {
        let pass = parse_verdict("VERDICT: PASS\nREASON: meets all criteria");
        assert!(pass.is_valid);
        assert_eq!(pass.message.as_deref(), Some("meets all criteria"));

        let fail = parse_verdict("Some preamble\n**VERDICT:** FAIL\n**REASON:** cites no sources");
        assert!(!fail.is_valid);
        assert_eq!(fail.message.as_deref(), Some("cites no sources"));
    }

    #[test]
    fn test_parse_verdict_unreadable_is_rejection() {
        let result = parse_verdict("Looks fine to me!");
        assert!(!result.is_valid);
        assert!(result.message.unwrap().contains("unreadable verdict"));

        let missing_flag = parse_verdict(r#"{"feedback": "ok"}"#);
        assert!(!missing_flag.is_valid);
    }
}
