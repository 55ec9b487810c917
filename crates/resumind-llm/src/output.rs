use serde::de::DeserializeOwned;
use tracing::debug;

use resumind_core::failure::{Failure, FailureKind, ModelCause};
use resumind_core::traits::{CapabilityResult, Generator};
use resumind_core::types::{GenerationRequest, Validate};

/// Apply heuristic repairs to model output.
/// - Strips markdown code fences
/// - Balances JSON braces
/// - Trims whitespace
pub fn heuristic_repair(output: &str) -> String {
    let mut result = strip_code_fences(output);
    result = result.trim().to_string();

    // Balance JSON braces if output looks like JSON
    if result.starts_with('{') || result.starts_with('[') {
        result = balance_braces(&result);
    }

    result
}

/// Parse and validate structured model output.
///
/// Anything that does not deserialize into `T`, or deserializes but fails
/// [`Validate`], becomes a `Generation(Validation)` failure.
pub fn parse_structured<T: DeserializeOwned + Validate>(raw: &str) -> CapabilityResult<T> {
    let repaired = heuristic_repair(raw);
    let value: T = serde_json::from_str(&repaired).map_err(|e| {
        debug!(error = %e, "Structured output did not parse");
        Failure::new(
            FailureKind::Generation(ModelCause::Validation),
            format!("output does not match the expected schema: {}", e),
        )
    })?;

    let issues = value.validate();
    if issues.is_empty() {
        Ok(value)
    } else {
        Err(Failure::new(
            FailureKind::Generation(ModelCause::Validation),
            issues.join("; "),
        ))
    }
}

/// Run a JSON-mode generation and parse the result into `T`.
pub async fn generate_structured<T: DeserializeOwned + Validate>(
    generator: &dyn Generator,
    request: GenerationRequest,
) -> CapabilityResult<T> {
    let raw = generator.generate(request.json()).await?;
    parse_structured(&raw)
}

/// Strip markdown code fences from text.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    // Try ```json ... ``` first
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    // Try ``` ... ```
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip optional language tag on same line
        let content_start = after.find('\n').map_or(0, |p| p + 1);
        let after = &after[content_start..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    trimmed.to_string()
}

/// Balance JSON braces/brackets by appending missing closers.
fn balance_braces(text: &str) -> String {
    let mut brace_depth: i32 = 0;
    let mut bracket_depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' => brace_depth += 1,
            '}' => brace_depth -= 1,
            '[' => bracket_depth += 1,
            ']' => bracket_depth -= 1,
            _ => {}
        }
    }

    let mut result = text.to_string();
    for _ in 0..bracket_depth {
        result.push(']');
    }
    for _ in 0..brace_depth {
        result.push('}');
    }
    result
}
