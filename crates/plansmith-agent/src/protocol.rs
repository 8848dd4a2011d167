use indexmap::IndexMap;
use plansmith_core::{PlanStep, StructuredPlan};
use serde_json::Value;

/// A model response routed either through extraction or straight to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanInput {
    Text(String),
    Structured(StructuredPlan),
}

impl PlanInput {
    /// Treats the response as a structured plan only when the whole response
    /// (optionally fenced) is one JSON object. That object either carries a
    /// `steps` list or maps file paths to their full contents; the latter
    /// becomes one write step per entry, in document order.
    pub fn from_response(text: &str) -> Self {
        parse_structured_plan(text)
            .map(Self::Structured)
            .unwrap_or_else(|| Self::Text(text.to_string()))
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }
}

impl From<StructuredPlan> for PlanInput {
    fn from(plan: StructuredPlan) -> Self {
        Self::Structured(plan)
    }
}

impl From<String> for PlanInput {
    fn from(text: String) -> Self {
        Self::from_response(&text)
    }
}

impl From<&str> for PlanInput {
    fn from(text: &str) -> Self {
        Self::from_response(text)
    }
}

fn parse_structured_plan(text: &str) -> Option<StructuredPlan> {
    let cleaned = strip_code_fences(text);
    if !cleaned.starts_with('{') {
        return None;
    }
    let end = find_matching_brace(cleaned, 0)?;
    if !cleaned[end + 1..].trim().is_empty() {
        return None;
    }
    let object = &cleaned[..=end];
    let value: Value = serde_json::from_str(object).ok()?;
    if let Some(steps) = value.get("steps") {
        if !steps.is_array() {
            return None;
        }
        return serde_json::from_value(value).ok();
    }
    parse_file_map(object)
}

/// `{"path": "content", ...}`: every value must be a string.
fn parse_file_map(object: &str) -> Option<StructuredPlan> {
    let files: IndexMap<String, Value> = serde_json::from_str(object).ok()?;
    if files.is_empty() {
        return None;
    }
    let steps = files
        .into_iter()
        .map(|(path, content)| match content {
            Value::String(content) => Some(PlanStep::write(path, content)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(StructuredPlan {
        steps,
        expected_outcome: None,
    })
}

/// Strip one wrapping markdown fence (```json ... ``` or ``` ... ```).
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

/// Find the index of the closing `}` that matches the `{` at `start`.
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        if b == b'\\' && in_string {
            escape_next = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
