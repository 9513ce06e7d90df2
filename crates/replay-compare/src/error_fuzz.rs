//! Error-message normalization.
//!
//! Recorded expectations and live envelopes describe the same failure in
//! different words: `Failed to execute API: Tools.get_repo_branch_invoke() ...`
//! on one side, `Error: GetRepoBranch.invoke() ...` on the other. Both are
//! reduced to the second form before comparison.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

const ERROR_PREFIX: &str = "Error: ";
const EXECUTE_PREFIX: &str = "Failed to execute API: ";
const NAMESPACE_PREFIX: &str = "Tools.";

static EXECUTING_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Error executing API[^:]*:\s*").expect("valid regex"));

static INVOKE_SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z][A-Za-z0-9_]*?)_invoke\b").expect("valid regex"));

static SIGNATURE_CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^Error: (?P<func>[A-Za-z0-9_]+\.invoke)\(\) (?P<class>got an unexpected keyword argument|missing \d+ required positional arguments?)",
    )
    .expect("valid regex")
});

/// True for `{error: ..}` objects, `{status: "error"}` envelopes, and
/// strings already rendered as an error.
pub fn is_error_value(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key("error")
                || map.get("status").and_then(Value::as_str) == Some("error")
        }
        Value::String(s) => {
            let s = s.trim_start();
            s.starts_with(ERROR_PREFIX)
                || s.starts_with(EXECUTE_PREFIX)
                || EXECUTING_PREFIX_RE.is_match(s)
        }
        _ => false,
    }
}

/// The human-readable message carried by an error value.
pub fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["message", "error"]
            .iter()
            .find_map(|key| match map.get(*key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            }),
        _ => None,
    }
}

fn pascal_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Rewrites an error message to `Error: <Pascal>.invoke(<rest>)` form.
pub fn normalize_error_message(message: &str) -> String {
    let mut text = message.trim();
    if let Some(rest) = text.strip_prefix(ERROR_PREFIX) {
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_prefix(EXECUTE_PREFIX) {
        text = rest;
    }
    let text = EXECUTING_PREFIX_RE.replace(text, "");
    let text = text.strip_prefix(NAMESPACE_PREFIX).unwrap_or(&text);
    let text = INVOKE_SYMBOL_RE.replace_all(text, |caps: &Captures| {
        format!("{}.invoke", pascal_case(&caps[1]))
    });
    format!("{}{}", ERROR_PREFIX, text)
}

/// Equal when the normalized messages match, or when both are signature
/// errors of the same function and class that differ only in the names
/// they quote.
pub fn errors_equivalent(a: &str, b: &str) -> bool {
    let a = normalize_error_message(a);
    let b = normalize_error_message(b);
    if a == b {
        return true;
    }
    match (SIGNATURE_CLASS_RE.captures(&a), SIGNATURE_CLASS_RE.captures(&b)) {
        (Some(ca), Some(cb)) => ca["func"] == cb["func"] && ca["class"] == cb["class"],
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_envelope_and_recorded_forms_alike() {
        assert_eq!(
            normalize_error_message(
                "Failed to execute API: Tools.get_repo_branch_invoke() got an unexpected keyword argument 'repo_name'"
            ),
            "Error: GetRepoBranch.invoke() got an unexpected keyword argument 'repo_name'"
        );
        assert_eq!(
            normalize_error_message("Error executing API get_user: get_user_invoke() missing 1 required positional argument: 'user_id'"),
            "Error: GetUser.invoke() missing 1 required positional argument: 'user_id'"
        );
        assert_eq!(
            normalize_error_message("Error: GetRepoBranch.invoke() boom"),
            "Error: GetRepoBranch.invoke() boom"
        );
        assert_eq!(normalize_error_message("plain failure"), "Error: plain failure");
    }

    #[test]
    fn signature_errors_match_on_function_and_class() {
        assert!(errors_equivalent(
            "Error: GetRepoBranch.invoke() got an unexpected keyword argument 'repository_id'",
            "Failed to execute API: Tools.get_repo_branch_invoke() got an unexpected keyword argument 'repo_name'",
        ));
        assert!(errors_equivalent(
            "Failed to execute API: Tools.f_invoke() missing 2 required positional arguments: 'a' and 'b'",
            "Error: F.invoke() missing 2 required positional arguments: 'c' and 'd'",
        ));
        assert!(!errors_equivalent(
            "Error: F.invoke() missing 2 required positional arguments: 'a' and 'b'",
            "Error: F.invoke() got an unexpected keyword argument 'a'",
        ));
        assert!(!errors_equivalent(
            "Error: F.invoke() got an unexpected keyword argument 'a'",
            "Error: G.invoke() got an unexpected keyword argument 'a'",
        ));
        assert!(!errors_equivalent("Error: repo 1 archived", "Error: repo 2 archived"));
    }

    #[test]
    fn error_values_and_texts() {
        assert!(is_error_value(&json!({"status": "error", "message": "x"})));
        assert!(is_error_value(&json!({"error": "x"})));
        assert!(is_error_value(&json!("Error: F.invoke() boom")));
        assert!(!is_error_value(&json!({"status": "ok"})));
        assert!(!is_error_value(&json!("Errors are fine")));
        assert_eq!(
            error_text(&json!({"status": "error", "message": "m"})).as_deref(),
            Some("m")
        );
        assert_eq!(error_text(&json!({"error": "e"})).as_deref(), Some("e"));
        assert_eq!(error_text(&json!(3)), None);
    }
}
