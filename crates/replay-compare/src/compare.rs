use crate::error_fuzz::{error_text, errors_equivalent, is_error_value};
use crate::policy::ComparePolicy;
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// First point at which two values disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Difference {
    /// `$`-rooted path, e.g. `$.branches[2].name`.
    pub path: String,
    pub reason: String,
}

pub fn values_equal(expected: &Value, actual: &Value, policy: &ComparePolicy) -> bool {
    first_difference(expected, actual, policy).is_none()
}

pub fn strict_eq(a: &Value, b: &Value) -> bool {
    values_equal(a, b, &ComparePolicy::strict())
}

pub fn loose_eq(a: &Value, b: &Value) -> bool {
    values_equal(a, b, &ComparePolicy::loose())
}

pub fn fuzzy_eq(a: &Value, b: &Value) -> bool {
    values_equal(a, b, &ComparePolicy::fuzzy())
}

pub fn first_difference(
    expected: &Value,
    actual: &Value,
    policy: &ComparePolicy,
) -> Option<Difference> {
    diff(expected, actual, policy, "$")
}

fn differ(path: &str, reason: impl Into<String>) -> Option<Difference> {
    Some(Difference {
        path: path.to_string(),
        reason: reason.into(),
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn diff(a: &Value, b: &Value, policy: &ComparePolicy, path: &str) -> Option<Difference> {
    if policy.error_fuzz && is_error_value(a) && is_error_value(b) {
        if let (Some(ta), Some(tb)) = (error_text(a), error_text(b)) {
            if errors_equivalent(&ta, &tb) {
                return None;
            }
        }
    }

    let structural = match (a, b) {
        (Value::Null, Value::Null) => None,
        (Value::Bool(x), Value::Bool(y)) if x == y => None,
        (Value::Number(x), Value::Number(y)) => {
            if numbers_equal(x, y, policy.numeric_tolerance) {
                None
            } else {
                differ(path, format!("{} ({}) != {} ({})", x, kind(a), y, kind(b)))
            }
        }
        (Value::String(x), Value::String(y)) if x == y => None,
        (Value::Array(x), Value::Array(y)) => diff_arrays(x, y, policy, path),
        (Value::Object(x), Value::Object(y)) => diff_objects(x, y, policy, path),
        _ => differ(path, format!("{} != {}", preview(a), preview(b))),
    };
    if structural.is_none() || !policy.json_string_fuzz {
        return structural;
    }

    if let Some(decoded) = decode_json_string(a) {
        if diff(&decoded, b, policy, path).is_none() {
            return None;
        }
    }
    if let Some(decoded) = decode_json_string(b) {
        if diff(a, &decoded, policy, path).is_none() {
            return None;
        }
    }
    structural
}

fn diff_arrays(a: &[Value], b: &[Value], policy: &ComparePolicy, path: &str) -> Option<Difference> {
    if a.len() != b.len() {
        return differ(path, format!("array length {} != {}", a.len(), b.len()));
    }
    a.iter()
        .zip(b)
        .enumerate()
        .find_map(|(i, (x, y))| diff(x, y, policy, &format!("{}[{}]", path, i)))
}

fn diff_objects(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    policy: &ComparePolicy,
    path: &str,
) -> Option<Difference> {
    if let Some(key) = a.keys().find(|k| !b.contains_key(*k)) {
        return differ(path, format!("key '{}' missing from actual", key));
    }
    if let Some(key) = b.keys().find(|k| !a.contains_key(*k)) {
        return differ(path, format!("unexpected key '{}'", key));
    }
    if !policy.ignore_key_order && !a.keys().eq(b.keys()) {
        return differ(path, "key order differs");
    }
    a.iter().find_map(|(key, x)| {
        let y = b.get(key)?;
        diff(x, y, policy, &format!("{}.{}", path, key))
    })
}

fn numbers_equal(x: &Number, y: &Number, tolerance: bool) -> bool {
    match (x.is_f64(), y.is_f64()) {
        (false, false) => int_value(x) == int_value(y),
        (true, true) => x.as_f64() == y.as_f64(),
        _ => {
            if !tolerance {
                return false;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) => fx == fy,
                _ => false,
            }
        }
    }
}

fn int_value(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Decodes a string holding JSON text. Strings that decode to themselves
/// are left alone.
fn decode_json_string(value: &Value) -> Option<Value> {
    let Value::String(text) = value else {
        return None;
    };
    let decoded: Value = serde_json::from_str(text).ok()?;
    if decoded == *value {
        return None;
    }
    Some(decoded)
}

fn preview(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= 80 {
        return text;
    }
    let cut: String = text.chars().take(77).collect();
    format!("{}...", cut)
}

/// Rewrites every integer in `value` as a float, for environments whose
/// tools return floats where recorded outputs hold integers.
pub fn coerce_ints_to_floats(value: &Value) -> Value {
    match value {
        Value::Number(n) if !n.is_f64() => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(coerce_ints_to_floats).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), coerce_ints_to_floats(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Scalar leaves that differ between `old` and `new` at the same path, as
/// `(old, new)` pairs in document order.
pub fn scalar_differences(old: &Value, new: &Value) -> Vec<(Value, Value)> {
    let mut out = Vec::new();
    collect_scalar_differences(old, new, &mut out);
    out
}

fn collect_scalar_differences(old: &Value, new: &Value, out: &mut Vec<(Value, Value)>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, x) in a {
                if let Some(y) = b.get(key) {
                    collect_scalar_differences(x, y, out);
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                collect_scalar_differences(x, y, out);
            }
        }
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => {}
        (x, y) => {
            if !strict_eq(x, y) {
                out.push((x.clone(), y.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_distinguishes_int_float_and_key_order() {
        assert!(strict_eq(&json!({"a": 1, "b": [1, 2]}), &json!({"a": 1, "b": [1, 2]})));
        assert!(!strict_eq(&json!(1), &json!(1.0)));
        assert!(!strict_eq(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
        assert!(loose_eq(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
        assert!(!loose_eq(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn numeric_tolerance_equates_int_and_float() {
        let policy = ComparePolicy {
            numeric_tolerance: true,
            ..ComparePolicy::strict()
        };
        assert!(values_equal(&json!({"total": 10}), &json!({"total": 10.0}), &policy));
        assert!(!values_equal(&json!(10), &json!(10.5), &policy));
        assert!(values_equal(&json!(u64::MAX), &json!(u64::MAX), &ComparePolicy::strict()));
    }

    #[test]
    fn json_string_fuzz_applies_both_ways_at_depth() {
        let policy = ComparePolicy {
            json_string_fuzz: true,
            ignore_key_order: true,
            ..ComparePolicy::strict()
        };
        let encoded = json!({"items": ["{\"id\": \"3\", \"ok\": true}"]});
        let decoded = json!({"items": [{"ok": true, "id": "3"}]});
        assert!(values_equal(&encoded, &decoded, &policy));
        assert!(values_equal(&decoded, &encoded, &policy));
        assert!(values_equal(&json!("{\"a\":1}"), &json!("{\"a\": 1}"), &policy));
        assert!(!values_equal(&json!("{\"a\": 2}"), &json!({"a": 1}), &policy));
        assert!(!strict_eq(&encoded, &decoded));
    }

    #[test]
    fn error_fuzz_accepts_recorded_signature_error() {
        let expected =
            json!("Error: GetRepoBranch.invoke() got an unexpected keyword argument 'repository_id'");
        let actual = json!({
            "status": "error",
            "message": "Failed to execute API: Tools.get_repo_branch_invoke() got an unexpected keyword argument 'repo_name'"
        });
        assert!(fuzzy_eq(&expected, &actual));
        assert!(fuzzy_eq(&actual, &expected));
        assert!(!loose_eq(&expected, &actual));
    }

    #[test]
    fn relations_are_nested() {
        let pairs = [
            (json!({"a": 1}), json!({"a": 1})),
            (json!({"a": 1, "b": 2}), json!({"b": 2, "a": 1})),
            (json!(1), json!(1.0)),
            (json!("[1]"), json!([1])),
            (json!([1, 2]), json!([1, 3])),
        ];
        for (a, b) in &pairs {
            if strict_eq(a, b) {
                assert!(loose_eq(a, b));
            }
            if loose_eq(a, b) {
                assert!(fuzzy_eq(a, b));
            }
            assert_eq!(strict_eq(a, b), strict_eq(b, a));
            assert_eq!(fuzzy_eq(a, b), fuzzy_eq(b, a));
        }
    }

    #[test]
    fn first_difference_reports_path() {
        let diff = first_difference(
            &json!({"repo": {"branches": [{"name": "main"}, {"name": "dev"}]}}),
            &json!({"repo": {"branches": [{"name": "main"}, {"name": "feat"}]}}),
            &ComparePolicy::loose(),
        )
        .expect("differs");
        assert_eq!(diff.path, "$.repo.branches[1].name");
    }

    #[test]
    fn ints_become_floats_recursively() {
        assert_eq!(
            coerce_ints_to_floats(&json!({"amount": 3, "items": [1, 2.5, "4"]})),
            json!({"amount": 3.0, "items": [1.0, 2.5, "4"]})
        );
    }

    #[test]
    fn scalar_differences_pair_leaves_by_path() {
        let old = json!({"id": "12", "branch": {"id": "7", "name": "main"}, "tags": [1, 2]});
        let new = json!({"id": "12", "branch": {"id": "9", "name": "main"}, "tags": [1, 3], "extra": 1});
        assert_eq!(
            scalar_differences(&old, &new),
            vec![(json!("7"), json!("9")), (json!(2), json!(3))]
        );
    }
}
