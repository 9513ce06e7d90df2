use crate::error::ToolError;
use crate::fixtures::FixtureDb;
use crate::literal::parse_python_literal;
use crate::loader::Toolset;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

pub const STATUS_OK: u16 = 200;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_TOOL_ERROR: u16 = 500;

const EXECUTION_ERROR_PREFIX: &str = "Failed to execute API: ";

/// Why an invocation produced an error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationFailure {
    OperationUnknown,
    ArgumentMismatch,
    Raised,
}

/// Uniform `(value, status)` result of one dispatched operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub value: Value,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<InvocationFailure>,
}

impl Envelope {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            status: STATUS_OK,
            failure: None,
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self {
            value: json!({
                "status": "error",
                "message": format!("API '{}' not found", name),
            }),
            status: STATUS_NOT_FOUND,
            failure: Some(InvocationFailure::OperationUnknown),
        }
    }

    pub fn tool_error(err: &ToolError) -> Self {
        let failure = if err.is_signature_error() {
            InvocationFailure::ArgumentMismatch
        } else {
            InvocationFailure::Raised
        };
        Self {
            value: json!({
                "status": "error",
                "message": format!("{}{}", EXECUTION_ERROR_PREFIX, err),
            }),
            status: STATUS_TOOL_ERROR,
            failure: Some(failure),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn message(&self) -> Option<&str> {
        self.value.get("message").and_then(Value::as_str)
    }
}

/// Keys whose values are passed through verbatim: ids, names, and
/// `*_by` / `*_to` references must never be reinterpreted as numbers.
pub fn is_identifier_key(key: &str) -> bool {
    key == "id"
        || key.ends_with("_id")
        || key.contains("_by")
        || key.contains("_to")
        || key.contains("name")
}

/// Normalizes recorded arguments before a call: empty strings are dropped,
/// identifier-like keys are left alone, and other strings are read as
/// Python literals when they parse as one.
pub fn coerce_arguments(arguments: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in arguments {
        if matches!(value, Value::String(s) if s.is_empty()) {
            continue;
        }
        if is_identifier_key(key) {
            out.insert(key.clone(), value.clone());
            continue;
        }
        let coerced = match value {
            Value::String(s) => parse_python_literal(s).unwrap_or_else(|| value.clone()),
            other => other.clone(),
        };
        out.insert(key.clone(), coerced);
    }
    out
}

/// Tools may hand back JSON text; decode it when it parses.
pub fn decode_return(value: Value) -> Value {
    match value {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(decoded) => decoded,
            Err(_) => Value::String(s),
        },
        other => other,
    }
}

pub fn dispatch(
    fixtures: &mut FixtureDb,
    toolset: &Toolset,
    name: &str,
    arguments: &Map<String, Value>,
) -> Envelope {
    let Some(entry) = toolset.get(name) else {
        debug!(operation = name, "operation not in toolset");
        return Envelope::not_found(name);
    };
    let arguments = coerce_arguments(arguments);
    if !entry.tool().accepts_extra_arguments() {
        if let Err(err) = entry
            .descriptor
            .check_arguments(&entry.qualified_symbol(), &arguments)
        {
            debug!(operation = name, error = %err, "argument binding failed");
            return Envelope::tool_error(&err);
        }
    }
    match entry.tool().invoke(fixtures, &arguments) {
        Ok(value) => Envelope::ok(decode_return(value)),
        Err(err) => {
            debug!(operation = name, error = %err, "tool raised");
            Envelope::tool_error(&err)
        }
    }
}
