use anyhow::{anyhow, Result};
use include_dir::{include_dir, Dir};
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

static SCHEMAS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/schemas");

pub const TASK_FILE_SCHEMA: &str = "task_file_v1.jsonschema.json";
pub const TRAJECTORY_FILE_SCHEMA: &str = "trajectory_file_v1.jsonschema.json";
pub const TOOL_DESCRIPTOR_SCHEMA: &str = "tool_descriptor_v1.jsonschema.json";

static COMPILED: Lazy<Mutex<HashMap<String, &'static JSONSchema>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn schema_names() -> Vec<String> {
    SCHEMAS_DIR
        .files()
        .filter_map(|f| {
            f.path()
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .collect()
}

pub fn load_schema(name: &str) -> Result<Value> {
    let file = SCHEMAS_DIR
        .get_file(name)
        .ok_or_else(|| anyhow!("schema not found: {}", name))?;
    let data = std::str::from_utf8(file.contents())?;
    Ok(serde_json::from_str(data)?)
}

pub fn compile_schema(name: &str) -> Result<&'static JSONSchema> {
    let mut cache = COMPILED
        .lock()
        .map_err(|_| anyhow!("schema cache poisoned"))?;
    if let Some(compiled) = cache.get(name) {
        return Ok(compiled);
    }
    let schema = load_schema(name)?;
    // Compiled schemas borrow their source document for the life of the process.
    let schema: &'static Value = Box::leak(Box::new(schema));
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| anyhow!("schema {} failed to compile: {}", name, e))?;
    let compiled: &'static JSONSchema = Box::leak(Box::new(compiled));
    cache.insert(name.to_string(), compiled);
    Ok(compiled)
}

/// Validates `value` against an embedded schema, joining every violation
/// into one error message.
pub fn validate_value(name: &str, value: &Value) -> Result<()> {
    let schema = compile_schema(name)?;
    if let Err(errors) = schema.validate(value) {
        let msgs: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        return Err(anyhow!(
            "schema validation failed ({}): {}",
            name,
            msgs.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_schemas_are_listed_and_compile() {
        let names = schema_names();
        for name in [TASK_FILE_SCHEMA, TRAJECTORY_FILE_SCHEMA, TOOL_DESCRIPTOR_SCHEMA] {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
            compile_schema(name).expect("schema should compile");
        }
    }

    #[test]
    fn task_file_schema_accepts_minimal_task_and_rejects_nameless_action() {
        let ok = json!({
            "env": "version_control",
            "interface_num": 1,
            "task": {"actions": [{"name": "get_repo", "arguments": {"repo_id": "1"}}]}
        });
        validate_value(TASK_FILE_SCHEMA, &ok).expect("minimal task is valid");

        let bad = json!({"env": "x", "task": {"actions": [{"arguments": {}}]}});
        let err = validate_value(TASK_FILE_SCHEMA, &bad).expect_err("action needs a name");
        assert!(err.to_string().contains("/task/actions/0"), "{}", err);
    }

    #[test]
    fn task_file_schema_leaves_null_env_and_blank_names_to_the_runner() {
        let task = json!({
            "env": null,
            "interface_num": null,
            "task": {"actions": [{"name": "", "arguments": {}}]}
        });
        validate_value(TASK_FILE_SCHEMA, &task).expect("runner classifies these itself");
        let trials = json!([{"task_id": 3, "env": null, "traj": []}]);
        validate_value(TRAJECTORY_FILE_SCHEMA, &trials).expect("trial without env is loadable");
    }

    #[test]
    fn tool_descriptor_schema_requires_function_block() {
        let ok = json!({
            "type": "function",
            "function": {
                "name": "get_user",
                "description": "Fetch one user",
                "parameters": {"type": "object", "properties": {"user_id": {"type": "string"}}, "required": ["user_id"]}
            }
        });
        validate_value(TOOL_DESCRIPTOR_SCHEMA, &ok).expect("descriptor is valid");
        assert!(validate_value(TOOL_DESCRIPTOR_SCHEMA, &json!({"type": "function"})).is_err());
    }

    #[test]
    fn unknown_schema_is_an_error() {
        let err = load_schema("nope.json").expect_err("unknown schema");
        assert!(err.to_string().contains("schema not found"));
    }
}
