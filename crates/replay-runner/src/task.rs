use crate::steps::ReplayStep;
use anyhow::{Context, Result};
use replay_core::interface_key;
use replay_schemas::{validate_value, TASK_FILE_SCHEMA};
use serde_json::{Map, Value};

/// A parsed task file. Edits go through the original document so unknown
/// fields and key order survive a rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDoc {
    doc: Value,
}

impl TaskDoc {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let doc: Value = serde_json::from_slice(bytes).context("task file is not valid JSON")?;
        Self::from_value(doc)
    }

    pub fn from_value(doc: Value) -> Result<Self> {
        validate_value(TASK_FILE_SCHEMA, &doc)?;
        Ok(Self { doc })
    }

    pub fn env(&self) -> Option<String> {
        self.doc
            .get("env")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn interface(&self) -> Option<String> {
        self.doc.get("interface_num").and_then(interface_key)
    }

    fn actions(&self) -> &[Value] {
        self.doc
            .pointer("/task/actions")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn steps(&self) -> Vec<ReplayStep> {
        self.actions()
            .iter()
            .map(|action| ReplayStep {
                name: action
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: action
                    .get("arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                expected: action.get("output").cloned(),
            })
            .collect()
    }

    fn action_mut(&mut self, index: usize) -> Option<&mut Map<String, Value>> {
        self.doc
            .pointer_mut("/task/actions")
            .and_then(Value::as_array_mut)
            .and_then(|actions| actions.get_mut(index))
            .and_then(Value::as_object_mut)
    }

    /// Replaces (or adds, at the end) the recorded output of one action.
    pub fn set_output(&mut self, index: usize, output: Value) {
        if let Some(action) = self.action_mut(index) {
            action.insert("output".to_string(), output);
        }
    }

    pub fn set_arguments(&mut self, index: usize, arguments: Map<String, Value>) {
        if let Some(action) = self.action_mut(index) {
            action.insert("arguments".to_string(), Value::Object(arguments));
        }
    }

    pub fn outputs_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.doc
            .pointer_mut("/task/outputs")
            .and_then(Value::as_array_mut)
    }

    pub fn as_value(&self) -> &Value {
        &self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edits_keep_unknown_fields_and_key_order() {
        let text = r#"{
  "user_id": "u1",
  "env": "vc",
  "interface_num": 2,
  "task": {
    "instruction": "open a branch",
    "actions": [
      {"name": "get_repo", "output": {"id": "1"}, "arguments": {"repository_id": "1"}},
      {"name": "list_repos"}
    ],
    "outputs": ["1"]
  }
}"#;
        let mut task = TaskDoc::from_slice(text.as_bytes()).expect("parse");
        assert_eq!(task.env().as_deref(), Some("vc"));
        assert_eq!(task.interface().as_deref(), Some("2"));
        let steps = task.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].arguments, Map::new());
        assert_eq!(steps[1].expected, None);

        task.set_output(0, json!({"id": "9"}));
        task.set_output(1, json!([]));
        let keys: Vec<&String> = task.as_value()["task"]["actions"][0]
            .as_object()
            .expect("action")
            .keys()
            .collect();
        assert_eq!(keys, vec!["name", "output", "arguments"]);
        let top: Vec<&String> = task.as_value().as_object().expect("doc").keys().collect();
        assert_eq!(top, vec!["user_id", "env", "interface_num", "task"]);
        assert_eq!(task.as_value()["task"]["actions"][1]["output"], json!([]));
        assert_eq!(task.outputs_mut().map(|o| o.len()), Some(1));
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(TaskDoc::from_slice(b"{ nope").is_err());
        assert!(TaskDoc::from_value(json!({"env": "vc"})).is_err());
        assert!(TaskDoc::from_value(json!({"task": {"actions": [{"arguments": {}}]}})).is_err());
        let bare = TaskDoc::from_value(json!({"task": {"actions": []}})).expect("no env is loadable");
        assert_eq!(bare.env(), None);
        assert_eq!(bare.interface(), None);
    }
}
