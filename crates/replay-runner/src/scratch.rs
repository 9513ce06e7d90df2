use crate::config::ShaRule;
use serde_json::{Map, Value};

const COMMIT_SHA_KEY: &str = "commit_sha";
const SHA_MARKER: &str = "sha";

/// State carried from one step of a task to the next. Commit hashes are
/// produced at replay time, so later steps that quote a recorded hash get
/// the one actually observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskScratch {
    last_commit_sha: Option<String>,
    recorded_commit_shas: Vec<String>,
}

impl TaskScratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_commit_sha(&self) -> Option<&str> {
        self.last_commit_sha.as_deref()
    }

    /// Rewrites sha-bearing arguments in place; returns the keys changed.
    pub fn substitute(&self, arguments: &mut Map<String, Value>, rule: ShaRule) -> Vec<String> {
        let Some(sha) = self.last_commit_sha.as_deref() else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        for (key, value) in arguments.iter_mut() {
            if !key.to_ascii_lowercase().contains(SHA_MARKER) {
                continue;
            }
            let eligible = match rule {
                ShaRule::Broad => true,
                ShaRule::OnlyRecorded => value
                    .as_str()
                    .map(|current| self.recorded_commit_shas.iter().any(|r| r == current))
                    .unwrap_or(false),
            };
            if eligible && value.as_str() != Some(sha) {
                *value = Value::String(sha.to_string());
                changed.push(key.clone());
            }
        }
        changed
    }

    /// Remembers the first `commit_sha` in an observed output.
    pub fn observe_actual(&mut self, actual: &Value) {
        if let Some(sha) = find_commit_sha(actual) {
            self.last_commit_sha = Some(sha);
        }
    }

    /// Remembers the first `commit_sha` in a recorded output, so the narrow
    /// rule can recognize later references to it.
    pub fn observe_expected(&mut self, expected: &Value) {
        if let Some(sha) = find_commit_sha(expected) {
            if !self.recorded_commit_shas.contains(&sha) {
                self.recorded_commit_shas.push(sha);
            }
        }
    }
}

/// Depth-first search for a `commit_sha` key (case-insensitive).
pub fn find_commit_sha(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.eq_ignore_ascii_case(COMMIT_SHA_KEY) {
                    match child {
                        Value::String(s) => return Some(s.clone()),
                        Value::Number(n) => return Some(n.to_string()),
                        _ => {}
                    }
                }
                if let Some(found) = find_commit_sha(child) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(find_commit_sha),
        _ => None,
    }
}
