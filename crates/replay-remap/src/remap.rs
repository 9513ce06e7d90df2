use crate::fields::FieldTableMap;
use crate::offsets::OffsetTable;
use anyhow::{Context, Result};
use replay_core::{atomic_write_json_pretty, ensure_dir, to_python_json_string};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemapStats {
    /// Shifted identifier values per target table.
    pub shifted: BTreeMap<String, usize>,
    /// Embedded JSON strings that were decoded, changed and re-encoded.
    pub embedded_rewritten: usize,
    pub files_written: usize,
    pub files_failed: usize,
}

impl RemapStats {
    pub fn total_shifted(&self) -> usize {
        self.shifted.values().sum()
    }

    pub fn merge(&mut self, other: &RemapStats) {
        for (table, count) in &other.shifted {
            *self.shifted.entry(table.clone()).or_default() += count;
        }
        self.embedded_rewritten += other.embedded_rewritten;
        self.files_written += other.files_written;
        self.files_failed += other.files_failed;
    }
}

/// Shifts identifier values so they line up with a dataset that was
/// appended to the original one.
///
/// Running it twice over the same document shifts ids twice; callers keep
/// track of what has already been remapped.
#[derive(Debug, Clone)]
pub struct Remapper {
    offsets: OffsetTable,
    fields: FieldTableMap,
}

impl Remapper {
    pub fn new(offsets: OffsetTable, fields: FieldTableMap) -> Self {
        Self { offsets, fields }
    }

    pub fn remap(&self, value: &mut Value) -> RemapStats {
        let mut stats = RemapStats::default();
        self.remap_value(value, None, &mut stats);
        stats
    }

    fn remap_value(&self, value: &mut Value, table: Option<&str>, stats: &mut RemapStats) {
        match value {
            Value::Object(map) => {
                self.remap_record(map, stats);
                return;
            }
            Value::Array(items) => {
                for item in items {
                    self.remap_value(item, table, stats);
                }
                return;
            }
            Value::String(text) => {
                if let Some(rewritten) = self.remap_embedded(text, stats) {
                    *text = rewritten;
                    return;
                }
            }
            Value::Number(_) | Value::Bool(_) | Value::Null => {}
        }
        if let Some(table) = table {
            self.shift_scalar(value, table, stats);
        }
    }

    fn remap_record(&self, record: &mut Map<String, Value>, stats: &mut RemapStats) {
        let keys: Vec<String> = record.keys().cloned().collect();
        for key in keys {
            let table = self.fields.resolve(&key, record);
            if let Some(child) = record.get_mut(&key) {
                self.remap_value(child, table.as_deref(), stats);
            }
        }
    }

    /// Returns the re-encoded text when `text` holds a JSON object or array
    /// that changed under remapping. Unchanged blobs keep their exact bytes.
    fn remap_embedded(&self, text: &str, stats: &mut RemapStats) -> Option<String> {
        let trimmed = text.trim_start();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return None;
        }
        let mut decoded: Value = serde_json::from_str(text).ok()?;
        if !(decoded.is_object() || decoded.is_array()) {
            return None;
        }
        let mut inner = RemapStats::default();
        self.remap_value(&mut decoded, None, &mut inner);
        if inner.total_shifted() == 0 && inner.embedded_rewritten == 0 {
            // Still embedded JSON: never fall through to scalar handling.
            return Some(text.to_string());
        }
        let encoded = match to_python_json_string(&decoded) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "failed to re-encode embedded JSON; keeping original");
                return Some(text.to_string());
            }
        };
        inner.embedded_rewritten += 1;
        stats.merge(&inner);
        Some(encoded)
    }

    fn shift_scalar(&self, value: &mut Value, table: &str, stats: &mut RemapStats) {
        let Some(record) = self.offsets.get(table) else {
            return;
        };
        if record.offset == 0 {
            return;
        }
        let shifted = match value {
            Value::Number(n) => match n.as_u64() {
                Some(id) if id > record.threshold => {
                    id.checked_add(record.offset).map(|v| Value::Number(Number::from(v)))
                }
                _ => None,
            },
            Value::String(s) => match parse_id(s) {
                Some(id) if id > record.threshold => id
                    .checked_add(record.offset)
                    .map(|v| Value::String(v.to_string())),
                _ => None,
            },
            _ => None,
        };
        if let Some(shifted) = shifted {
            debug!(table, from = %value, to = %shifted, "shifted id");
            *value = shifted;
            *stats.shifted.entry(table.to_string()).or_default() += 1;
        }
    }

    /// Remaps one JSON document from `input` into `output`.
    pub fn remap_file(&self, input: &Path, output: &Path) -> Result<RemapStats> {
        let data = fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?;
        let mut value: Value = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", input.display()))?;
        let mut stats = self.remap(&mut value);
        atomic_write_json_pretty(output, &value)
            .with_context(|| format!("failed to write {}", output.display()))?;
        stats.files_written = 1;
        Ok(stats)
    }

    /// Mirrors `input_root` into `output_root`, remapping every `*.json`
    /// file and copying everything else as-is. A file that fails to parse
    /// is counted and skipped.
    pub fn remap_tree(&self, input_root: &Path, output_root: &Path) -> Result<RemapStats> {
        let mut total = RemapStats::default();
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(input_root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", input_root.display()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        ensure_dir(output_root)?;
        for path in files {
            let relative = path.strip_prefix(input_root).unwrap_or(&path);
            let target = output_root.join(relative);
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                if let Some(parent) = target.parent() {
                    ensure_dir(parent)?;
                }
                fs::copy(&path, &target).with_context(|| {
                    format!("failed to copy {} to {}", path.display(), target.display())
                })?;
                continue;
            }
            match self.remap_file(&path, &target) {
                Ok(stats) => total.merge(&stats),
                Err(err) => {
                    warn!(file = %path.display(), error = %format!("{:#}", err), "remap failed");
                    total.files_failed += 1;
                }
            }
        }
        info!(
            input = %input_root.display(),
            output = %output_root.display(),
            files = total.files_written,
            failed = total.files_failed,
            shifted = total.total_shifted(),
            "remap finished"
        );
        Ok(total)
    }
}

fn parse_id(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::PolymorphicRule;
    use chrono::Utc;
    use serde_json::json;

    struct TempDirGuard {
        path: PathBuf,
    }

    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "{}_{}_{}",
                prefix,
                std::process::id(),
                Utc::now().timestamp_micros()
            ));
            fs::create_dir_all(&path).expect("temp dir");
            Self { path }
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn remapper(entries: &[(&str, u64, u64)]) -> Remapper {
        let mut offsets = OffsetTable::new();
        for (table, threshold, offset) in entries {
            offsets.insert(table, *threshold, *offset);
        }
        Remapper::new(offsets, FieldTableMap::builtin())
    }

    #[test]
    fn ids_above_threshold_shift_and_keep_storage_type() {
        let remapper = remapper(&[("branches.json", 800, 38)]);
        let mut above = json!({"branch_id": "850"});
        let stats = remapper.remap(&mut above);
        assert_eq!(above, json!({"branch_id": "888"}));
        assert_eq!(stats.shifted.get("branches"), Some(&1));

        let mut at = json!({"branch_id": "800"});
        remapper.remap(&mut at);
        assert_eq!(at, json!({"branch_id": "800"}));

        let mut numeric = json!({"branch_id": 801, "name": "850"});
        remapper.remap(&mut numeric);
        assert_eq!(numeric, json!({"branch_id": 839, "name": "850"}));

        let mut odd = json!({"branch_id": "main", "other": {"branch_id": -900}});
        remapper.remap(&mut odd);
        assert_eq!(odd, json!({"branch_id": "main", "other": {"branch_id": -900}}));
    }

    #[test]
    fn polymorphic_owner_resolves_through_discriminator() {
        let unchanged = remapper(&[("organizations", 43, 0), ("users", 200, 0)]);
        let mut value = json!({"owner_type": "organization", "owner_id": "50"});
        unchanged.remap(&mut value);
        assert_eq!(value["owner_id"], json!("50"));

        let shifted = remapper(&[("organizations", 43, 10), ("users", 200, 0)]);
        shifted.remap(&mut value);
        assert_eq!(value["owner_id"], json!("60"));

        let users_only = remapper(&[("organizations", 43, 0), ("users", 10, 99)]);
        let mut value = json!({"owner_type": "organization", "owner_id": "50"});
        users_only.remap(&mut value);
        assert_eq!(value["owner_id"], json!("50"));

        let mut untyped = json!({"owner_id": "50"});
        users_only.remap(&mut untyped);
        assert_eq!(untyped["owner_id"], json!("149"));
    }

    #[test]
    fn embedded_json_is_rewritten_in_compact_form() {
        let remapper = remapper(&[("users", 200, 14)]);
        let mut value = json!({"payload": "{\"user_id\": \"250\"}"});
        let stats = remapper.remap(&mut value);
        assert_eq!(value, json!({"payload": "{\"user_id\": \"264\"}"}));
        assert_eq!(stats.embedded_rewritten, 1);

        let mut untouched = json!({"payload": "{\"user_id\":\"150\" }"});
        remapper.remap(&mut untouched);
        assert_eq!(untouched, json!({"payload": "{\"user_id\":\"150\" }"}));
    }

    #[test]
    fn lists_under_mapped_keys_shift_each_element() {
        let remapper = remapper(&[("users", 200, 14)]);
        let mut value = json!({"user_id": ["199", "201", 300], "members": [{"user_id": "250"}]});
        remapper.remap(&mut value);
        assert_eq!(
            value,
            json!({"user_id": ["199", "215", 314], "members": [{"user_id": "264"}]})
        );
    }

    #[test]
    fn zero_offsets_leave_document_unchanged() {
        let remapper = remapper(&[("users", 0, 0), ("branches", 0, 0)]);
        let original = json!({
            "env": "vc",
            "task": {"actions": [{"name": "get_user", "arguments": {"user_id": "9"},
                      "output": "{\"branch_id\": \"4\", \"note\": \"Zo\\u00eb\"}"}]}
        });
        let mut value = original.clone();
        let stats = remapper.remap(&mut value);
        assert_eq!(value, original);
        assert_eq!(stats.total_shifted(), 0);
    }

    #[test]
    fn custom_polymorphic_rule_without_default_keeps_unknown_tags() {
        let mut fields = FieldTableMap::new();
        fields.insert_polymorphic(
            "target_id",
            PolymorphicRule {
                discriminator: "target_kind".to_string(),
                tags: [("issue".to_string(), "issues".to_string())].into_iter().collect(),
                default: None,
            },
        );
        let mut offsets = OffsetTable::new();
        offsets.insert("issues", 5, 100);
        let remapper = Remapper::new(offsets, fields);
        let mut value = json!([
            {"target_kind": "Issues", "target_id": 6},
            {"target_kind": "wiki", "target_id": 6}
        ]);
        remapper.remap(&mut value);
        assert_eq!(
            value,
            json!([
                {"target_kind": "Issues", "target_id": 106},
                {"target_kind": "wiki", "target_id": 6}
            ])
        );
    }

    #[test]
    fn remap_tree_mirrors_layout_and_counts_failures() {
        let root = TempDirGuard::new("replay_remap_tree");
        let input = root.path.join("tasks");
        let output = root.path.join("tasks_remapped");
        fs::create_dir_all(input.join("vc")).expect("input");
        fs::write(
            input.join("vc").join("task_1.json"),
            json!({"task": {"actions": [{"name": "get_user", "arguments": {"user_id": "201"}}]}})
                .to_string(),
        )
        .expect("task");
        fs::write(input.join("vc").join("broken.json"), "{").expect("broken");
        fs::write(input.join("README.md"), "notes").expect("readme");

        let stats = remapper(&[("users", 200, 14)])
            .remap_tree(&input, &output)
            .expect("remap tree");
        assert_eq!(stats.files_written, 1);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.shifted.get("users"), Some(&1));

        let written: Value = serde_json::from_str(
            &fs::read_to_string(output.join("vc").join("task_1.json")).expect("written"),
        )
        .expect("json");
        assert_eq!(
            written["task"]["actions"][0]["arguments"]["user_id"],
            json!("215")
        );
        assert!(output.join("README.md").exists());
        assert!(!output.join("vc").join("broken.json").exists());
    }
}
