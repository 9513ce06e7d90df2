use crate::error::LoadError;
use replay_core::canonical_json_digest;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// In-memory tables standing in for a database: `table -> record_id -> record`.
///
/// Record order inside a table follows the source file, so list-style tools
/// return rows in the order they were recorded against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureDb {
    tables: BTreeMap<String, Map<String, Value>>,
}

impl FixtureDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `data_dir`, keyed by file stem.
    pub fn load_dir(data_dir: &Path) -> Result<Self, LoadError> {
        let mut db = Self::new();
        let entries = fs::read_dir(data_dir).map_err(|e| LoadError::io(data_dir, e))?;
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LoadError::io(data_dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let data = fs::read_to_string(&path).map_err(|e| LoadError::io(&path, e))?;
            let value: Value =
                serde_json::from_str(&data).map_err(|e| LoadError::InvalidFixtureTable {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            let Value::Object(records) = value else {
                return Err(LoadError::InvalidFixtureTable {
                    path: path.clone(),
                    reason: "expected an object mapping record ids to records".to_string(),
                });
            };
            db.tables.insert(stem.to_string(), records);
        }
        Ok(db)
    }

    pub fn insert_table(&mut self, name: impl Into<String>, records: Map<String, Value>) {
        self.tables.insert(name.into(), records);
    }

    pub fn table(&self, name: &str) -> Option<&Map<String, Value>> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Map<String, Value>> {
        self.tables.get_mut(name)
    }

    /// Mutable table, created empty when absent.
    pub fn table_entry(&mut self, name: &str) -> &mut Map<String, Value> {
        self.tables.entry(name.to_string()).or_default()
    }

    pub fn record(&self, table: &str, record_id: &str) -> Option<&Value> {
        self.tables.get(table).and_then(|t| t.get(record_id))
    }

    pub fn record_mut(&mut self, table: &str, record_id: &str) -> Option<&mut Value> {
        self.tables.get_mut(table).and_then(|t| t.get_mut(record_id))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Next free decimal id in `table`: one past the largest numeric id.
    pub fn next_record_id(&self, table: &str) -> String {
        let max = self
            .tables
            .get(table)
            .map(|t| t.keys().filter_map(|k| k.parse::<u64>().ok()).max().unwrap_or(0))
            .unwrap_or(0);
        (max + 1).to_string()
    }

    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for (name, records) in &self.tables {
            out.insert(name.clone(), Value::Object(records.clone()));
        }
        Value::Object(out)
    }

    /// Order-independent digest of the full fixture state.
    pub fn digest(&self) -> String {
        canonical_json_digest(&self.to_value())
    }
}
