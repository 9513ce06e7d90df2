use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Table targeted by a field whose table depends on a sibling tag, e.g.
/// `owner_id` next to `owner_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolymorphicRule {
    pub discriminator: String,
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl PolymorphicRule {
    /// Resolves the target table from the enclosing record. Tags match
    /// case-insensitively in singular or plural form; anything else falls
    /// back to `default`.
    pub fn resolve(&self, record: &Map<String, Value>) -> Option<&str> {
        let tag = record
            .get(&self.discriminator)
            .and_then(Value::as_str)
            .map(|t| t.trim().to_ascii_lowercase());
        tag.and_then(|tag| self.lookup_tag(&tag))
            .or(self.default.as_deref())
    }

    fn lookup_tag(&self, tag: &str) -> Option<&str> {
        let mut candidates = vec![tag.to_string()];
        match tag.strip_suffix('s') {
            Some(singular) => candidates.push(singular.to_string()),
            None => candidates.push(format!("{}s", tag)),
        }
        candidates.iter().find_map(|candidate| {
            self.tags
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(candidate))
                .map(|(_, table)| table.as_str())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldTarget {
    Table(String),
    Polymorphic(PolymorphicRule),
}

/// Which table each identifier-bearing field points into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTableMap {
    fields: BTreeMap<String, FieldTarget>,
}

impl FieldTableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, field: &str, table: &str) {
        self.fields
            .insert(field.to_string(), FieldTarget::Table(table.to_string()));
    }

    pub fn insert_polymorphic(&mut self, field: &str, rule: PolymorphicRule) {
        self.fields
            .insert(field.to_string(), FieldTarget::Polymorphic(rule));
    }

    pub fn get(&self, field: &str) -> Option<&FieldTarget> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Target table for `field` inside `record`, if any.
    pub fn resolve(&self, field: &str, record: &Map<String, Value>) -> Option<String> {
        match self.fields.get(field)? {
            FieldTarget::Table(table) => Some(table.clone()),
            FieldTarget::Polymorphic(rule) => rule.resolve(record).map(str::to_string),
        }
    }

    /// The reference graph of the bundled version-control dataset.
    pub fn builtin() -> Self {
        let mut map = Self::new();
        for (field, table) in [
            ("user_id", "users"),
            ("author_id", "users"),
            ("assignee_id", "users"),
            ("reviewer_id", "users"),
            ("created_by", "users"),
            ("updated_by", "users"),
            ("assigned_to", "users"),
            ("organization_id", "organizations"),
            ("team_id", "teams"),
            ("repository_id", "repositories"),
            ("repo_id", "repositories"),
            ("branch_id", "branches"),
            ("commit_id", "commits"),
            ("issue_id", "issues"),
            ("pull_request_id", "pull_requests"),
            ("comment_id", "comments"),
            ("label_id", "labels"),
            ("project_id", "projects"),
            ("release_id", "releases"),
            ("workflow_id", "workflows"),
        ] {
            map.insert_table(field, table);
        }
        map.insert_polymorphic(
            "owner_id",
            PolymorphicRule {
                discriminator: "owner_type".to_string(),
                tags: tags(&[("user", "users"), ("organization", "organizations")]),
                default: Some("users".to_string()),
            },
        );
        map.insert_polymorphic(
            "commentable_id",
            PolymorphicRule {
                discriminator: "commentable_type".to_string(),
                tags: tags(&[
                    ("issue", "issues"),
                    ("pull_request", "pull_requests"),
                    ("commit", "commits"),
                ]),
                default: None,
            },
        );
        map.insert_polymorphic(
            "reference_id",
            PolymorphicRule {
                discriminator: "reference_type".to_string(),
                tags: tags(&[
                    ("issue", "issues"),
                    ("pull_request", "pull_requests"),
                    ("commit", "commits"),
                    ("branch", "branches"),
                    ("release", "releases"),
                ]),
                default: None,
            },
        );
        map
    }

    /// Reads a field map from JSON, or YAML when the extension says so.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read field map {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let map = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("invalid field map {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("invalid field map {}", path.display()))?
        };
        Ok(map)
    }
}

fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(tag, table)| (tag.to_string(), table.to_string()))
        .collect()
}
