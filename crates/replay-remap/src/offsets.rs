use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const COLUMN_FILENAME: &str = "filename";
const COLUMN_THRESHOLD: &str = "folder1_records";
const COLUMN_OFFSET: &str = "offset";

/// Ids strictly above `threshold` move up by `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub threshold: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetTable {
    tables: BTreeMap<String, OffsetRecord>,
}

pub fn normalize_table_name(name: &str) -> String {
    let name = name.trim();
    name.strip_suffix(".json").unwrap_or(name).to_string()
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, threshold: u64, offset: u64) {
        self.tables
            .insert(normalize_table_name(table), OffsetRecord { threshold, offset });
    }

    pub fn get(&self, table: &str) -> Option<OffsetRecord> {
        self.tables.get(&normalize_table_name(table)).copied()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Parses the offset feed. Only `filename`, `folder1_records` and
    /// `offset` are read; other columns may be present in any order.
    pub fn from_csv(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let Some((_, header_line)) = lines.next() else {
            return Err(anyhow!("offset feed is empty"));
        };
        let headers: Vec<String> = header_line
            .trim_start_matches('\u{feff}')
            .split(',')
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| anyhow!("offset feed header is missing column '{}'", name))
        };
        let filename_idx = column(COLUMN_FILENAME)?;
        let threshold_idx = column(COLUMN_THRESHOLD)?;
        let offset_idx = column(COLUMN_OFFSET)?;

        let mut table = Self::new();
        for (line_no, line) in lines {
            let values: Vec<&str> = line.split(',').map(str::trim).collect();
            if values.len() != headers.len() {
                return Err(anyhow!(
                    "offset feed line {}: expected {} columns, found {}",
                    line_no,
                    headers.len(),
                    values.len()
                ));
            }
            let parse = |idx: usize, name: &str| {
                values[idx].parse::<u64>().map_err(|_| {
                    anyhow!(
                        "offset feed line {}: {} '{}' is not a non-negative integer",
                        line_no,
                        name,
                        values[idx]
                    )
                })
            };
            let threshold = parse(threshold_idx, COLUMN_THRESHOLD)?;
            let offset = parse(offset_idx, COLUMN_OFFSET)?;
            table.insert(values[filename_idx], threshold, offset);
        }
        Ok(table)
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read offset feed {}", path.display()))?;
        Self::from_csv(&content).with_context(|| format!("invalid offset feed {}", path.display()))
    }
}
