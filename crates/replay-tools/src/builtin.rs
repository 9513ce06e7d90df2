//! Generic fixture tools shared by every interface. Environments without a
//! bespoke plugin for plain record access can still replay against these.

use crate::catalog::Tool;
use crate::descriptor::ToolDescriptor;
use crate::error::ToolError;
use crate::fixtures::FixtureDb;
use serde_json::{Map, Value};
use std::sync::Arc;

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetRecord),
        Arc::new(ListRecords),
        Arc::new(CreateRecord),
        Arc::new(UpdateRecord),
        Arc::new(DeleteRecord),
    ]
}

fn string_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    match arguments.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ToolError::failed(format!(
            "argument '{}' must be a string, got {}",
            key, other
        ))),
        None => Err(ToolError::failed(format!("argument '{}' is required", key))),
    }
}

/// Record ids may be recorded as numbers; tables key them as strings.
fn record_id_arg(arguments: &Map<String, Value>) -> Result<String, ToolError> {
    match arguments.get("record_id") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(ToolError::failed(format!(
            "argument 'record_id' must be a string or integer, got {}",
            other
        ))),
        None => Err(ToolError::failed("argument 'record_id' is required")),
    }
}

fn object_arg<'a>(
    arguments: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Map<String, Value>, ToolError> {
    match arguments.get(key) {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(ToolError::failed(format!(
            "argument '{}' must be an object, got {}",
            key, other
        ))),
        None => Err(ToolError::failed(format!("argument '{}' is required", key))),
    }
}

fn not_found(table: &str, record_id: &str) -> ToolError {
    ToolError::failed(format!("record '{}' not found in table '{}'", record_id, table))
}

struct GetRecord;

impl Tool for GetRecord {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("get_record", "Fetch one record from a fixture table by id.")
            .required_param("table", "string", "Table name")
            .required_param("record_id", "string", "Record id")
    }

    fn invoke(&self, fixtures: &mut FixtureDb, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let table = string_arg(arguments, "table")?;
        let record_id = record_id_arg(arguments)?;
        fixtures
            .record(table, &record_id)
            .cloned()
            .ok_or_else(|| not_found(table, &record_id))
    }
}

struct ListRecords;

impl Tool for ListRecords {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "list_records",
            "List records of a fixture table, optionally filtered by exact field values.",
        )
        .required_param("table", "string", "Table name")
        .param("filters", "object", "Field values every returned record must match")
    }

    fn invoke(&self, fixtures: &mut FixtureDb, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let table = string_arg(arguments, "table")?;
        let filters = match arguments.get("filters") {
            None | Some(Value::Null) => Map::new(),
            Some(_) => object_arg(arguments, "filters")?.clone(),
        };
        let Some(records) = fixtures.table(table) else {
            return Err(ToolError::failed(format!("table '{}' not found", table)));
        };
        let matched: Vec<Value> = records
            .iter()
            .filter(|(_, record)| {
                filters
                    .iter()
                    .all(|(field, expected)| record.get(field) == Some(expected))
            })
            .map(|(id, record)| {
                let mut row = Map::new();
                row.insert("record_id".to_string(), Value::String(id.clone()));
                if let Value::Object(fields) = record {
                    for (k, v) in fields {
                        row.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(row)
            })
            .collect();
        Ok(Value::Array(matched))
    }
}

struct CreateRecord;

impl Tool for CreateRecord {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("create_record", "Insert a record under the next free numeric id.")
            .required_param("table", "string", "Table name")
            .required_param("record", "object", "Record fields")
    }

    fn invoke(&self, fixtures: &mut FixtureDb, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let table = string_arg(arguments, "table")?;
        let record = object_arg(arguments, "record")?.clone();
        let record_id = fixtures.next_record_id(table);
        fixtures
            .table_entry(table)
            .insert(record_id.clone(), Value::Object(record));
        Ok(serde_json::json!({"status": "success", "record_id": record_id}))
    }
}

struct UpdateRecord;

impl Tool for UpdateRecord {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("update_record", "Merge field updates into an existing record.")
            .required_param("table", "string", "Table name")
            .required_param("record_id", "string", "Record id")
            .required_param("updates", "object", "Fields to overwrite")
    }

    fn invoke(&self, fixtures: &mut FixtureDb, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let table = string_arg(arguments, "table")?;
        let record_id = record_id_arg(arguments)?;
        let updates = object_arg(arguments, "updates")?;
        let Some(Value::Object(record)) = fixtures.record_mut(table, &record_id) else {
            return Err(not_found(table, &record_id));
        };
        for (k, v) in updates {
            record.insert(k.clone(), v.clone());
        }
        Ok(Value::Object(record.clone()))
    }
}

struct DeleteRecord;

impl Tool for DeleteRecord {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("delete_record", "Remove a record from a fixture table.")
            .required_param("table", "string", "Table name")
            .required_param("record_id", "string", "Record id")
    }

    fn invoke(&self, fixtures: &mut FixtureDb, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let table = string_arg(arguments, "table")?;
        let record_id = record_id_arg(arguments)?;
        let removed = fixtures
            .table_mut(table)
            .and_then(|records| records.shift_remove(&record_id));
        match removed {
            Some(_) => Ok(serde_json::json!({"status": "success", "record_id": record_id})),
            None => Err(not_found(table, &record_id)),
        }
    }
}
