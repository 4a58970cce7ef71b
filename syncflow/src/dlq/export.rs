//! Flattening of DLQ items into CSV rows.

use crate::errors::DlqError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

const BASE_COLUMNS: [&str; 4] = ["entity_type", "dlq_timestamp", "operation", "error"];

/// Flattens one item: the base columns, then every `source_data` field as
/// `src_<field>`.
fn flatten(item: &Value) -> Vec<(String, String)> {
    let mut row: Vec<(String, String)> = BASE_COLUMNS
        .iter()
        .map(|column| {
            let cell = item.get(*column).map_or_else(String::new, |v| match v {
                Value::Null => String::new(),
                other => cell_text(other),
            });
            ((*column).to_string(), cell)
        })
        .collect();

    if let Some(Value::Object(source)) = item.get("source_data") {
        for (key, value) in source {
            row.push((format!("src_{key}"), cell_text(value)));
        }
    }
    row
}

/// Strings are written raw, scalars formatted, anything else as JSON.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Writes `items` to `path`; the header is the union of every row's
/// columns in first-seen order. Returns the number of rows written.
pub(super) fn write_csv(path: &Path, items: &[Value]) -> Result<usize, DlqError> {
    let rows: Vec<Vec<(String, String)>> = items.iter().map(flatten).collect();

    let mut header: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (column, _) in rows.iter().flatten() {
        if !positions.contains_key(column) {
            positions.insert(column.clone(), header.len());
            header.push(column.clone());
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&header)?;
    for row in &rows {
        let mut record = vec![String::new(); header.len()];
        for (column, cell) in row {
            if let Some(&idx) = positions.get(column) {
                record[idx].clone_from(cell);
            }
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(rows.len())
}
