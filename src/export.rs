//! JSON and CSV export

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::ExportError;

/// Supported export encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ExportError::UnsupportedFormat(token.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Encode `items` in the format named by `token`.
pub fn export<T: Serialize>(items: &[T], token: &str) -> Result<String, ExportError> {
    match token.parse()? {
        ExportFormat::Json => to_json(items),
        ExportFormat::Csv => to_csv(items),
    }
}

/// Pretty-printed JSON array; object keys keep their insertion order.
pub fn to_json<T: Serialize>(items: &[T]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(items)?)
}

/// CSV with one column per scalar field seen in any item.
///
/// Columns appear in first-seen order. Header names are bare unless they
/// hold a comma, quote or line break. Every cell is quoted with embedded
/// quotes doubled and a missing value is `""`. Fields holding lists or
/// objects are left out. No items means an empty document.
pub fn to_csv<T: Serialize>(items: &[T]) -> Result<String, ExportError> {
    let rows = items
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    let objects: Vec<_> = rows.iter().filter_map(JsonValue::as_object).collect();

    let mut columns: IndexSet<&str> = IndexSet::new();
    for object in &objects {
        for (key, value) in object.iter() {
            if cell(value).is_some() {
                columns.insert(key.as_str());
            }
        }
    }
    if objects.is_empty() {
        return Ok(String::new());
    }

    let mut lines = Vec::with_capacity(objects.len() + 1);
    lines.push(columns.iter().copied().map(header).collect::<Vec<_>>().join(","));
    for object in &objects {
        let line = columns
            .iter()
            .map(|column| quote(object.get(*column).and_then(cell).as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn cell(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn header(name: &str) -> String {
    if name.contains([',', '"', '\n', '\r']) {
        quote(name)
    } else {
        name.to_string()
    }
}
