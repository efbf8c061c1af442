
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const UNKNOWN_DOCUMENT: &str = "Unknown Document";

const FILE_NAME_KEYS: [&str; 2] = ["file_name", "filename"];
const PAGE_KEYS: [&str; 3] = ["page", "page_number", "page_label"];

/// Caller-facing attribution of a retrieved passage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub page: Option<i64>,
    pub source: Option<String>,
}

/// Normalize whatever the loader stored into [`DocumentMetadata`]
#[inline]
pub fn resolve_metadata(metadata: &Map<String, Value>) -> DocumentMetadata {
    let file_path = non_empty_str(metadata.get("file_path"));

    let file_name = FILE_NAME_KEYS
        .iter()
        .find_map(|key| non_empty_str(metadata.get(*key)))
        .map(str::to_string)
        .or_else(|| {
            file_path
                .and_then(|path| Path::new(path).file_name())
                .and_then(|name| name.to_str())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| UNKNOWN_DOCUMENT.to_string());

    let page = PAGE_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key))
        .find(|value| is_truthy(value))
        .and_then(coerce_page);

    DocumentMetadata {
        file_name,
        page,
        source: file_path.map(str::to_string),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

/// Empty strings, zero, false, null and empty containers fall through
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Integers pass, all-digit strings parse, anything else is dropped
fn coerce_page(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if s.chars().all(|c| c.is_ascii_digit()) => s.parse().ok(),
        _ => None,
    }
}
