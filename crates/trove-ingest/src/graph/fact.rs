//! Typed fact values
//!
//! Facts are an open key/value bag per entity. Values are stored as JSON in
//! the `facts` table; the untagged representation keeps the stored form
//! readable (`"text"`, `12`, `true`, `["a","b"]`).

use serde::{Deserialize, Serialize};

/// Fact keys written by the ingestion pipeline itself
pub mod keys {
    pub const REPO: &str = "repo";
    pub const URL: &str = "url";
    pub const FILENAME: &str = "filename";
    pub const SIGNATURE: &str = "signature";
    pub const PROCESSED: &str = "processed";
    pub const ERROR: &str = "error";
    pub const FORMAT: &str = "format";
    pub const TABLE_NAME: &str = "table_name";
    pub const COLUMN_NAMES: &str = "column_names";
    pub const COLUMNS: &str = "columns";
    pub const CONTENT_SHA256: &str = "content_sha256";
    pub const ROW_COUNT: &str = "row_count";
    pub const CHANGELOG: &str = "changelog";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FactValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FactValue::Bool(_) => "bool",
            FactValue::Number(_) => "number",
            FactValue::Text(_) => "text",
            FactValue::List(_) => "list",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FactValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FactValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FactValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FactValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl std::fmt::Display for FactValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactValue::Bool(b) => write!(f, "{}", b),
            FactValue::Number(n) => write!(f, "{}", n),
            FactValue::Text(s) => write!(f, "{}", s),
            FactValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Text(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Text(value)
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Bool(value)
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        FactValue::Number(value)
    }
}

impl From<usize> for FactValue {
    fn from(value: usize) -> Self {
        FactValue::Number(value as f64)
    }
}

impl From<Vec<String>> for FactValue {
    fn from(value: Vec<String>) -> Self {
        FactValue::List(value)
    }
}
