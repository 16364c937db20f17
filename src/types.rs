//! Core data model types.
//!
//! Worksheet grids are reshaped into an in-memory [`DataSet`] described by a [`Schema`]
//! (a list of typed [`Field`]s) before being rendered to CSV for bulk loading. The
//! document/ledger/notification snapshots exchanged by the scanner, dispatcher and
//! importer live here as well.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Calendar date.
    Date,
}

impl DataType {
    /// Warehouse column type used when creating tables for this type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Int64 => "BIGINT",
            DataType::Float64 => "FLOAT",
            DataType::Bool => "BOOLEAN",
            DataType::Utf8 => "VARCHAR(65535)",
            DataType::Date => "TIMESTAMP",
        }
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A list of fields describing the shape of a reshaped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single typed value in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Calendar date.
    Date(NaiveDate),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render the value the way it is written into CSV files and worksheet cells.
    ///
    /// Nulls render as an empty string, dates as `YYYY-MM-DD`.
    pub fn to_cell(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int64(v) => v.to_string(),
            Value::Float64(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Utf8(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of null cells in the named column, or `None` if the column is unknown.
    pub fn null_count(&self, column: &str) -> Option<usize> {
        let idx = self.schema.index_of(column)?;
        Some(
            self.rows
                .iter()
                .filter(|row| row.get(idx).is_none_or(Value::is_null))
                .count(),
        )
    }

    /// Render every row as worksheet cell strings, header first.
    pub fn to_cell_rows(&self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(self.schema.field_names().map(str::to_owned).collect());
        out.extend(
            self.rows
                .iter()
                .map(|row| row.iter().map(Value::to_cell).collect()),
        );
        out
    }
}

/// A worksheet or query result as rows of cell strings, header row first.
pub type Grid = Vec<Vec<String>>;

/// Message attribute carrying the document id.
pub const ID_ATTRIBUTE: &str = "id";
/// Message attribute carrying the document name.
pub const NAME_ATTRIBUTE: &str = "name";
/// Message attribute carrying the document modification time.
pub const MODIFIED_TIME_ATTRIBUTE: &str = "modifiedTime";

/// Snapshot of one document in the monitored folder, taken at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedDocument {
    pub id: String,
    pub name: String,
    #[serde(rename = "modifiedTime")]
    pub modified_time: String,
}

impl WatchedDocument {
    pub fn new(id: impl Into<String>, name: impl Into<String>, modified_time: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            modified_time: modified_time.into(),
        }
    }

    /// Spreadsheet URL for this document.
    pub fn url(&self) -> String {
        document_url(&self.id)
    }
}

/// Spreadsheet URL for a document id.
pub fn document_url(id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{id}/edit")
}

/// Persisted last-seen state of a document, keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "modifiedTime")]
    pub modified_time: String,
}

impl From<&WatchedDocument> for LedgerRecord {
    fn from(doc: &WatchedDocument) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            modified_time: doc.modified_time.clone(),
        }
    }
}

/// Request to import one document.
///
/// Only `id` is trusted by the importer; `name` and `modified_time` are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportNotification {
    pub id: String,
    pub name: String,
    #[serde(rename = "modifiedTime")]
    pub modified_time: String,
}

impl ImportNotification {
    pub fn new(id: impl Into<String>, name: impl Into<String>, modified_time: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            modified_time: modified_time.into(),
        }
    }

    /// Spreadsheet URL for the notified document.
    pub fn url(&self) -> String {
        document_url(&self.id)
    }
}

impl From<&WatchedDocument> for ImportNotification {
    fn from(doc: &WatchedDocument) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            modified_time: doc.modified_time.clone(),
        }
    }
}
