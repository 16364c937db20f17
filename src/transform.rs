//! Reshaping worksheet grids into typed datasets and CSV.
//!
//! Rules:
//!
//! - The first grid row is the header.
//! - Orders: current-year rows followed by history rows, aligned by position, renamed to
//!   [`orders_schema`]. Numeric cells drop thousands separators and `$`; blank cells are null.
//! - Promo codes: selected by source column name and renamed to [`promo_codes_schema`];
//!   blank and `#N/A` cells are null.

use chrono::NaiveDate;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Grid, Schema, Value};

/// A worksheet grid split into header and data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Split a grid. Data rows are padded or truncated to the header width.
    pub fn from_grid(grid: Grid) -> Self {
        let mut it = grid.into_iter();
        let headers: Vec<String> = match it.next() {
            Some(h) => h.into_iter().map(|s| s.trim().to_string()).collect(),
            None => return Self::default(),
        };
        let width = headers.len();
        let rows = it
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Canonical warehouse columns for orders, in sheet column order.
pub fn orders_schema() -> Schema {
    use DataType::*;
    let fields = [
        ("date", Date),
        ("discount_code", Utf8),
        ("client_name", Utf8),
        ("orders", Float64),
        ("conversions", Float64),
        ("revenue", Float64),
        ("session", Float64),
        ("downloads_installs", Float64),
        ("discounts", Float64),
        ("lead_impressions", Float64),
        ("users", Float64),
        ("new_users", Float64),
        ("approvals", Float64),
        ("funded_loans_amounts", Float64),
        ("tracking_type", Utf8),
        ("product_type", Utf8),
        ("lead_impression_type", Utf8),
        ("unattributed_orders", Float64),
        ("session_type", Utf8),
        ("code_leak_date", Utf8),
        ("extra_1", Float64),
        ("extra_2", Float64),
        ("extra_3", Float64),
    ];
    Schema::new(fields.into_iter().map(|(n, t)| Field::new(n, t)).collect())
}

/// Promo-code source columns and their warehouse names.
pub const PROMO_CODE_COLUMNS: [(&str, &str); 7] = [
    ("Show Name", "show_name"),
    ("Vendor ID", "vendor_id"),
    ("Client", "client"),
    ("Promo Code", "promo_code"),
    ("Budget Show Name", "budget_show_name"),
    ("Unique Code", "unique_code"),
    ("Code Leak Date", "code_leak_date"),
];

/// Canonical warehouse columns for promo codes.
pub fn promo_codes_schema() -> Schema {
    Schema::new(
        PROMO_CODE_COLUMNS
            .iter()
            .map(|(_, name)| {
                let t = if *name == "vendor_id" { DataType::Int64 } else { DataType::Utf8 };
                Field::new(*name, t)
            })
            .collect(),
    )
}

/// Parse a currency-like cell (`"$1,234.50"`) into a float; blank is null.
pub fn parse_currency(row: usize, column: &str, raw: &str) -> PipelineResult<Value> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',' && *c != '$').collect();
    if cleaned.is_empty() {
        return Ok(Value::Null);
    }
    cleaned
        .parse::<f64>()
        .map(Value::Float64)
        .map_err(|e| PipelineError::ParseError {
            row,
            column: column.to_owned(),
            raw: raw.to_owned(),
            message: e.to_string(),
        })
}

// `%Y` also accepts two digits, so the short-year form has to be tried first.
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d"];

/// Parse a date cell. Accepts ISO dates, US `m/d/Y` dates and a trailing time part.
pub fn parse_date(row: usize, column: &str, raw: &str) -> PipelineResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .map(Value::Date)
        .ok_or_else(|| PipelineError::ParseError {
            row,
            column: column.to_owned(),
            raw: raw.to_owned(),
            message: "expected a date (YYYY-MM-DD or MM/DD/YYYY)".to_string(),
        })
}

fn parse_int(row: usize, column: &str, raw: &str) -> PipelineResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(Value::Int64(v));
    }
    // Sheets renders looked-up integers as "123.0" at times.
    match trimmed.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Value::Int64(v as i64)),
        _ => Err(PipelineError::ParseError {
            row,
            column: column.to_owned(),
            raw: raw.to_owned(),
            message: "expected integer".to_string(),
        }),
    }
}

fn parse_typed_value(row: usize, column: &str, data_type: DataType, raw: &str) -> PipelineResult<Value> {
    match data_type {
        DataType::Float64 => parse_currency(row, column, raw),
        DataType::Date => parse_date(row, column, raw),
        DataType::Int64 => parse_int(row, column, raw),
        DataType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Value::Null),
            "true" | "t" | "1" | "yes" | "y" => Ok(Value::Bool(true)),
            "false" | "f" | "0" | "no" | "n" => Ok(Value::Bool(false)),
            _ => Err(PipelineError::ParseError {
                row,
                column: column.to_owned(),
                raw: raw.to_owned(),
                message: "expected bool (true/false/1/0/yes/no)".to_string(),
            }),
        },
        DataType::Utf8 => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Utf8(trimmed.to_owned()))
            }
        }
    }
}

/// Build the orders dataset from the current-year tab and the history rows.
///
/// The current tab must have exactly as many columns as [`orders_schema`]; history rows
/// are taken positionally (extra cells dropped, missing cells null).
pub fn orders_dataset(current: &RawTable, history: &RawTable) -> PipelineResult<DataSet> {
    let schema = orders_schema();
    if current.headers.len() != schema.fields.len() {
        return Err(PipelineError::SchemaMismatch {
            message: format!(
                "expected {} order columns, found {}. headers={:?}",
                schema.fields.len(),
                current.headers.len(),
                current.headers
            ),
        });
    }

    let mut rows = Vec::with_capacity(current.rows.len() + history.rows.len());
    let all = current.rows.iter().chain(history.rows.iter());
    for (idx0, raw_row) in all.enumerate() {
        // 1-based, +1 for the header row.
        let user_row = idx0 + 2;
        let mut row = Vec::with_capacity(schema.fields.len());
        for (col, field) in schema.fields.iter().enumerate() {
            let raw = raw_row.get(col).map(String::as_str).unwrap_or("");
            row.push(parse_typed_value(user_row, &field.name, field.data_type, raw)?);
        }
        rows.push(row);
    }

    Ok(DataSet::new(schema, rows))
}

/// Build the promo-codes dataset from the `Promo Codes` tab.
pub fn promo_codes_dataset(raw: &RawTable) -> PipelineResult<DataSet> {
    let schema = promo_codes_schema();

    let mut col_idxs = Vec::with_capacity(PROMO_CODE_COLUMNS.len());
    for (source, _) in PROMO_CODE_COLUMNS {
        match raw.column(source) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(PipelineError::SchemaMismatch {
                    message: format!("missing required column '{source}'. headers={:?}", raw.headers),
                });
            }
        }
    }

    let mut rows = Vec::with_capacity(raw.rows.len());
    for (idx0, raw_row) in raw.rows.iter().enumerate() {
        let user_row = idx0 + 2;
        let mut row = Vec::with_capacity(schema.fields.len());
        for (field, &src) in schema.fields.iter().zip(col_idxs.iter()) {
            let cell = raw_row.get(src).map(String::as_str).unwrap_or("");
            let cell = if cell.trim() == "#N/A" { "" } else { cell };
            row.push(parse_typed_value(user_row, &field.name, field.data_type, cell)?);
        }
        rows.push(row);
    }

    Ok(DataSet::new(schema, rows))
}

/// Render a dataset as CSV with a header row. Nulls are written as empty fields.
pub fn to_csv_bytes(dataset: &DataSet) -> PipelineResult<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(dataset.schema.field_names())?;
    for row in &dataset.rows {
        wtr.write_record(row.iter().map(Value::to_cell))?;
    }
    wtr.into_inner().map_err(|e| PipelineError::Io(e.into_error()))
}
