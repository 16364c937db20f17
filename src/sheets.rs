//! Spreadsheet store interface, worksheet names, A1 ranges and reference tables.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PipelineError, PipelineResult};
use crate::types::Grid;

/// Tab holding promo codes; its `B1` cell carries the vendor-id lookup formula.
pub const PROMO_CODES_TAB: &str = "Promo Codes";
/// Tab holding this year's orders.
pub const CURRENT_ORDERS_TAB: &str = "Current Year Orders";
/// Tab holding previous years' orders (used by the full reload).
pub const HISTORICAL_ORDERS_TAB: &str = "Historical Orders";
/// Tab receiving the non-local show reference table.
pub const NON_LOCAL_TAB: &str = "Link to Market Info";
/// Tab receiving the local radio reference table.
pub const LOCAL_RADIO_TAB: &str = "Link to Market Info - Local Radio";

/// Cell the vendor-id formula is written to.
pub const VENDOR_ID_CELL: &str = "B1";

/// Resolves a vendor id per promo-code row from the two reference tabs, falling back to
/// column `AF` when no lookup matches.
pub const VENDOR_ID_FORMULA: &str = concat!(
    r#"=ARRAYFORMULA(IF(ROW(B1:B) = 1,"Vendor ID",iferror(IF(A1:A <> "","#,
    r#"IFERROR(VLOOKUP(AF1:AF,'Link to Market Info'!A:M,13,False),"#,
    r#"IFERROR(VLOOKUP(A1:A,'Link to Market Info'!B:M,12,False), "#,
    r#"iferror(VLOOKUP(A1:A,'Link to Market Info'!F:M,8,FALSE),"#,
    r#"(VLOOKUP(A1:A,'Link to Market Info - Local Radio'!B:D,3,FALSE))))),""),AF1:AF)))"#,
);

/// Worksheet access for one spreadsheet service.
///
/// Documents are addressed by id, tabs by name.
pub trait SpreadsheetStore {
    /// Read the full grid of a tab.
    fn read_tab(&self, document_id: &str, tab: &str) -> PipelineResult<Grid>;

    /// Write a formula into a single cell.
    fn write_formula(&mut self, document_id: &str, tab: &str, cell: &str, formula: &str) -> PipelineResult<()>;

    /// Write `values` row-major into `range`. `values.len()` must equal the cell count.
    fn write_range(&mut self, document_id: &str, tab: &str, range: &CellRange, values: &[String]) -> PipelineResult<()>;

    /// Remove every value from a tab.
    fn clear_tab(&mut self, document_id: &str, tab: &str) -> PipelineResult<()>;
}

impl<T: SpreadsheetStore + ?Sized> SpreadsheetStore for &mut T {
    fn read_tab(&self, document_id: &str, tab: &str) -> PipelineResult<Grid> {
        (**self).read_tab(document_id, tab)
    }

    fn write_formula(&mut self, document_id: &str, tab: &str, cell: &str, formula: &str) -> PipelineResult<()> {
        (**self).write_formula(document_id, tab, cell, formula)
    }

    fn write_range(&mut self, document_id: &str, tab: &str, range: &CellRange, values: &[String]) -> PipelineResult<()> {
        (**self).write_range(document_id, tab, range, values)
    }

    fn clear_tab(&mut self, document_id: &str, tab: &str) -> PipelineResult<()> {
        (**self).clear_tab(document_id, tab)
    }
}

/// Column letters for a zero-based column index (`0 -> A`, `25 -> Z`, `26 -> AA`).
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for b in letters.bytes() {
        if !b.is_ascii_uppercase() {
            return None;
        }
        n = n.checked_mul(26)?.checked_add(usize::from(b - b'A' + 1))?;
    }
    Some(n - 1)
}

/// A rectangular A1-notation range such as `A1:D12`.
///
/// Columns are zero-based, rows one-based (as displayed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub first_column: usize,
    pub first_row: usize,
    pub last_column: usize,
    pub last_row: usize,
}

impl CellRange {
    /// Range anchored at `A1` covering `columns` x `rows` cells.
    pub fn from_origin(columns: usize, rows: usize) -> Self {
        Self {
            first_column: 0,
            first_row: 1,
            last_column: columns.saturating_sub(1),
            last_row: rows.max(1),
        }
    }

    /// Parse `A1:D12` (or a single cell such as `B1`).
    pub fn parse(input: &str) -> PipelineResult<Self> {
        let invalid = || PipelineError::Spreadsheet(format!("invalid A1 range '{input}'"));
        let parse_cell = |cell: &str| -> Option<(usize, usize)> {
            let split = cell.find(|c: char| c.is_ascii_digit())?;
            let (letters, digits) = cell.split_at(split);
            let row: usize = digits.parse().ok().filter(|r| *r > 0)?;
            Some((column_index(letters)?, row))
        };

        let (start, end) = match input.split_once(':') {
            Some((a, b)) => (a, b),
            None => (input, input),
        };
        let (first_column, first_row) = parse_cell(start.trim()).ok_or_else(invalid)?;
        let (last_column, last_row) = parse_cell(end.trim()).ok_or_else(invalid)?;
        if last_column < first_column || last_row < first_row {
            return Err(invalid());
        }
        Ok(Self {
            first_column,
            first_row,
            last_column,
            last_row,
        })
    }

    pub fn columns(&self) -> usize {
        self.last_column - self.first_column + 1
    }

    pub fn rows(&self) -> usize {
        self.last_row - self.first_row + 1
    }

    pub fn cell_count(&self) -> usize {
        self.columns() * self.rows()
    }

    /// `(row, column)` positions (zero-based) in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.first_row - 1..self.last_row)
            .flat_map(move |r| (self.first_column..=self.last_column).map(move |c| (r, c)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}{}",
            column_letters(self.first_column),
            self.first_row,
            column_letters(self.last_column),
            self.last_row
        )
    }
}

/// Header of the local radio reference table.
pub const LOCAL_RADIO_COLUMNS: [&str; 4] = ["client_name", "combined", "date_added", "pseudo_vendor_id"];

/// Header of the non-local show reference table.
pub const NON_LOCAL_COLUMNS: [&str; 13] = [
    "vendor_id",
    "station_name",
    "market_name",
    "Media_Type",
    "Adjusted_Market_Name",
    "Adjusted_Show_Name",
    "Genre_itunes",
    "Genre_ARM",
    "Subgenre_iTunes",
    "Subgenre_ARM",
    "Itunes_URL",
    "Unique_show_flag",
    "Master_vendor_id",
];

/// A lookup table written back into a worksheet tab after each import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTable {
    pub tab: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReferenceTable {
    pub fn new(tab: impl Into<String>, header: &[&str], rows: Vec<Vec<String>>) -> Self {
        Self {
            tab: tab.into(),
            header: header.iter().map(|h| (*h).to_string()).collect(),
            rows,
        }
    }

    /// Build from a query result whose first row is the result header.
    ///
    /// The fixed `header` replaces the result header; rows are padded or truncated to it.
    pub fn from_query(tab: impl Into<String>, header: &[&str], grid: Grid) -> Self {
        let width = header.len();
        let rows = grid
            .into_iter()
            .skip(1)
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self::new(tab, header, rows)
    }

    pub fn local_radio(grid: Grid) -> Self {
        Self::from_query(LOCAL_RADIO_TAB, &LOCAL_RADIO_COLUMNS, grid)
    }

    pub fn non_local(grid: Grid) -> Self {
        Self::from_query(NON_LOCAL_TAB, &NON_LOCAL_COLUMNS, grid)
    }

    /// True when the table has no data rows (the header alone is never written).
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Range covering header plus rows.
    pub fn range(&self) -> CellRange {
        CellRange::from_origin(self.header.len(), self.rows.len() + 1)
    }

    /// Header then rows, flattened row-major.
    pub fn cells(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.header.len() * (self.rows.len() + 1));
        out.extend(self.header.iter().cloned());
        for row in &self.rows {
            out.extend(row.iter().cloned());
        }
        out
    }

    /// Clear the tab and write the table into it.
    pub fn write_to<S: SpreadsheetStore + ?Sized>(&self, store: &mut S, document_id: &str) -> PipelineResult<()> {
        let range = self.range();
        let cells = self.cells();
        store.clear_tab(document_id, &self.tab)?;
        store.write_range(document_id, &self.tab, &range, &cells)
    }
}

/// Write `values` into `grid` at `range`, growing the grid as needed.
pub fn apply_range(grid: &mut Grid, range: &CellRange, values: &[String]) -> PipelineResult<()> {
    if values.len() != range.cell_count() {
        return Err(PipelineError::Spreadsheet(format!(
            "range {range} holds {} cells but {} values were given",
            range.cell_count(),
            values.len()
        )));
    }
    for ((r, c), value) in range.positions().zip(values) {
        if grid.len() <= r {
            grid.resize(r + 1, Vec::new());
        }
        let row = &mut grid[r];
        if row.len() <= c {
            row.resize(c + 1, String::new());
        }
        row[c] = value.clone();
    }
    Ok(())
}

/// Spreadsheets held in memory, keyed by document id then tab name.
#[derive(Debug, Default, Clone)]
pub struct MemoryWorkbooks {
    tabs: BTreeMap<String, BTreeMap<String, Grid>>,
    formulas: Vec<(String, String, String, String)>,
}

impl MemoryWorkbooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tab.
    pub fn set_tab(&mut self, document_id: &str, tab: &str, grid: Grid) {
        self.tabs
            .entry(document_id.to_string())
            .or_default()
            .insert(tab.to_string(), grid);
    }

    pub fn tab(&self, document_id: &str, tab: &str) -> Option<&Grid> {
        self.tabs.get(document_id)?.get(tab)
    }

    /// Formulas written so far as `(document_id, tab, cell, formula)`.
    pub fn formulas(&self) -> &[(String, String, String, String)] {
        &self.formulas
    }

    fn tab_mut(&mut self, document_id: &str, tab: &str) -> PipelineResult<&mut Grid> {
        self.tabs
            .get_mut(document_id)
            .and_then(|tabs| tabs.get_mut(tab))
            .ok_or_else(|| PipelineError::Spreadsheet(format!("worksheet '{tab}' not found in {document_id}")))
    }
}

impl SpreadsheetStore for MemoryWorkbooks {
    fn read_tab(&self, document_id: &str, tab: &str) -> PipelineResult<Grid> {
        self.tab(document_id, tab)
            .cloned()
            .ok_or_else(|| PipelineError::Spreadsheet(format!("worksheet '{tab}' not found in {document_id}")))
    }

    fn write_formula(&mut self, document_id: &str, tab: &str, cell: &str, formula: &str) -> PipelineResult<()> {
        self.tab_mut(document_id, tab)?;
        self.formulas.push((
            document_id.to_string(),
            tab.to_string(),
            cell.to_string(),
            formula.to_string(),
        ));
        Ok(())
    }

    fn write_range(&mut self, document_id: &str, tab: &str, range: &CellRange, values: &[String]) -> PipelineResult<()> {
        apply_range(self.tab_mut(document_id, tab)?, range, values)
    }

    fn clear_tab(&mut self, document_id: &str, tab: &str) -> PipelineResult<()> {
        self.tab_mut(document_id, tab)?.clear();
        Ok(())
    }
}
