//! Filesystem-backed workbooks.
//!
//! Layout: one sub-directory per document under the root, named by document id. Each tab
//! is a headerless CSV file `<tab>.csv`; an optional `name` file holds the document title.
//! Formulas go to a `formulas.csv` sidecar of `tab,cell,formula` rows so the data grids
//! keep their header rows.
//!
//! A document's modified time is the newest modification time of its tab and `name`
//! files, rendered as RFC 3339 UTC with milliseconds. The formulas sidecar is excluded.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::scanner::{DocumentPage, DocumentSource};
use crate::sheets::{CellRange, SpreadsheetStore, apply_range};
use crate::types::{Grid, WatchedDocument};

const NAME_FILE: &str = "name";
const FORMULAS_FILE: &str = "formulas.csv";

/// Workbooks stored as directories of CSV files.
#[derive(Debug, Clone)]
pub struct LocalWorkbooks {
    root: PathBuf,
    page_size: usize,
}

impl LocalWorkbooks {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: 100,
        }
    }

    /// Page size is clamped to at least one document.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, document_id: &str) -> PipelineResult<PathBuf> {
        let mut components = Path::new(document_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(document_id)),
            _ => Err(PipelineError::Source(format!("invalid document id '{document_id}'"))),
        }
    }

    fn tab_path(&self, document_id: &str, tab: &str) -> PipelineResult<PathBuf> {
        Ok(self.document_dir(document_id)?.join(format!("{tab}.csv")))
    }

    fn existing_tab_path(&self, document_id: &str, tab: &str) -> PipelineResult<PathBuf> {
        let path = self.tab_path(document_id, tab)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(PipelineError::Spreadsheet(format!("worksheet '{tab}' not found in {document_id}")))
        }
    }

    fn document_ids(&self) -> PipelineResult<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| PipelineError::Source(format!("cannot list {}: {e}", self.root.display())))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(id) = entry.file_name().to_str() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn snapshot(&self, document_id: &str) -> PipelineResult<WatchedDocument> {
        let dir = self.document_dir(document_id)?;
        if !dir.is_dir() {
            return Err(PipelineError::Source(format!("document {document_id} not found")));
        }

        let name = match fs::read_to_string(dir.join(NAME_FILE)) {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => document_id.to_string(),
        };

        // The formulas sidecar is only written by imports and must not retrigger them.
        let mut newest = SystemTime::UNIX_EPOCH;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_name() == FORMULAS_FILE {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                newest = newest.max(meta.modified()?);
            }
        }
        let modified: DateTime<Utc> = newest.into();

        Ok(WatchedDocument::new(
            document_id,
            name,
            modified.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        ))
    }

    fn write_grid(path: &Path, grid: &Grid) -> PipelineResult<()> {
        let mut wtr = csv::WriterBuilder::new().flexible(true).from_path(path)?;
        for row in grid {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn read_grid(path: &Path) -> PipelineResult<Grid> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        let mut grid = Grid::new();
        for record in rdr.records() {
            grid.push(record?.iter().map(str::to_owned).collect());
        }
        Ok(grid)
    }

    /// Formulas written into a document, as `[tab, cell, formula]` rows.
    pub fn formulas(&self, document_id: &str) -> PipelineResult<Grid> {
        let path = self.document_dir(document_id)?.join(FORMULAS_FILE);
        if path.is_file() {
            Self::read_grid(&path)
        } else {
            Ok(Grid::new())
        }
    }
}

impl DocumentSource for LocalWorkbooks {
    fn list_page(&self, page_token: Option<&str>) -> PipelineResult<DocumentPage> {
        let offset = match page_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| PipelineError::Source(format!("invalid page token '{token}'")))?,
        };
        let ids = self.document_ids()?;
        let end = (offset + self.page_size).min(ids.len());
        let documents = ids
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|id| self.snapshot(id))
            .collect::<PipelineResult<Vec<_>>>()?;
        let next_page_token = (end < ids.len()).then(|| end.to_string());
        debug!(offset, returned = documents.len(), "listed workbook page");
        Ok(DocumentPage {
            documents,
            next_page_token,
        })
    }

    fn fetch(&self, id: &str) -> PipelineResult<WatchedDocument> {
        self.snapshot(id)
    }
}

impl SpreadsheetStore for LocalWorkbooks {
    fn read_tab(&self, document_id: &str, tab: &str) -> PipelineResult<Grid> {
        let path = self.existing_tab_path(document_id, tab)?;
        Self::read_grid(&path)
    }

    fn write_formula(&mut self, document_id: &str, tab: &str, cell: &str, formula: &str) -> PipelineResult<()> {
        self.existing_tab_path(document_id, tab)?;
        let mut formulas = self.formulas(document_id)?;
        formulas.retain(|row| !(row.first().is_some_and(|t| t == tab) && row.get(1).is_some_and(|c| c == cell)));
        formulas.push(vec![tab.to_string(), cell.to_string(), formula.to_string()]);
        Self::write_grid(&self.document_dir(document_id)?.join(FORMULAS_FILE), &formulas)
    }

    fn write_range(&mut self, document_id: &str, tab: &str, range: &CellRange, values: &[String]) -> PipelineResult<()> {
        let path = self.existing_tab_path(document_id, tab)?;
        let mut grid = Self::read_grid(&path)?;
        apply_range(&mut grid, range, values)?;
        Self::write_grid(&path, &grid)
    }

    fn clear_tab(&mut self, document_id: &str, tab: &str) -> PipelineResult<()> {
        let path = self.existing_tab_path(document_id, tab)?;
        fs::write(&path, b"")?;
        Ok(())
    }
}
