//! Change ledger: the durable record of the last-seen modification time per document.
//!
//! `put` is an upsert keyed by document id. There is no delete; concurrent writers for the
//! same id race and the last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::types::LedgerRecord;

/// Key-value store of [`LedgerRecord`]s keyed by document id.
pub trait ChangeLedger {
    /// Returns the record for `id`, if any.
    fn get(&self, id: &str) -> PipelineResult<Option<LedgerRecord>>;

    /// Creates or overwrites the record for `record.id`.
    fn put(&mut self, record: LedgerRecord) -> PipelineResult<()>;
}

impl<L: ChangeLedger + ?Sized> ChangeLedger for &mut L {
    fn get(&self, id: &str) -> PipelineResult<Option<LedgerRecord>> {
        (**self).get(id)
    }

    fn put(&mut self, record: LedgerRecord) -> PipelineResult<()> {
        (**self).put(record)
    }
}

/// In-process ledger.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    records: BTreeMap<String, LedgerRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in id order.
    pub fn records(&self) -> impl Iterator<Item = &LedgerRecord> {
        self.records.values()
    }
}

impl ChangeLedger for MemoryLedger {
    fn get(&self, id: &str) -> PipelineResult<Option<LedgerRecord>> {
        Ok(self.records.get(id).cloned())
    }

    fn put(&mut self, record: LedgerRecord) -> PipelineResult<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }
}

/// Ledger persisted as a single JSON object (`{"<id>": {record}, ...}`).
///
/// Every `put` rewrites the file through a temporary sibling and a rename, so a crash
/// leaves either the old or the new contents on disk.
#[derive(Debug)]
pub struct JsonFileLedger {
    path: PathBuf,
    records: BTreeMap<String, LedgerRecord>,
}

impl JsonFileLedger {
    /// Open the ledger at `path`. A missing file is an empty ledger.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                PipelineError::Ledger(format!("invalid ledger file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(PipelineError::Ledger(format!(
                    "cannot read ledger file {}: {e}",
                    path.display()
                )));
            }
        };
        debug!(path = %path.display(), records = records.len(), "opened ledger");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self) -> PipelineResult<()> {
        let text = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Ledger(format!("cannot create {}: {e}", parent.display())))?;
        }
        fs::write(&tmp, text)
            .map_err(|e| PipelineError::Ledger(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| PipelineError::Ledger(format!("cannot replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl ChangeLedger for JsonFileLedger {
    fn get(&self, id: &str) -> PipelineResult<Option<LedgerRecord>> {
        Ok(self.records.get(id).cloned())
    }

    fn put(&mut self, record: LedgerRecord) -> PipelineResult<()> {
        let previous = self.records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.persist() {
            // Keep memory consistent with disk.
            match previous {
                Some(prev) => self.records.insert(prev.id.clone(), prev),
                None => self.records.remove(&record.id),
            };
            return Err(e);
        }
        Ok(())
    }
}
