//! Folder scanning and change classification.
//!
//! A scan cycle walks every document the [`DocumentSource`] lists (page by page, lazily),
//! compares each snapshot with the [`ChangeLedger`], and dispatches an
//! [`ImportNotification`] for documents classified [`Classification::New`] or
//! [`Classification::Changed`]. The ledger is only advanced after a successful dispatch,
//! so a failed import is picked up again by the next scan.
//!
//! Per document the states are:
//!
//! ```text
//! UNSEEN -> NEW | CHANGED | UNCHANGED
//! NEW | CHANGED -> (dispatch) -> LEDGER_UPDATED | STALE
//! ```
//!
//! Two behaviours are explicit options rather than fixed rules:
//!
//! - [`UnchangedPolicy`]: whether documents whose timestamp matches the ledger are skipped
//!   or dispatched anyway.
//! - [`BootstrapWrite`]: whether a NEW document's snapshot is written to the ledger before
//!   dispatch, or only after the dispatch succeeded.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::PipelineResult;
use crate::ledger::ChangeLedger;
use crate::observability::PipelineObserver;
use crate::types::{ImportNotification, LedgerRecord, WatchedDocument};

/// One page of a folder listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentPage {
    pub documents: Vec<WatchedDocument>,
    /// Opaque token for the next page; `None` ends the listing.
    pub next_page_token: Option<String>,
}

/// A paginated listing of the documents in one monitored folder.
pub trait DocumentSource {
    /// List one page. `page_token` is `None` for the first page.
    fn list_page(&self, page_token: Option<&str>) -> PipelineResult<DocumentPage>;

    /// Re-read the current metadata of a single document.
    fn fetch(&self, id: &str) -> PipelineResult<WatchedDocument>;

    /// Lazily iterate all documents, following page tokens until exhausted.
    fn documents(&self) -> DocumentPages<'_, Self> {
        DocumentPages::new(self)
    }
}

impl<S: DocumentSource + ?Sized> DocumentSource for &S {
    fn list_page(&self, page_token: Option<&str>) -> PipelineResult<DocumentPage> {
        (**self).list_page(page_token)
    }

    fn fetch(&self, id: &str) -> PipelineResult<WatchedDocument> {
        (**self).fetch(id)
    }
}

/// Iterator over every document of a [`DocumentSource`].
///
/// Pages are requested on demand. A listing error is yielded once and ends the iteration.
pub struct DocumentPages<'a, S: ?Sized> {
    source: &'a S,
    buffered: VecDeque<WatchedDocument>,
    next_token: Option<String>,
    started: bool,
    done: bool,
}

impl<'a, S: DocumentSource + ?Sized> DocumentPages<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            buffered: VecDeque::new(),
            next_token: None,
            started: false,
            done: false,
        }
    }
}

impl<S: DocumentSource + ?Sized> Iterator for DocumentPages<'_, S> {
    type Item = PipelineResult<WatchedDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.buffered.pop_front() {
                return Some(Ok(doc));
            }
            if self.done {
                return None;
            }

            let token = if self.started { self.next_token.as_deref() } else { None };
            match self.source.list_page(token) {
                Ok(page) => {
                    debug!(documents = page.documents.len(), more = page.next_page_token.is_some(), "listed page");
                    self.started = true;
                    self.buffered.extend(page.documents);
                    self.next_token = page.next_page_token;
                    if self.next_token.is_none() {
                        self.done = true;
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// How a document compares with its ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No ledger record exists.
    New,
    /// The ledger records a different modification time.
    Changed,
    /// The ledger records the same modification time.
    Unchanged,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::New => "new",
            Classification::Changed => "changed",
            Classification::Unchanged => "unchanged",
        })
    }
}

/// Classify a snapshot against its ledger record (or absence of one).
pub fn classify(document: &WatchedDocument, record: Option<&LedgerRecord>) -> Classification {
    match record {
        None => Classification::New,
        Some(r) if r.modified_time == document.modified_time => Classification::Unchanged,
        Some(_) => Classification::Changed,
    }
}

/// What to do with documents whose timestamp matches the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedPolicy {
    /// Do nothing.
    #[default]
    Skip,
    /// Dispatch the document again. The ledger is left as is.
    Reimport,
}

/// When a NEW document's first snapshot is written to the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapWrite {
    /// Write the scanned snapshot before dispatching. A failed first import is then
    /// retried only if the document changes again.
    #[default]
    BeforeDispatch,
    /// Write only after a successful dispatch, like CHANGED documents.
    AfterDispatch,
}

/// Options for a [`Scanner`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub unchanged_policy: UnchangedPolicy,
    pub bootstrap: BootstrapWrite,
}

/// Where a document ended up after one scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentState {
    /// Timestamp matched; nothing was dispatched.
    Unchanged,
    /// Dispatched, and the ledger now holds the re-fetched snapshot.
    LedgerUpdated,
    /// Unchanged but dispatched again under [`UnchangedPolicy::Reimport`].
    Reimported,
    /// Dispatch or re-fetch failed; the ledger was not advanced.
    Stale { error: String },
}

/// Result of scanning one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentOutcome {
    pub document: WatchedDocument,
    pub classification: Classification,
    pub state: DocumentState,
}

/// Result of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl ScanReport {
    pub fn scanned(&self) -> usize {
        self.outcomes.len()
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.classification == classification)
            .count()
    }

    /// Documents for which a notification was dispatched successfully.
    pub fn dispatched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, DocumentState::LedgerUpdated | DocumentState::Reimported))
            .count()
    }

    pub fn stale(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, DocumentState::Stale { .. }))
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={}, new={}, changed={}, unchanged={}, dispatched={}, stale={}",
            self.scanned(),
            self.count(Classification::New),
            self.count(Classification::Changed),
            self.count(Classification::Unchanged),
            self.dispatched(),
            self.stale().count()
        )
    }
}

/// Runs scan cycles.
#[derive(Clone, Default)]
pub struct Scanner {
    options: ScanOptions,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("options", &self.options)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> ScanOptions {
        self.options
    }

    /// Run one scan cycle.
    ///
    /// Listing and ledger failures abort the cycle and are returned. Dispatch and re-fetch
    /// failures are recorded per document as [`DocumentState::Stale`].
    pub fn scan<S, L, D>(&self, source: &S, ledger: &mut L, dispatcher: &mut D) -> PipelineResult<ScanReport>
    where
        S: DocumentSource + ?Sized,
        L: ChangeLedger + ?Sized,
        D: Dispatcher + ?Sized,
    {
        let mut report = ScanReport::default();

        for item in source.documents() {
            let document = item?;
            info!(
                document_id = %document.id,
                name = %document.name,
                modified_time = %document.modified_time,
                "found document"
            );

            let record = ledger.get(&document.id)?;
            let classification = classify(&document, record.as_ref());
            if let Some(obs) = &self.observer {
                obs.on_classified(&document, classification);
            }

            let state = match classification {
                Classification::Unchanged => match self.options.unchanged_policy {
                    UnchangedPolicy::Skip => {
                        info!(document_id = %document.id, "timestamp matches ledger, skipping import");
                        DocumentState::Unchanged
                    }
                    UnchangedPolicy::Reimport => {
                        info!(document_id = %document.id, "timestamp matches ledger, importing anyway");
                        match self.notify(&document, dispatcher) {
                            Ok(()) => DocumentState::Reimported,
                            Err(error) => DocumentState::Stale { error },
                        }
                    }
                },
                Classification::New => {
                    if self.options.bootstrap == BootstrapWrite::BeforeDispatch {
                        info!(document_id = %document.id, "no previous timestamp, recording first snapshot");
                        ledger.put(LedgerRecord::from(&document))?;
                    }
                    self.dispatch_and_advance(&document, source, ledger, dispatcher)?
                }
                Classification::Changed => {
                    info!(document_id = %document.id, "timestamp differs from ledger, importing");
                    self.dispatch_and_advance(&document, source, ledger, dispatcher)?
                }
            };

            report.outcomes.push(DocumentOutcome {
                document,
                classification,
                state,
            });
        }

        info!(%report, "scan cycle finished");
        Ok(report)
    }

    fn notify<D: Dispatcher + ?Sized>(&self, document: &WatchedDocument, dispatcher: &mut D) -> Result<(), String> {
        let notification = ImportNotification::from(document);
        match dispatcher.dispatch(&notification) {
            Ok(()) => {
                if let Some(obs) = &self.observer {
                    obs.on_dispatched(&notification);
                }
                Ok(())
            }
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "dispatch failed, ledger not advanced");
                if let Some(obs) = &self.observer {
                    obs.on_stale(document, &e);
                }
                Err(e.to_string())
            }
        }
    }

    fn dispatch_and_advance<S, L, D>(
        &self,
        document: &WatchedDocument,
        source: &S,
        ledger: &mut L,
        dispatcher: &mut D,
    ) -> PipelineResult<DocumentState>
    where
        S: DocumentSource + ?Sized,
        L: ChangeLedger + ?Sized,
        D: Dispatcher + ?Sized,
    {
        if let Err(error) = self.notify(document, dispatcher) {
            return Ok(DocumentState::Stale { error });
        }

        let fresh = match source.fetch(&document.id) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "re-fetch failed, ledger not advanced");
                if let Some(obs) = &self.observer {
                    obs.on_stale(document, &e);
                }
                return Ok(DocumentState::Stale { error: e.to_string() });
            }
        };

        info!(
            document_id = %fresh.id,
            modified_time = %fresh.modified_time,
            "updating ledger with new modified time"
        );
        ledger.put(LedgerRecord::from(&fresh))?;
        Ok(DocumentState::LedgerUpdated)
    }
}
