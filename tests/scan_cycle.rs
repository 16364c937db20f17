use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use sheet_pipeline::dispatch::Dispatcher;
use sheet_pipeline::error::{PipelineError, PipelineResult};
use sheet_pipeline::ledger::{ChangeLedger, MemoryLedger};
use sheet_pipeline::observability::PipelineObserver;
use sheet_pipeline::scanner::{
    BootstrapWrite, Classification, DocumentPage, DocumentSource, DocumentState, ScanOptions, Scanner, UnchangedPolicy,
};
use sheet_pipeline::types::{ImportNotification, LedgerRecord, WatchedDocument};

/// Folder listing served from fixed pages; `fetch` answers from a separate map so tests
/// can simulate a document modified by its own import.
#[derive(Default)]
struct FakeSource {
    pages: Vec<Vec<WatchedDocument>>,
    fresh: RefCell<BTreeMap<String, WatchedDocument>>,
    fail_page: Option<usize>,
    fail_fetch: bool,
    listed: RefCell<Vec<Option<String>>>,
}

impl FakeSource {
    fn single(docs: Vec<WatchedDocument>) -> Self {
        Self {
            pages: vec![docs],
            ..Self::default()
        }
    }

    fn paged(pages: Vec<Vec<WatchedDocument>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    fn with_fresh(self, doc: WatchedDocument) -> Self {
        self.fresh.borrow_mut().insert(doc.id.clone(), doc);
        self
    }
}

impl DocumentSource for FakeSource {
    fn list_page(&self, page_token: Option<&str>) -> PipelineResult<DocumentPage> {
        self.listed.borrow_mut().push(page_token.map(str::to_owned));
        let index: usize = page_token.map_or(0, |t| t.parse().unwrap());
        if self.fail_page == Some(index) {
            return Err(PipelineError::Source("listing unavailable".to_string()));
        }
        let next = index + 1;
        Ok(DocumentPage {
            documents: self.pages.get(index).cloned().unwrap_or_default(),
            next_page_token: (next < self.pages.len()).then(|| next.to_string()),
        })
    }

    fn fetch(&self, id: &str) -> PipelineResult<WatchedDocument> {
        if self.fail_fetch {
            return Err(PipelineError::Source(format!("cannot fetch {id}")));
        }
        if let Some(doc) = self.fresh.borrow().get(id) {
            return Ok(doc.clone());
        }
        self.pages
            .iter()
            .flatten()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| PipelineError::Source(format!("unknown {id}")))
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    sent: Vec<ImportNotification>,
    failing: HashSet<String>,
}

impl RecordingDispatcher {
    fn failing_for(id: &str) -> Self {
        Self {
            failing: HashSet::from([id.to_string()]),
            ..Self::default()
        }
    }

    fn ids(&self) -> Vec<&str> {
        self.sent.iter().map(|n| n.id.as_str()).collect()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&mut self, notification: &ImportNotification) -> PipelineResult<()> {
        if self.failing.contains(&notification.id) {
            return Err(PipelineError::Dispatch {
                document_id: notification.id.clone(),
                message: "import failed".to_string(),
            });
        }
        self.sent.push(notification.clone());
        Ok(())
    }
}

struct BrokenLedger;

impl ChangeLedger for BrokenLedger {
    fn get(&self, _id: &str) -> PipelineResult<Option<LedgerRecord>> {
        Err(PipelineError::Ledger("table not reachable".to_string()))
    }

    fn put(&mut self, _record: LedgerRecord) -> PipelineResult<()> {
        Err(PipelineError::Ledger("table not reachable".to_string()))
    }
}

#[derive(Default)]
struct ClassificationLog(Mutex<Vec<(String, Classification)>>);

impl PipelineObserver for ClassificationLog {
    fn on_classified(&self, document: &WatchedDocument, classification: Classification) {
        self.0.lock().unwrap().push((document.id.clone(), classification));
    }
}

fn doc(id: &str, t: &str) -> WatchedDocument {
    WatchedDocument::new(id, format!("{id} orders"), t)
}

fn ledger_with(id: &str, t: &str) -> MemoryLedger {
    let mut ledger = MemoryLedger::new();
    ledger.put(LedgerRecord::from(&doc(id, t))).unwrap();
    ledger
}

fn modified_time(ledger: &MemoryLedger, id: &str) -> Option<String> {
    ledger.get(id).unwrap().map(|r| r.modified_time)
}

fn scanner() -> Scanner {
    Scanner::new(ScanOptions::default())
}

#[test]
fn new_document_is_recorded_and_dispatched_once() {
    let source = FakeSource::single(vec![doc("D1", "T1")]);
    let mut ledger = MemoryLedger::new();
    let mut dispatcher = RecordingDispatcher::default();

    let report = scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert_eq!(dispatcher.ids(), vec!["D1"]);
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T1"));
    assert_eq!(ledger.len(), 1);
    assert_eq!(report.outcomes[0].classification, Classification::New);
    assert_eq!(report.outcomes[0].state, DocumentState::LedgerUpdated);
}

#[test]
fn unchanged_document_is_not_dispatched() {
    let source = FakeSource::single(vec![doc("D1", "T1")]);
    let mut ledger = ledger_with("D1", "T1");
    let mut dispatcher = RecordingDispatcher::default();

    let report = scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert!(dispatcher.sent.is_empty());
    assert_eq!(report.count(Classification::Unchanged), 1);
    assert_eq!(report.outcomes[0].state, DocumentState::Unchanged);
}

#[test]
fn reimport_policy_dispatches_unchanged_without_touching_ledger() {
    let source = FakeSource::single(vec![doc("D1", "T1")]).with_fresh(doc("D1", "T9"));
    let mut ledger = ledger_with("D1", "T1");
    let mut dispatcher = RecordingDispatcher::default();
    let options = ScanOptions {
        unchanged_policy: UnchangedPolicy::Reimport,
        ..ScanOptions::default()
    };

    let report = Scanner::new(options).scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert_eq!(dispatcher.ids(), vec!["D1"]);
    assert_eq!(report.outcomes[0].state, DocumentState::Reimported);
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T1"));
}

#[test]
fn changed_document_advances_ledger_after_success() {
    let source = FakeSource::single(vec![doc("D1", "T2")]);
    let mut ledger = ledger_with("D1", "T1");
    let mut dispatcher = RecordingDispatcher::default();

    let report = scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert_eq!(report.outcomes[0].classification, Classification::Changed);
    assert_eq!(dispatcher.ids(), vec!["D1"]);
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T2"));
}

#[test]
fn ledger_takes_the_refetched_timestamp() {
    // The import itself touched the document.
    let source = FakeSource::single(vec![doc("D1", "T2")]).with_fresh(doc("D1", "T3"));
    let mut ledger = ledger_with("D1", "T1");
    let mut dispatcher = RecordingDispatcher::default();

    scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T3"));
}

#[test]
fn failed_import_keeps_ledger_and_is_retried_next_scan() {
    let source = FakeSource::single(vec![doc("D1", "T2")]);
    let mut ledger = ledger_with("D1", "T1");
    let mut failing = RecordingDispatcher::failing_for("D1");

    let report = scanner().scan(&source, &mut ledger, &mut failing).unwrap();
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T1"));
    assert!(matches!(&report.outcomes[0].state, DocumentState::Stale { error } if error.contains("import failed")));
    assert_eq!(report.stale().count(), 1);

    let mut working = RecordingDispatcher::default();
    let report = scanner().scan(&source, &mut ledger, &mut working).unwrap();
    assert_eq!(report.outcomes[0].classification, Classification::Changed);
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T2"));
}

#[test]
fn refetch_failure_leaves_document_stale() {
    let source = FakeSource {
        fail_fetch: true,
        ..FakeSource::single(vec![doc("D1", "T2")])
    };
    let mut ledger = ledger_with("D1", "T1");
    let mut dispatcher = RecordingDispatcher::default();

    let report = scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert_eq!(dispatcher.ids(), vec!["D1"]);
    assert!(matches!(report.outcomes[0].state, DocumentState::Stale { .. }));
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T1"));
}

#[test]
fn bootstrap_before_dispatch_records_first_snapshot_even_on_failure() {
    let source = FakeSource::single(vec![doc("D1", "T1")]);
    let mut ledger = MemoryLedger::new();
    let mut failing = RecordingDispatcher::failing_for("D1");

    scanner().scan(&source, &mut ledger, &mut failing).unwrap();
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T1"));

    // The failed first import is not retried until the document changes.
    let mut working = RecordingDispatcher::default();
    let report = scanner().scan(&source, &mut ledger, &mut working).unwrap();
    assert_eq!(report.outcomes[0].classification, Classification::Unchanged);
    assert!(working.sent.is_empty());
}

#[test]
fn bootstrap_after_dispatch_retries_failed_first_import() {
    let options = ScanOptions {
        bootstrap: BootstrapWrite::AfterDispatch,
        ..ScanOptions::default()
    };
    let source = FakeSource::single(vec![doc("D1", "T1")]);
    let mut ledger = MemoryLedger::new();
    let mut failing = RecordingDispatcher::failing_for("D1");

    Scanner::new(options).scan(&source, &mut ledger, &mut failing).unwrap();
    assert!(ledger.is_empty());

    let mut working = RecordingDispatcher::default();
    let report = Scanner::new(options).scan(&source, &mut ledger, &mut working).unwrap();
    assert_eq!(report.outcomes[0].classification, Classification::New);
    assert_eq!(working.ids(), vec!["D1"]);
    assert_eq!(modified_time(&ledger, "D1").as_deref(), Some("T1"));
}

#[test]
fn one_failure_does_not_stop_the_cycle() {
    let source = FakeSource::single(vec![doc("D1", "T1"), doc("D2", "T1")]);
    let mut ledger = MemoryLedger::new();
    let mut dispatcher = RecordingDispatcher::failing_for("D1");

    let report = scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert_eq!(report.scanned(), 2);
    assert_eq!(dispatcher.ids(), vec!["D2"]);
    assert_eq!(report.dispatched(), 1);
}

#[test]
fn every_page_is_scanned() {
    let source = FakeSource::paged(vec![
        vec![doc("A", "T1"), doc("B", "T1")],
        vec![doc("C", "T1")],
        vec![doc("D", "T1")],
    ]);
    let mut ledger = MemoryLedger::new();
    let mut dispatcher = RecordingDispatcher::default();

    let report = scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap();

    assert_eq!(report.scanned(), 4);
    assert_eq!(dispatcher.ids(), vec!["A", "B", "C", "D"]);
    assert_eq!(
        *source.listed.borrow(),
        vec![None, Some("1".to_string()), Some("2".to_string())]
    );
}

#[test]
fn listing_failure_aborts_after_processing_earlier_pages() {
    let source = FakeSource {
        fail_page: Some(1),
        ..FakeSource::paged(vec![vec![doc("A", "T1")], vec![doc("B", "T1")]])
    };
    let mut ledger = MemoryLedger::new();
    let mut dispatcher = RecordingDispatcher::default();

    let err = scanner().scan(&source, &mut ledger, &mut dispatcher).unwrap_err();

    assert!(matches!(err, PipelineError::Source(_)));
    assert_eq!(dispatcher.ids(), vec!["A"]);
    assert!(ledger.get("A").unwrap().is_some());
    assert!(ledger.get("B").unwrap().is_none());
}

#[test]
fn ledger_failure_is_fatal_for_the_cycle() {
    let source = FakeSource::single(vec![doc("D1", "T1")]);
    let mut dispatcher = RecordingDispatcher::default();

    let err = scanner().scan(&source, &mut BrokenLedger, &mut dispatcher).unwrap_err();

    assert!(matches!(err, PipelineError::Ledger(_)));
    assert!(dispatcher.sent.is_empty());
}

#[test]
fn observer_sees_every_classification() {
    let log = Arc::new(ClassificationLog::default());
    let source = FakeSource::single(vec![doc("D1", "T1"), doc("D2", "T2"), doc("D3", "T1")]);
    let mut ledger = ledger_with("D1", "T1");
    ledger.put(LedgerRecord::from(&doc("D2", "T1"))).unwrap();
    let mut dispatcher = RecordingDispatcher::default();

    scanner()
        .with_observer(log.clone())
        .scan(&source, &mut ledger, &mut dispatcher)
        .unwrap();

    let seen = log.0.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("D1".to_string(), Classification::Unchanged),
            ("D2".to_string(), Classification::Changed),
            ("D3".to_string(), Classification::New),
        ]
    );
}
