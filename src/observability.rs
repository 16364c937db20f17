use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::importer::ImportOutcome;
use crate::scanner::Classification;
use crate::types::{ImportNotification, WatchedDocument};

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (operation failed).
    Error,
    /// Infrastructure failure: local I/O, ledger or warehouse.
    Critical,
}

/// Severity of a failed import caused by `error`.
pub fn severity_for_error(error: &PipelineError) -> Severity {
    match error {
        PipelineError::Io(_) | PipelineError::Ledger(_) | PipelineError::Warehouse(_) => Severity::Critical,
        PipelineError::Config(_) | PipelineError::Registry(_) | PipelineError::AmbiguousRegistry { .. } => {
            Severity::Warning
        }
        _ => Severity::Error,
    }
}

/// Observer interface for scan and import events.
///
/// Implementors can record metrics, logs, or trigger alerts. Every callback defaults to
/// doing nothing.
pub trait PipelineObserver: Send + Sync {
    /// Called once per scanned document.
    fn on_classified(&self, _document: &WatchedDocument, _classification: Classification) {}

    /// Called after a notification was dispatched successfully.
    fn on_dispatched(&self, _notification: &ImportNotification) {}

    /// Called when a document is left stale (dispatch or re-fetch failed).
    fn on_stale(&self, _document: &WatchedDocument, _error: &PipelineError) {}

    /// Called once per import attempt.
    fn on_import(&self, _outcome: &ImportOutcome) {}

    /// Called when a failed import meets the alert threshold.
    fn on_alert(&self, _outcome: &ImportOutcome, _severity: Severity, _error: &PipelineError) {}
}

/// Fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn PipelineObserver>) {
        self.observers.push(observer);
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_classified(&self, document: &WatchedDocument, classification: Classification) {
        for o in &self.observers {
            o.on_classified(document, classification);
        }
    }

    fn on_dispatched(&self, notification: &ImportNotification) {
        for o in &self.observers {
            o.on_dispatched(notification);
        }
    }

    fn on_stale(&self, document: &WatchedDocument, error: &PipelineError) {
        for o in &self.observers {
            o.on_stale(document, error);
        }
    }

    fn on_import(&self, outcome: &ImportOutcome) {
        for o in &self.observers {
            o.on_import(outcome);
        }
    }

    fn on_alert(&self, outcome: &ImportOutcome, severity: Severity, error: &PipelineError) {
        for o in &self.observers {
            o.on_alert(outcome, severity, error);
        }
    }
}

/// Emits events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_stale(&self, document: &WatchedDocument, error: &PipelineError) {
        warn!(document_id = %document.id, %error, "document left stale");
    }

    fn on_import(&self, outcome: &ImportOutcome) {
        match outcome {
            ImportOutcome::Failed { .. } => error!(status = %outcome.status_line(), "import failed"),
            _ => info!(status = %outcome.status_line(), "import finished"),
        }
    }

    fn on_alert(&self, outcome: &ImportOutcome, severity: Severity, error: &PipelineError) {
        error!(?severity, table = outcome.label(), %error, "ALERT");
    }
}

/// Appends pipeline events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Writes are best-effort; failures to open or write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", timestamp());
        }
    }
}

impl PipelineObserver for FileObserver {
    fn on_classified(&self, document: &WatchedDocument, classification: Classification) {
        self.append_line(&format!(
            "classified id={} modified_time={} class={classification}",
            document.id, document.modified_time
        ));
    }

    fn on_dispatched(&self, notification: &ImportNotification) {
        self.append_line(&format!("dispatched id={}", notification.id));
    }

    fn on_stale(&self, document: &WatchedDocument, error: &PipelineError) {
        self.append_line(&format!("stale id={} err={error}", document.id));
    }

    fn on_import(&self, outcome: &ImportOutcome) {
        let status = outcome.status_line().replace('\n', " | ");
        self.append_line(&format!("import {status}"));
    }

    fn on_alert(&self, outcome: &ImportOutcome, severity: Severity, error: &PipelineError) {
        self.append_line(&format!(
            "ALERT severity={severity:?} table={} err={error}",
            outcome.label()
        ));
    }
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
