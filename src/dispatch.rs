//! Notification dispatch.
//!
//! A [`Dispatcher`] hands one [`ImportNotification`] downstream. Two variants exist:
//!
//! - [`QueueDispatcher`]: sends a [`QueueMessage`] to a [`MessageQueue`]; the import runs
//!   later from an event payload.
//! - [`DirectDispatcher`]: runs the importer in-process. An import that fails is reported
//!   back as a dispatch error so the scanner leaves the ledger untouched.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::event::QueueMessage;
use crate::importer::{ImportContext, ImportOutcome, Importer, RunSummary};
use crate::object_store::ObjectStore;
use crate::sheets::SpreadsheetStore;
use crate::types::ImportNotification;
use crate::warehouse::Warehouse;

/// Hands a notification to whatever performs the import.
pub trait Dispatcher {
    fn dispatch(&mut self, notification: &ImportNotification) -> PipelineResult<()>;
}

impl<D: Dispatcher + ?Sized> Dispatcher for &mut D {
    fn dispatch(&mut self, notification: &ImportNotification) -> PipelineResult<()> {
        (**self).dispatch(notification)
    }
}

/// Outbound message queue.
pub trait MessageQueue {
    fn send(&mut self, message: QueueMessage) -> PipelineResult<()>;
}

impl<Q: MessageQueue + ?Sized> MessageQueue for &mut Q {
    fn send(&mut self, message: QueueMessage) -> PipelineResult<()> {
        (**self).send(message)
    }
}

/// In-process queue that keeps every message sent.
#[derive(Debug, Default, Clone)]
pub struct MemoryQueue {
    messages: Vec<QueueMessage>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[QueueMessage] {
        &self.messages
    }

    /// Remove and return every queued message.
    pub fn drain(&mut self) -> Vec<QueueMessage> {
        std::mem::take(&mut self.messages)
    }
}

impl MessageQueue for MemoryQueue {
    fn send(&mut self, message: QueueMessage) -> PipelineResult<()> {
        self.messages.push(message);
        Ok(())
    }
}

/// Appends messages as newline-delimited JSON to a spool file.
///
/// The file can be handed to the import entry point as an event payload.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    path: PathBuf,
}

impl SpoolQueue {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageQueue for SpoolQueue {
    fn send(&mut self, message: QueueMessage) -> PipelineResult<()> {
        let line = serde_json::to_string(&message)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::Queue(format!("cannot open spool {}: {e}", self.path.display())))?;
        writeln!(f, "{line}")
            .map_err(|e| PipelineError::Queue(format!("cannot append to spool {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Sends each notification as a queue message.
#[derive(Debug)]
pub struct QueueDispatcher<Q> {
    queue: Q,
}

impl<Q: MessageQueue> QueueDispatcher<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn into_inner(self) -> Q {
        self.queue
    }
}

impl<Q: MessageQueue> Dispatcher for QueueDispatcher<Q> {
    fn dispatch(&mut self, notification: &ImportNotification) -> PipelineResult<()> {
        let message = QueueMessage::from_notification(notification);
        info!(document_id = %notification.id, "{}", message.body);
        self.queue.send(message)
    }
}

/// Runs the importer synchronously for each notification.
pub struct DirectDispatcher<'a, S, O, W> {
    importer: &'a mut Importer<S, O, W>,
    context: ImportContext,
    summary: RunSummary,
}

impl<'a, S, O, W> DirectDispatcher<'a, S, O, W>
where
    S: SpreadsheetStore,
    O: ObjectStore,
    W: Warehouse,
{
    /// `context` is shared by every import of this scan cycle.
    pub fn new(importer: &'a mut Importer<S, O, W>, context: ImportContext) -> Self {
        Self {
            importer,
            context,
            summary: RunSummary::default(),
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }
}

impl<S, O, W> Dispatcher for DirectDispatcher<'_, S, O, W>
where
    S: SpreadsheetStore,
    O: ObjectStore,
    W: Warehouse,
{
    fn dispatch(&mut self, notification: &ImportNotification) -> PipelineResult<()> {
        let outcome = self.importer.import(&self.context, notification);
        let failure = match &outcome {
            ImportOutcome::Failed { error, .. } => Some(error.to_string()),
            _ => None,
        };
        self.summary.push(outcome);
        match failure {
            Some(message) => Err(PipelineError::Dispatch {
                document_id: notification.id.clone(),
                message,
            }),
            None => Ok(()),
        }
    }
}
