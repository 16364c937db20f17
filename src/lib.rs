//! `sheet-pipeline` watches a folder of order spreadsheets and loads changed ones into a
//! warehouse.
//!
//! A run has two halves:
//!
//! - **Scan**: [`scanner::Scanner`] lists every document of a [`scanner::DocumentSource`],
//!   classifies it against the [`ledger::ChangeLedger`] (NEW, CHANGED or UNCHANGED) and hands
//!   NEW/CHANGED documents to a [`dispatch::Dispatcher`]. The ledger only advances after a
//!   successful dispatch, so a failed import is retried on the next scan.
//! - **Import**: [`importer::Importer`] resolves the document against the
//!   [`registry::ClientRegistry`], reshapes its tabs ([`transform`]) and bulk loads them through
//!   an [`object_store::ObjectStore`] and a [`warehouse::Warehouse`].
//!
//! Dispatch is either a queue message ([`dispatch::QueueDispatcher`], consumed later by
//! `sheet-pipeline import --event`) or a direct, synchronous import
//! ([`dispatch::DirectDispatcher`]).
//!
//! ## Scan example
//!
//! ```rust
//! use sheet_pipeline::dispatch::{MemoryQueue, QueueDispatcher};
//! use sheet_pipeline::error::PipelineResult;
//! use sheet_pipeline::ledger::{ChangeLedger, MemoryLedger};
//! use sheet_pipeline::scanner::{DocumentPage, DocumentSource, ScanOptions, Scanner};
//! use sheet_pipeline::types::WatchedDocument;
//!
//! struct OneDoc(WatchedDocument);
//!
//! impl DocumentSource for OneDoc {
//!     fn list_page(&self, _token: Option<&str>) -> PipelineResult<DocumentPage> {
//!         Ok(DocumentPage { documents: vec![self.0.clone()], next_page_token: None })
//!     }
//!     fn fetch(&self, _id: &str) -> PipelineResult<WatchedDocument> {
//!         Ok(self.0.clone())
//!     }
//! }
//!
//! # fn main() -> PipelineResult<()> {
//! let source = OneDoc(WatchedDocument::new("D1", "Acme Orders", "2024-05-01T10:00:00.000Z"));
//! let mut ledger = MemoryLedger::new();
//! let mut dispatcher = QueueDispatcher::new(MemoryQueue::new());
//!
//! let report = Scanner::new(ScanOptions::default()).scan(&source, &mut ledger, &mut dispatcher)?;
//! assert_eq!(report.dispatched(), 1);
//! assert_eq!(dispatcher.queue().messages().len(), 1);
//! assert!(ledger.get("D1")?.is_some());
//!
//! // Nothing changed: the second scan dispatches nothing.
//! let report = Scanner::new(ScanOptions::default()).scan(&source, &mut ledger, &mut dispatcher)?;
//! assert_eq!(report.dispatched(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`scanner`], [`ledger`], [`dispatch`], [`event`]: change detection and notification
//! - [`importer`], [`registry`], [`sheets`], [`transform`], [`warehouse`], [`object_store`]: import
//! - [`local`]: filesystem-backed workbooks used by the binary
//! - [`config`], [`observability`], [`error`], [`types`]: shared plumbing

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod importer;
pub mod ledger;
pub mod local;
pub mod object_store;
pub mod observability;
pub mod registry;
pub mod scanner;
pub mod sheets;
pub mod transform;
pub mod types;
pub mod warehouse;

pub use error::{PipelineError, PipelineResult};
