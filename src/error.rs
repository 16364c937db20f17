use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned across the pipeline.
///
/// This is a single error enum shared by the scanner, dispatcher, importer and every
/// collaborator backend. Collaborators that wrap a remote or local store report their
/// failures through the store-specific variants so callers can classify them.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A worksheet grid does not have the columns the mapping expects.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A cell could not be parsed into the required [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// The change ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// The document listing could not be read.
    #[error("document source error: {0}")]
    Source(String),

    /// A notification could not be queued.
    #[error("queue error: {0}")]
    Queue(String),

    /// A spreadsheet read or write failed.
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    /// An object upload failed.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// A warehouse statement failed.
    #[error("warehouse error: {0}")]
    Warehouse(String),

    /// The client registry is malformed (e.g. duplicate match keys).
    #[error("registry error: {0}")]
    Registry(String),

    /// Two registry entries can match the same document.
    #[error("ambiguous registry: entry {first} ('{first_key}') overlaps entry {second} ('{second_key}')")]
    AmbiguousRegistry {
        first: usize,
        first_key: String,
        second: usize,
        second_key: String,
    },

    /// An incoming event payload is missing required attributes.
    #[error("event error: {0}")]
    Event(String),

    /// Configuration values are missing or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A dispatched import did not complete.
    #[error("dispatch failed for document {document_id}: {message}")]
    Dispatch { document_id: String, message: String },
}
