//! Trace storage for traced.
//!
//! Every backend implements the same [`TraceStore`] capability set, so the
//! recorder and the viewer never know which one they are talking to:
//!
//! - [`MemoryStore`]: process lifetime only, used by tests and as the default
//! - [`SqliteStore`]: a single embedded database file
//! - `MongoStore` (feature `mongodb`): a shared document store
//!
//! The [`view`] module builds the viewer's read model on top of any store.

mod memory;
#[cfg(feature = "mongodb")]
mod mongo;
mod sqlite;
pub mod view;

#[cfg(test)]
pub(crate) mod conformance;

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::{MongoCollections, MongoStore};
pub use sqlite::SqliteStore;

use thiserror::Error;
use traced_core::{ArtifactRecord, EventRecord, SpanRecord, Status, TraceQuery, TraceRecord};

/// Errors from trace store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("Lock error")]
    Lock,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence contract shared by every backend.
///
/// Writes must be safe under concurrent callers. Listing orders traces by
/// `start_time` ascending (ties by insertion order); spans come back ordered
/// by `(start_time, seq)` and events by `(timestamp, seq)`.
pub trait TraceStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Records a trace when its root span starts.
    fn insert_trace(&self, trace: &TraceRecord) -> Result<(), StoreError>;

    /// Stamps the end of a trace when its root span ends.
    fn close_trace(&self, trace_id: &str, end_time: i64, status: Status) -> Result<(), StoreError>;

    /// Appends a newly started span.
    fn insert_span(&self, span: &SpanRecord) -> Result<(), StoreError>;

    /// Writes the terminal state (end time, status, result, error) of a span.
    fn finish_span(&self, span: &SpanRecord) -> Result<(), StoreError>;

    /// Appends an event.
    fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError>;

    /// Saves an artifact, replacing any artifact of the same name in the same span.
    fn save_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError>;

    fn get_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, StoreError>;

    fn list_traces(&self, query: &TraceQuery) -> Result<Vec<TraceRecord>, StoreError>;

    fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, StoreError>;

    fn get_events(&self, trace_id: &str) -> Result<Vec<EventRecord>, StoreError>;

    fn get_artifacts(&self, trace_id: &str) -> Result<Vec<ArtifactRecord>, StoreError>;

    /// Number of spans recorded for a trace.
    fn span_count(&self, trace_id: &str) -> Result<u64, StoreError> {
        Ok(self.get_spans(trace_id)?.len() as u64)
    }
}

/// Applies `offset` and `limit` to an already filtered, ordered listing.
pub(crate) fn paginate<T>(items: Vec<T>, query: &TraceQuery) -> Vec<T> {
    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map_or(usize::MAX, |l| l as usize);
    items.into_iter().skip(offset).take(limit).collect()
}
