//! Core records and error types for traced.
//!
//! This crate provides the types shared across the traced workspace:
//!
//! - [`TraceRecord`], [`SpanRecord`], [`EventRecord`], [`ArtifactRecord`]: what gets stored
//! - [`SpanOutcome`]: how a span ended
//! - [`InstrumentationError`] and [`ContextError`]: failures of the tracing machinery
//!
//! # Example
//!
//! ```rust
//! use traced_core::{SpanOutcome, Status};
//!
//! let outcome = SpanOutcome::of_value(&5, true);
//! assert!(!outcome.is_error());
//! assert_eq!(Status::from_str("ok"), Status::Ok);
//! ```

mod error;
mod outcome;
mod trace;

pub use error::{validate_exclusion, validate_name, ContextError, InstrumentationError};
pub use outcome::{capture, error_kind, short_type_name, SpanOutcome};
pub use trace::{
    ArtifactRecord, ArtifactType, ErrorInfo, EventRecord, SpanRecord, Status, TraceQuery,
    TraceRecord,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Generates a new unique identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current unix time in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
