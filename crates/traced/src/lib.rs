//! Call tracing for Rust applications.
//!
//! Functions and methods are instrumented to record when they start and end,
//! their parameters and results, and any events or artifacts the code
//! attaches along the way. Everything lands in a pluggable [`TraceStore`]:
//! memory, a SQLite file, or MongoDB.
//!
//! # Example
//!
//! ```rust
//! use traced::prelude::*;
//!
//! #[traced]
//! fn add(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//!
//! configure_tracing(&TracingConfig::memory()).unwrap();
//! assert_eq!(add(2, 3), 5);
//! ```
//!
//! # Adapters
//!
//! - `#[traced]` on a function (sync or async)
//! - [`Traced`] plus `#[traced_methods]` on an impl block: every public method
//! - `#[traced_impl]` on an impl block, with `#[not_traced]` to opt methods out
//! - [`span`] / [`in_span`] for an explicit region of code
//! - [`decorate`], [`trace`] and [`try_trace`] for closures built at runtime

pub mod context;
pub mod instrument;
mod recorder;

use std::sync::Arc;

pub use instrument::{
    add_event, current_span, decorate, in_span, run, run_async, save_artifact, save_artifact_as,
    save_binary_artifact, save_text_artifact, span, trace, try_span, try_trace, ClassTracer,
    Decorated, Params, ScopedSpan, TraceOptions, TracePolicy, Traced,
};
pub use recorder::{install_store, recorder, Recorder, SpanHandle, SpanStart};
pub use traced_config::{ConfigError, StorageConfig, TracingConfig};
pub use traced_core::{
    ArtifactRecord, ArtifactType, ErrorInfo, EventRecord, InstrumentationError, SpanOutcome,
    SpanRecord, Status, TraceQuery, TraceRecord,
};
pub use traced_macros::{not_traced, traced, traced_impl, traced_methods};
pub use traced_store::{MemoryStore, SqliteStore, StoreError, TraceStore};

#[cfg(feature = "mongodb")]
pub use traced_store::MongoStore;

/// Opens the configured store and makes it the process-wide trace store.
///
/// Until this is called, traces go to an in-memory store.
pub fn configure_tracing(config: &TracingConfig) -> Result<(), ConfigError> {
    install_store(config.open_store()?);
    Ok(())
}

/// Makes an already opened store the process-wide trace store.
pub fn configure_with_store(store: Arc<dyn TraceStore>) {
    install_store(store);
}

/// The process-wide trace store.
pub fn store() -> Arc<dyn TraceStore> {
    recorder().store()
}

/// Items needed by most instrumented code.
pub mod prelude {
    pub use crate::{
        add_event, configure_tracing, in_span, not_traced, save_artifact, span, traced,
        traced_impl, traced_methods, Traced, TracingConfig,
    };
}

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
    pub use traced_core::SpanOutcome;
}
