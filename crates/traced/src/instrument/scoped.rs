//! Explicit spans and annotations on whatever span is active.

use std::fmt::Display;

use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use traced_core::{
    capture, validate_name, ArtifactType, ErrorInfo, InstrumentationError, SpanOutcome,
};

use crate::recorder::{recorder, SpanHandle, SpanStart};

/// A span opened explicitly around a block of code.
///
/// The span ends when [`ScopedSpan::end`] is called or the value is dropped.
/// Dropping during a panic ends it as an error of kind `panic`.
///
/// ```rust
/// let mut span = traced::span("load");
/// span.add_event("started", None);
/// span.save_artifact("rows", &[1, 2, 3]);
/// span.set_result(&3);
/// span.end();
/// ```
#[must_use = "the span ends as soon as it is dropped"]
pub struct ScopedSpan {
    handle: Option<SpanHandle>,
    result: Option<Value>,
    failure: Option<ErrorInfo>,
}

/// Opens a span named `name` as a child of the active span.
pub fn span(name: impl Into<String>) -> ScopedSpan {
    let name = name.into();
    if let Err(e) = validate_name(&name) {
        warn!("{}", e);
    }
    open(name)
}

/// Like [`span`] but rejects invalid names.
pub fn try_span(name: impl Into<String>) -> Result<ScopedSpan, InstrumentationError> {
    let name = name.into();
    validate_name(&name)?;
    Ok(open(name))
}

fn open(name: String) -> ScopedSpan {
    ScopedSpan {
        handle: Some(recorder().start_span(SpanStart::new(name))),
        result: None,
        failure: None,
    }
}

/// Runs `f` inside a span named `name`.
pub fn in_span<T, F>(name: impl Into<String>, f: F) -> T
where
    F: FnOnce(&mut ScopedSpan) -> T,
{
    let mut span = span(name);
    f(&mut span)
}

impl ScopedSpan {
    pub fn handle(&self) -> Option<&SpanHandle> {
        self.handle.as_ref()
    }

    pub fn add_event(&self, label: &str, payload: Option<Value>) {
        if let Some(ref handle) = self.handle {
            recorder().add_event(handle, label, payload);
        }
    }

    pub fn save_artifact<P: Serialize + ?Sized>(&self, name: &str, payload: &P) -> Option<String> {
        self.save_artifact_as(name, ArtifactType::Data, capture(payload))
    }

    pub fn save_artifact_as(
        &self,
        name: &str,
        artifact_type: ArtifactType,
        payload: Value,
    ) -> Option<String> {
        let handle = self.handle.as_ref()?;
        recorder().save_artifact(handle, name, artifact_type, payload)
    }

    /// Records `value` as the span's result.
    pub fn set_result<T: Serialize + ?Sized>(&mut self, value: &T) {
        self.result = Some(capture(value));
    }

    /// Marks the span as failed.
    pub fn fail(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.failure = Some(ErrorInfo::new(kind, message));
    }

    /// Marks the span as failed with `err`'s type name and text.
    pub fn fail_with<E: Display>(&mut self, err: &E) {
        if let SpanOutcome::Error(info) = SpanOutcome::from_error(err) {
            self.failure = Some(info);
        }
    }

    pub fn end(self) {}
}

impl Drop for ScopedSpan {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let outcome = if std::thread::panicking() {
            SpanOutcome::error("panic", "panicked while the span was open")
        } else if let Some(failure) = self.failure.take() {
            SpanOutcome::Error(failure)
        } else {
            SpanOutcome::Ok {
                result: self.result.take(),
            }
        };
        recorder().end_span(&handle, outcome);
    }
}

/// Handle of the span active in the current flow.
pub fn current_span() -> Option<SpanHandle> {
    recorder().current_span()
}

/// Adds an event to the active span; `false` when no span is active.
pub fn add_event(label: &str, payload: Option<Value>) -> bool {
    match current_span() {
        Some(handle) => {
            recorder().add_event(&handle, label, payload);
            true
        }
        None => {
            debug!("No active span for event {}", label);
            false
        }
    }
}

/// Saves a `data` artifact on the active span.
pub fn save_artifact<P: Serialize + ?Sized>(name: &str, payload: &P) -> Option<String> {
    save_artifact_as(name, ArtifactType::Data, capture(payload))
}

pub fn save_text_artifact(name: &str, text: &str) -> Option<String> {
    save_artifact_as(name, ArtifactType::Text, Value::String(text.to_string()))
}

/// Saves bytes on the active span as a base64 `binary` artifact.
pub fn save_binary_artifact(name: &str, bytes: &[u8]) -> Option<String> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    save_artifact_as(name, ArtifactType::Binary, Value::String(encoded))
}

pub fn save_artifact_as(name: &str, artifact_type: ArtifactType, payload: Value) -> Option<String> {
    let Some(handle) = current_span() else {
        debug!("No active span for artifact {}", name);
        return None;
    };
    recorder().save_artifact(&handle, name, artifact_type, payload)
}
