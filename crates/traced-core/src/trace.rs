//! Trace storage types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One root execution and everything recorded beneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Unique trace identifier.
    pub trace_id: String,
    /// Name of the entry point (component of the root span, else its name).
    pub root_agent: String,
    /// Unix timestamp (milliseconds) when the root span started.
    pub start_time: i64,
    /// Unix timestamp (milliseconds) when the root span ended.
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Mirrors the status of the root span.
    pub status: Status,
}

impl TraceRecord {
    /// Elapsed milliseconds, once the trace is closed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Lifecycle state shared by traces and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Started and not yet ended.
    Running,
    /// Ended normally.
    Ok,
    /// Ended with an error or panic.
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Ok => "ok",
            Status::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Status::Running,
            "ok" => Status::Ok,
            "error" => Status::Error,
            _ => Status::Error,
        }
    }
}

/// Failure details attached to a span that ended in error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short type name of the error, or `panic` / `cancelled`.
    pub kind: String,
    /// Display text of the error.
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// A single traced call within a trace.
///
/// `params` and `result` are `None` when recording was disabled; that is
/// different from `Some(Value::Null)`, which is a captured null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Unique span identifier.
    pub span_id: String,
    /// Owning trace.
    pub trace_id: String,
    /// Span that was active when this one started; `None` only for the root.
    #[serde(default)]
    pub parent_span_id: Option<String>,
    /// Function or method name.
    pub name: String,
    /// Owning type for method spans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Unix timestamp (milliseconds) when the span started.
    pub start_time: i64,
    /// Unix timestamp (milliseconds) when the span ended.
    #[serde(default)]
    pub end_time: Option<i64>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Process-wide insertion sequence, used to break start time ties.
    pub seq: i64,
}

impl SpanRecord {
    /// Name shown for this span when it roots a trace.
    pub fn agent_name(&self) -> &str {
        self.component.as_deref().unwrap_or(&self.name)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// A point-in-time annotation inside a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub span_id: String,
    pub trace_id: String,
    /// Unix timestamp (milliseconds).
    pub timestamp: i64,
    /// Insertion sequence; events sort by `(timestamp, seq)`.
    pub seq: i64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Type tag of an artifact payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Json,
    Text,
    /// Payload is a base64 string.
    Binary,
    #[default]
    Data,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Json => "json",
            ArtifactType::Text => "text",
            ArtifactType::Binary => "binary",
            ArtifactType::Data => "data",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => ArtifactType::Json,
            "text" => ArtifactType::Text,
            "binary" => ArtifactType::Binary,
            _ => ArtifactType::Data,
        }
    }
}

/// Named intermediate data saved during a span.
///
/// Names are unique per span: saving the same name twice replaces the
/// earlier artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub span_id: String,
    pub trace_id: String,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub payload: Value,
    /// Unix timestamp (milliseconds).
    pub created_at: i64,
}

impl ArtifactRecord {
    /// Decodes a binary artifact's payload.
    pub fn binary_payload(&self) -> Option<Vec<u8>> {
        use base64::Engine;

        if self.artifact_type != ArtifactType::Binary {
            return None;
        }
        let encoded = self.payload.as_str()?;
        base64::engine::general_purpose::STANDARD.decode(encoded).ok()
    }
}

/// Query parameters for listing traces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceQuery {
    /// Filter by root agent name.
    pub root_agent: Option<String>,
    /// Filter by status.
    pub status: Option<Status>,
    /// Maximum number of traces to return.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl TraceQuery {
    /// Whether `trace` passes the filters (pagination is applied separately).
    pub fn matches(&self, trace: &TraceRecord) -> bool {
        let agent_ok = self
            .root_agent
            .as_deref()
            .map_or(true, |agent| trace.root_agent == agent);
        let status_ok = self.status.map_or(true, |status| trace.status == status);
        agent_ok && status_ok
    }
}
