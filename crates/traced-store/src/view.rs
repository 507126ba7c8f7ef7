//! Read model served by the trace viewer.
//!
//! Builds listing summaries and per-trace span trees from any [`TraceStore`].

use std::collections::{BTreeMap, HashMap};

use chrono::DateTime;
use serde::Serialize;
use traced_core::{ArtifactRecord, EventRecord, SpanRecord, Status, TraceQuery, TraceRecord};

use crate::{StoreError, TraceStore};

/// Listing limit applied when the caller does not give one.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// One row of the trace listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub root_agent: String,
    pub status: Status,
    pub start_time: i64,
    /// `start_time` as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub formatted_start_time: String,
    /// `None` while the trace is still running.
    pub duration_ms: Option<i64>,
    pub formatted_duration: Option<String>,
    /// Number of spans in the trace.
    pub execution_count: u64,
}

/// A span with its children, events and artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanNode {
    #[serde(flatten)]
    pub span: SpanRecord,
    /// Child span ids in start order.
    pub children: Vec<String>,
    pub events: Vec<EventRecord>,
    pub artifacts: Vec<ArtifactRecord>,
    pub duration_ms: Option<i64>,
}

/// Everything recorded for one trace, shaped as a tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceDetail {
    pub trace: TraceRecord,
    /// Ids of spans without a parent in this trace.
    pub root_spans: Vec<String>,
    pub spans: BTreeMap<String, SpanNode>,
    pub total_events: usize,
    pub total_artifacts: usize,
    pub duration_ms: Option<i64>,
}

/// Lists traces oldest first, defaulting the limit to [`DEFAULT_LIST_LIMIT`].
pub fn list_summaries(
    store: &dyn TraceStore,
    query: &TraceQuery,
) -> Result<Vec<TraceSummary>, StoreError> {
    let query = TraceQuery {
        limit: query.limit.or(Some(DEFAULT_LIST_LIMIT)),
        ..query.clone()
    };

    store
        .list_traces(&query)?
        .into_iter()
        .map(|trace| {
            let execution_count = store.span_count(&trace.trace_id)?;
            Ok(summarize(trace, execution_count))
        })
        .collect()
}

fn summarize(trace: TraceRecord, execution_count: u64) -> TraceSummary {
    let duration_ms = trace.duration_ms();
    TraceSummary {
        formatted_start_time: format_timestamp(trace.start_time),
        formatted_duration: duration_ms.map(format_duration),
        trace_id: trace.trace_id,
        root_agent: trace.root_agent,
        status: trace.status,
        start_time: trace.start_time,
        duration_ms,
        execution_count,
    }
}

/// Loads a trace with its span tree; `None` when the trace is unknown.
pub fn trace_detail(store: &dyn TraceStore, trace_id: &str) -> Result<Option<TraceDetail>, StoreError> {
    let Some(trace) = store.get_trace(trace_id)? else {
        return Ok(None);
    };

    let spans = store.get_spans(trace_id)?;
    let events = store.get_events(trace_id)?;
    let artifacts = store.get_artifacts(trace_id)?;
    let total_events = events.len();
    let total_artifacts = artifacts.len();

    let mut events_by_span: HashMap<String, Vec<EventRecord>> = HashMap::new();
    for event in events {
        events_by_span.entry(event.span_id.clone()).or_default().push(event);
    }
    let mut artifacts_by_span: HashMap<String, Vec<ArtifactRecord>> = HashMap::new();
    for artifact in artifacts {
        artifacts_by_span
            .entry(artifact.span_id.clone())
            .or_default()
            .push(artifact);
    }

    let known: Vec<String> = spans.iter().map(|s| s.span_id.clone()).collect();
    let mut root_spans = Vec::new();
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for span in &spans {
        match span.parent_span_id {
            Some(ref parent) if known.contains(parent) => children
                .entry(parent.clone())
                .or_default()
                .push(span.span_id.clone()),
            _ => root_spans.push(span.span_id.clone()),
        }
    }

    let nodes = spans
        .into_iter()
        .map(|span| {
            let id = span.span_id.clone();
            let node = SpanNode {
                children: children.remove(&id).unwrap_or_default(),
                events: events_by_span.remove(&id).unwrap_or_default(),
                artifacts: artifacts_by_span.remove(&id).unwrap_or_default(),
                duration_ms: span.duration_ms(),
                span,
            };
            (id, node)
        })
        .collect();

    Ok(Some(TraceDetail {
        duration_ms: trace.duration_ms(),
        trace,
        root_spans,
        spans: nodes,
        total_events,
        total_artifacts,
    }))
}

/// Events of one span; `None` when the span is not part of the trace.
pub fn span_events(
    store: &dyn TraceStore,
    trace_id: &str,
    span_id: &str,
) -> Result<Option<Vec<EventRecord>>, StoreError> {
    if !span_exists(store, trace_id, span_id)? {
        return Ok(None);
    }
    let events = store
        .get_events(trace_id)?
        .into_iter()
        .filter(|e| e.span_id == span_id)
        .collect();
    Ok(Some(events))
}

/// Artifacts of one span; `None` when the span is not part of the trace.
pub fn span_artifacts(
    store: &dyn TraceStore,
    trace_id: &str,
    span_id: &str,
) -> Result<Option<Vec<ArtifactRecord>>, StoreError> {
    if !span_exists(store, trace_id, span_id)? {
        return Ok(None);
    }
    let artifacts = store
        .get_artifacts(trace_id)?
        .into_iter()
        .filter(|a| a.span_id == span_id)
        .collect();
    Ok(Some(artifacts))
}

fn span_exists(store: &dyn TraceStore, trace_id: &str, span_id: &str) -> Result<bool, StoreError> {
    Ok(store
        .get_spans(trace_id)?
        .iter()
        .any(|s| s.span_id == span_id))
}

/// Formats unix milliseconds as `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Formats milliseconds as seconds with six decimal places, e.g. `1.500000s`.
pub fn format_duration(ms: i64) -> String {
    format!("{:.6}s", ms as f64 / 1000.0)
}
