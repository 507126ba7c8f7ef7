//! In-memory trace storage.

use std::collections::HashMap;
use std::sync::Mutex;

use traced_core::{ArtifactRecord, EventRecord, SpanRecord, Status, TraceQuery, TraceRecord};

use crate::{paginate, StoreError, TraceStore};

/// Volatile store that keeps everything for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    traces: Vec<TraceRecord>,
    spans: Vec<SpanRecord>,
    events: Vec<EventRecord>,
    artifacts: Vec<ArtifactRecord>,
    trace_index: HashMap<String, usize>,
    span_index: HashMap<String, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of traces held.
    pub fn trace_count(&self) -> usize {
        self.state.lock().map(|s| s.traces.len()).unwrap_or(0)
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.state.lock().map_err(|_| StoreError::Lock)?;
        f(&mut guard)
    }
}

impl TraceStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn insert_trace(&self, trace: &TraceRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            let idx = state.traces.len();
            state.traces.push(trace.clone());
            state.trace_index.insert(trace.trace_id.clone(), idx);
            Ok(())
        })
    }

    fn close_trace(&self, trace_id: &str, end_time: i64, status: Status) -> Result<(), StoreError> {
        self.with_state(|state| {
            let idx = *state
                .trace_index
                .get(trace_id)
                .ok_or_else(|| StoreError::NotFound(format!("trace {}", trace_id)))?;
            let trace = &mut state.traces[idx];
            trace.end_time = Some(end_time);
            trace.status = status;
            Ok(())
        })
    }

    fn insert_span(&self, span: &SpanRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            let idx = state.spans.len();
            state.spans.push(span.clone());
            state.span_index.insert(span.span_id.clone(), idx);
            Ok(())
        })
    }

    fn finish_span(&self, span: &SpanRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            let idx = *state
                .span_index
                .get(&span.span_id)
                .ok_or_else(|| StoreError::NotFound(format!("span {}", span.span_id)))?;
            state.spans[idx] = span.clone();
            Ok(())
        })
    }

    fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            state.events.push(event.clone());
            Ok(())
        })
    }

    fn save_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            let existing = state
                .artifacts
                .iter()
                .position(|a| a.span_id == artifact.span_id && a.name == artifact.name);
            match existing {
                Some(idx) => state.artifacts[idx] = artifact.clone(),
                None => state.artifacts.push(artifact.clone()),
            }
            Ok(())
        })
    }

    fn get_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, StoreError> {
        self.with_state(|state| {
            Ok(state
                .trace_index
                .get(trace_id)
                .map(|&idx| state.traces[idx].clone()))
        })
    }

    fn list_traces(&self, query: &TraceQuery) -> Result<Vec<TraceRecord>, StoreError> {
        self.with_state(|state| {
            let mut traces: Vec<TraceRecord> = state
                .traces
                .iter()
                .filter(|t| query.matches(t))
                .cloned()
                .collect();
            // Stable sort keeps insertion order for equal start times.
            traces.sort_by_key(|t| t.start_time);
            Ok(paginate(traces, query))
        })
    }

    fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, StoreError> {
        self.with_state(|state| {
            let mut spans: Vec<SpanRecord> = state
                .spans
                .iter()
                .filter(|s| s.trace_id == trace_id)
                .cloned()
                .collect();
            spans.sort_by_key(|s| (s.start_time, s.seq));
            Ok(spans)
        })
    }

    fn get_events(&self, trace_id: &str) -> Result<Vec<EventRecord>, StoreError> {
        self.with_state(|state| {
            let mut events: Vec<EventRecord> = state
                .events
                .iter()
                .filter(|e| e.trace_id == trace_id)
                .cloned()
                .collect();
            events.sort_by_key(|e| (e.timestamp, e.seq));
            Ok(events)
        })
    }

    fn get_artifacts(&self, trace_id: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.with_state(|state| {
            let mut artifacts: Vec<ArtifactRecord> = state
                .artifacts
                .iter()
                .filter(|a| a.trace_id == trace_id)
                .cloned()
                .collect();
            artifacts.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.name.cmp(&b.name))
            });
            Ok(artifacts)
        })
    }

    fn span_count(&self, trace_id: &str) -> Result<u64, StoreError> {
        self.with_state(|state| {
            Ok(state.spans.iter().filter(|s| s.trace_id == trace_id).count() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[test]
    fn test_memory_round_trip() {
        conformance::round_trip(&MemoryStore::new());
    }

    #[test]
    fn test_memory_listing_order_and_filters() {
        conformance::listing(&MemoryStore::new());
    }

    #[test]
    fn test_memory_artifact_last_write_wins() {
        conformance::artifact_overwrite(&MemoryStore::new());
    }

    #[test]
    fn test_memory_missing_records() {
        conformance::missing_records(&MemoryStore::new());
    }

    #[test]
    fn test_memory_concurrent_writers() {
        let store = std::sync::Arc::new(MemoryStore::new());
        conformance::concurrent_writers(store.clone());
        assert_eq!(store.trace_count(), 8);
    }
}
