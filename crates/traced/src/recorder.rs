//! Span lifecycle and forwarding to the trace store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};
use traced_core::{
    new_id, now_ms, ArtifactRecord, ArtifactType, EventRecord, SpanOutcome, SpanRecord, Status,
    TraceRecord,
};
use traced_store::{MemoryStore, TraceStore};

use crate::context::{self, FlowId};

/// What is known about a span when it starts.
#[derive(Debug, Clone, Default)]
pub struct SpanStart {
    pub name: String,
    pub component: Option<String>,
    pub params: Option<Value>,
}

impl SpanStart {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Identity of a started span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanHandle {
    trace_id: String,
    span_id: String,
}

impl SpanHandle {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }
}

struct OpenSpan {
    record: SpanRecord,
    flow: FlowId,
    is_root: bool,
}

/// Creates and finishes spans, keeping each flow's context in step and
/// writing every change through to the store.
///
/// Store failures are logged and swallowed: tracing never changes the
/// behavior of the traced code.
pub struct Recorder {
    store: RwLock<Arc<dyn TraceStore>>,
    open: Mutex<HashMap<String, OpenSpan>>,
    seq: AtomicI64,
    started: AtomicBool,
}

impl Recorder {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self {
            store: RwLock::new(store),
            open: Mutex::new(HashMap::new()),
            seq: AtomicI64::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// The store currently written to.
    pub fn store(&self) -> Arc<dyn TraceStore> {
        match self.store.read() {
            Ok(store) => store.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swaps the backing store.
    ///
    /// Spans still open finish on the new store, which may never have seen
    /// their start.
    pub fn replace_store(&self, store: Arc<dyn TraceStore>) {
        if self.started.load(Ordering::Relaxed) {
            warn!(
                "Switching trace storage to {} after traces were recorded",
                store.backend()
            );
        }
        let backend = store.backend();
        match self.store.write() {
            Ok(mut current) => *current = store,
            Err(poisoned) => *poisoned.into_inner() = store,
        }
        info!("Trace storage set to {}", backend);
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Starts a span as a child of the current flow's active span, or as the
    /// root of a new trace when the flow has none.
    pub fn start_span(&self, start: SpanStart) -> SpanHandle {
        let flow = context::current_flow();
        let parent_span_id = context::current_span_id_in(flow);
        let (trace_id, is_root) = match context::current_trace_id_in(flow) {
            Some(trace_id) => (trace_id, false),
            None => (new_id(), true),
        };

        let record = SpanRecord {
            span_id: new_id(),
            trace_id: trace_id.clone(),
            parent_span_id,
            name: start.name,
            component: start.component,
            start_time: now_ms(),
            end_time: None,
            status: Status::Running,
            params: start.params,
            result: None,
            error: None,
            seq: self.next_seq(),
        };
        let handle = SpanHandle {
            trace_id,
            span_id: record.span_id.clone(),
        };

        let store = self.store();
        if is_root {
            let trace = TraceRecord {
                trace_id: handle.trace_id.clone(),
                root_agent: record.agent_name().to_string(),
                start_time: record.start_time,
                end_time: None,
                status: Status::Running,
            };
            if let Err(e) = store.insert_trace(&trace) {
                warn!("Failed to record trace {}: {}", trace.trace_id, e);
            }
        }
        if let Err(e) = store.insert_span(&record) {
            warn!("Failed to record span {}: {}", record.name, e);
        }
        debug!(
            "Started span {} ({}) in trace {}",
            record.name, record.span_id, record.trace_id
        );

        context::push_span_in(flow, &handle.trace_id, &handle.span_id);
        self.started.store(true, Ordering::Relaxed);

        match self.open.lock() {
            Ok(mut open) => {
                open.insert(handle.span_id.clone(), OpenSpan { record, flow, is_root });
            }
            Err(_) => warn!("Open span table poisoned; span {} cannot end", handle.span_id),
        }
        handle
    }

    /// Ends a span. A second call for the same span is logged and ignored.
    pub fn end_span(&self, handle: &SpanHandle, outcome: SpanOutcome) {
        let Some(open) = self.take_open(&handle.span_id) else {
            warn!("Span {} already ended", handle.span_id);
            return;
        };
        let OpenSpan {
            mut record,
            flow,
            is_root,
        } = open;

        context::pop_span_in(flow, &record.span_id);

        let end_time = now_ms().max(record.start_time);
        record.end_time = Some(end_time);
        match outcome {
            SpanOutcome::Ok { result } => {
                record.status = Status::Ok;
                record.result = result;
            }
            SpanOutcome::Error(error) => {
                record.status = Status::Error;
                record.error = Some(error);
            }
        }

        let store = self.store();
        if let Err(e) = store.finish_span(&record) {
            warn!("Failed to finish span {}: {}", record.name, e);
        }
        if is_root {
            if let Err(e) = store.close_trace(&record.trace_id, end_time, record.status) {
                warn!("Failed to close trace {}: {}", record.trace_id, e);
            }
        }
        debug!(
            "Ended span {} ({}) with status {}",
            record.name,
            record.span_id,
            record.status.as_str()
        );
    }

    fn take_open(&self, span_id: &str) -> Option<OpenSpan> {
        let Ok(mut open) = self.open.lock() else {
            warn!("Open span table poisoned");
            return None;
        };
        open.remove(span_id)
    }

    fn is_open(&self, span_id: &str) -> bool {
        self.open
            .lock()
            .map(|open| open.contains_key(span_id))
            .unwrap_or(false)
    }

    /// Whether the span has started and not yet ended.
    pub fn is_active(&self, handle: &SpanHandle) -> bool {
        self.is_open(&handle.span_id)
    }

    /// Attaches a labelled event to an open span.
    pub fn add_event(&self, handle: &SpanHandle, label: &str, payload: Option<Value>) {
        if !self.is_open(&handle.span_id) {
            warn!("Dropping event {} for ended span {}", label, handle.span_id);
            return;
        }
        let event = EventRecord {
            event_id: new_id(),
            span_id: handle.span_id.clone(),
            trace_id: handle.trace_id.clone(),
            timestamp: now_ms(),
            seq: self.next_seq(),
            label: label.to_string(),
            payload,
        };
        if let Err(e) = self.store().insert_event(&event) {
            warn!("Failed to record event {}: {}", label, e);
        }
    }

    /// Saves a named artifact on an open span, replacing any earlier one of
    /// the same name. Returns the id of the stored artifact.
    pub fn save_artifact(
        &self,
        handle: &SpanHandle,
        name: &str,
        artifact_type: ArtifactType,
        payload: Value,
    ) -> Option<String> {
        if !self.is_open(&handle.span_id) {
            warn!("Dropping artifact {} for ended span {}", name, handle.span_id);
            return None;
        }
        let artifact = ArtifactRecord {
            artifact_id: new_id(),
            span_id: handle.span_id.clone(),
            trace_id: handle.trace_id.clone(),
            name: name.to_string(),
            artifact_type,
            payload,
            created_at: now_ms(),
        };
        match self.store().save_artifact(&artifact) {
            Ok(()) => Some(artifact.artifact_id),
            Err(e) => {
                warn!("Failed to save artifact {}: {}", name, e);
                None
            }
        }
    }

    /// Handle of the current flow's active span, if this recorder opened it.
    pub fn current_span(&self) -> Option<SpanHandle> {
        let span_id = context::current_span_id()?;
        let open = self.open.lock().ok()?;
        open.get(&span_id).map(|span| SpanHandle {
            trace_id: span.record.trace_id.clone(),
            span_id,
        })
    }
}

static RECORDER: OnceLock<Recorder> = OnceLock::new();

/// The process-wide recorder, backed by memory storage until configured.
pub fn recorder() -> &'static Recorder {
    RECORDER.get_or_init(|| {
        info!("No trace storage configured, using in-memory storage");
        Recorder::new(Arc::new(MemoryStore::new()))
    })
}

/// Points the process-wide recorder at `store`.
pub fn install_store(store: Arc<dyn TraceStore>) {
    let mut fresh = Some(store);
    let recorder = RECORDER.get_or_init(|| {
        let store = fresh
            .take()
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn TraceStore>);
        info!("Trace storage set to {}", store.backend());
        Recorder::new(store)
    });
    if let Some(store) = fresh {
        recorder.replace_store(store);
    }
}
