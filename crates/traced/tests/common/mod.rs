#![allow(dead_code)]

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};
use traced::{MemoryStore, SpanRecord, TraceQuery, TraceRecord, TraceStore};

/// Memory store installed as the process-wide trace store, once per test binary.
pub fn store() -> Arc<MemoryStore> {
    static STORE: OnceLock<Arc<MemoryStore>> = OnceLock::new();
    STORE
        .get_or_init(|| {
            let store = Arc::new(MemoryStore::new());
            traced::configure_with_store(store.clone());
            store
        })
        .clone()
}

pub fn traces_for(root_agent: &str) -> Vec<TraceRecord> {
    let query = TraceQuery {
        root_agent: Some(root_agent.to_string()),
        ..Default::default()
    };
    store().list_traces(&query).unwrap()
}

/// The single trace rooted at `root_agent`, with its spans.
pub fn only_trace(root_agent: &str) -> (TraceRecord, Vec<SpanRecord>) {
    let traces = traces_for(root_agent);
    assert_eq!(traces.len(), 1, "expected one trace rooted at {}", root_agent);
    let trace = traces.into_iter().next().unwrap();
    let spans = store().get_spans(&trace.trace_id).unwrap();
    (trace, spans)
}

/// Collects the messages of WARN events emitted on the current thread.
#[derive(Clone, Default)]
struct WarningLog(Arc<Mutex<Vec<String>>>);

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for WarningLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.0.lock().unwrap().push(message);
    }
}

/// Runs `f` and returns the warnings it logged.
pub fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    let log = WarningLog::default();
    let subscriber = Registry::default().with(log.clone());
    let value = tracing::subscriber::with_default(subscriber, f);
    let warnings = log.0.lock().unwrap().clone();
    (value, warnings)
}
