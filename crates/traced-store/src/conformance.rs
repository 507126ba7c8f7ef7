//! Behaviour every backend must share, exercised from each backend's tests.

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use traced_core::{
    ArtifactRecord, ArtifactType, ErrorInfo, EventRecord, SpanRecord, Status, TraceQuery,
    TraceRecord,
};

use crate::{StoreError, TraceStore};

pub fn trace(trace_id: &str, root_agent: &str, start_time: i64) -> TraceRecord {
    TraceRecord {
        trace_id: trace_id.to_string(),
        root_agent: root_agent.to_string(),
        start_time,
        end_time: None,
        status: Status::Running,
    }
}

pub fn span(trace_id: &str, span_id: &str, parent: Option<&str>, start_time: i64, seq: i64) -> SpanRecord {
    SpanRecord {
        span_id: span_id.to_string(),
        trace_id: trace_id.to_string(),
        parent_span_id: parent.map(str::to_string),
        name: span_id.to_string(),
        component: None,
        start_time,
        end_time: None,
        status: Status::Running,
        params: None,
        result: None,
        error: None,
        seq,
    }
}

pub fn event(trace_id: &str, span_id: &str, label: &str, timestamp: i64, seq: i64, payload: Option<Value>) -> EventRecord {
    EventRecord {
        event_id: format!("{}-{}", span_id, seq),
        span_id: span_id.to_string(),
        trace_id: trace_id.to_string(),
        timestamp,
        seq,
        label: label.to_string(),
        payload,
    }
}

pub fn artifact(trace_id: &str, span_id: &str, name: &str, payload: Value, created_at: i64) -> ArtifactRecord {
    ArtifactRecord {
        artifact_id: format!("{}-{}-{}", span_id, name, created_at),
        span_id: span_id.to_string(),
        trace_id: trace_id.to_string(),
        name: name.to_string(),
        artifact_type: ArtifactType::Json,
        payload,
        created_at,
    }
}

/// Writes a span tree with events and artifacts and reads it back unchanged.
pub fn round_trip(store: &dyn TraceStore) {
    store.insert_trace(&trace("t1", "DataProcessor", 1_000)).unwrap();

    let mut root = span("t1", "root", None, 1_000, 1);
    root.component = Some("DataProcessor".to_string());
    root.params = Some(json!({"data": {"name": "alice"}}));
    store.insert_span(&root).unwrap();

    let mut child = span("t1", "child", Some("root"), 1_000, 2);
    store.insert_span(&child).unwrap();

    store.insert_event(&event("t1", "child", "step1_started", 1_002, 3, None)).unwrap();
    store.insert_event(&event("t1", "child", "step2_started", 1_002, 4, Some(json!({"n": 2})))).unwrap();
    store.insert_event(&event("t1", "child", "late_but_earlier", 1_001, 5, Some(Value::Null))).unwrap();
    store.save_artifact(&artifact("t1", "child", "input_data", json!({"x": [1, 2]}), 1_003)).unwrap();
    let mut text = artifact("t1", "root", "summary", json!("done"), 1_004);
    text.artifact_type = ArtifactType::Text;
    store.save_artifact(&text).unwrap();

    child.end_time = Some(1_005);
    child.status = Status::Error;
    child.error = Some(ErrorInfo::new("ValueError", "x"));
    child.result = Some(Value::Null);
    store.finish_span(&child).unwrap();

    root.end_time = Some(1_006);
    root.status = Status::Ok;
    root.result = Some(json!({"NAME": "ALICE"}));
    store.finish_span(&root).unwrap();
    store.close_trace("t1", 1_006, Status::Ok).unwrap();

    let stored = store.get_trace("t1").unwrap().unwrap();
    assert_eq!(stored.end_time, Some(1_006));
    assert_eq!(stored.status, Status::Ok);
    assert_eq!(stored.root_agent, "DataProcessor");

    let spans = store.get_spans("t1").unwrap();
    assert_eq!(spans, vec![root, child]);
    assert_eq!(spans[1].params, None);
    assert_eq!(spans[1].result, Some(Value::Null));
    assert_eq!(store.span_count("t1").unwrap(), 2);

    let labels: Vec<String> = store
        .get_events("t1")
        .unwrap()
        .into_iter()
        .map(|e| e.label)
        .collect();
    assert_eq!(labels, vec!["late_but_earlier", "step1_started", "step2_started"]);
    let events = store.get_events("t1").unwrap();
    assert_eq!(events[0].payload, Some(Value::Null));
    assert_eq!(events[1].payload, None);
    assert_eq!(events[2].payload, Some(json!({"n": 2})));

    let artifacts = store.get_artifacts("t1").unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].name, "input_data");
    assert_eq!(artifacts[0].payload, json!({"x": [1, 2]}));
    assert_eq!(artifacts[1].artifact_type, ArtifactType::Text);
}

/// Traces list oldest first and honour filters and pagination.
pub fn listing(store: &dyn TraceStore) {
    store.insert_trace(&trace("late", "b", 3_000)).unwrap();
    store.insert_trace(&trace("early", "a", 1_000)).unwrap();
    store.insert_trace(&trace("tie-1", "a", 2_000)).unwrap();
    store.insert_trace(&trace("tie-2", "b", 2_000)).unwrap();
    store.close_trace("early", 1_500, Status::Ok).unwrap();

    let ids = |traces: Vec<TraceRecord>| traces.into_iter().map(|t| t.trace_id).collect::<Vec<_>>();

    let all = store.list_traces(&TraceQuery::default()).unwrap();
    assert_eq!(ids(all), vec!["early", "tie-1", "tie-2", "late"]);

    let query = TraceQuery {
        root_agent: Some("a".to_string()),
        ..Default::default()
    };
    assert_eq!(ids(store.list_traces(&query).unwrap()), vec!["early", "tie-1"]);

    let query = TraceQuery {
        status: Some(Status::Running),
        limit: Some(2),
        offset: Some(1),
        ..Default::default()
    };
    assert_eq!(ids(store.list_traces(&query).unwrap()), vec!["tie-2", "late"]);
}

/// A second artifact with the same name in the same span replaces the first.
pub fn artifact_overwrite(store: &dyn TraceStore) {
    store.insert_trace(&trace("t1", "a", 0)).unwrap();
    store.insert_span(&span("t1", "s1", None, 0, 1)).unwrap();
    store.insert_span(&span("t1", "s2", Some("s1"), 0, 2)).unwrap();

    store.save_artifact(&artifact("t1", "s1", "result", json!(1), 10)).unwrap();
    store.save_artifact(&artifact("t1", "s2", "result", json!(2), 11)).unwrap();
    store.save_artifact(&artifact("t1", "s1", "result", json!(3), 12)).unwrap();

    let artifacts = store.get_artifacts("t1").unwrap();
    assert_eq!(artifacts.len(), 2);
    let s1 = artifacts.iter().find(|a| a.span_id == "s1").unwrap();
    assert_eq!(s1.payload, json!(3));
    assert_eq!(s1.created_at, 12);
}

/// Unknown ids read as empty and updating them is a distinguishable error.
pub fn missing_records(store: &dyn TraceStore) {
    assert!(store.get_trace("nope").unwrap().is_none());
    assert!(store.get_spans("nope").unwrap().is_empty());
    assert!(store.get_events("nope").unwrap().is_empty());
    assert_eq!(store.span_count("nope").unwrap(), 0);
    assert!(matches!(
        store.close_trace("nope", 1, Status::Ok),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.finish_span(&span("nope", "nope", None, 0, 0)),
        Err(StoreError::NotFound(_))
    ));
}

/// Eight threads write their own traces at once.
pub fn concurrent_writers<S: TraceStore + 'static>(store: Arc<S>) {
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let trace_id = format!("t{}", i);
                store.insert_trace(&trace(&trace_id, "worker", i)).unwrap();
                for j in 0..10 {
                    let span_id = format!("t{}-s{}", i, j);
                    store.insert_span(&span(&trace_id, &span_id, None, i, j)).unwrap();
                    store
                        .insert_event(&event(&trace_id, &span_id, "tick", i, j, None))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for i in 0..8 {
        let trace_id = format!("t{}", i);
        assert_eq!(store.get_spans(&trace_id).unwrap().len(), 10);
        assert_eq!(store.get_events(&trace_id).unwrap().len(), 10);
    }
}
