mod common;

use std::num::ParseIntError;
use std::time::Duration;

use serde_json::json;
use traced::{traced, Status, TraceStore};

#[traced]
async fn fetch_part(id: u32, delay_ms: u64) -> u32 {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    id * 10
}

#[traced]
async fn gather() -> u32 {
    let (a, b) = tokio::join!(fetch_part(1, 20), fetch_part(2, 5));
    a + b
}

#[traced]
async fn wait_forever() -> u32 {
    std::future::pending::<()>().await;
    0
}

#[traced]
async fn parse_and_double(input: String) -> Result<i64, ParseIntError> {
    let value: i64 = input.trim().parse()?;
    Ok(value * 2)
}

#[traced]
fn isolated_leaf() -> u32 {
    7
}

#[tokio::test]
async fn test_concurrent_children_share_parent() {
    common::store();
    assert_eq!(gather().await, 30);

    let (trace, spans) = common::only_trace("gather");
    assert_eq!(trace.status, Status::Ok);
    assert_eq!(spans.len(), 3);
    let root = &spans[0];
    assert_eq!(root.name, "gather");
    for child in &spans[1..] {
        assert_eq!(child.name, "fetch_part");
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert!(child.end_time.unwrap() <= root.end_time.unwrap());
    }
    let mut results: Vec<_> = spans[1..].iter().map(|s| s.result.clone()).collect();
    results.sort_by_key(|r| r.as_ref().and_then(|v| v.as_u64()));
    assert_eq!(results, vec![Some(json!(10)), Some(json!(20))]);
    assert_eq!(traced::context::current_span_id(), None);
}

#[tokio::test]
async fn test_dropped_future_ends_cancelled() {
    common::store();
    let timed_out = tokio::time::timeout(Duration::from_millis(10), wait_forever()).await;
    assert!(timed_out.is_err());

    let (trace, spans) = common::only_trace("wait_forever");
    assert_eq!(trace.status, Status::Error);
    assert!(trace.end_time.is_some());
    assert_eq!(spans[0].error.as_ref().unwrap().kind, "cancelled");
    assert_eq!(traced::context::current_span_id(), None);
}

#[tokio::test]
async fn test_async_error_propagation() {
    common::store();
    assert_eq!(parse_and_double(" 21 ".to_string()).await.unwrap(), 42);
    assert!(parse_and_double("abc".to_string()).await.is_err());

    let traces = common::traces_for("parse_and_double");
    assert_eq!(traces.len(), 2);
    assert_eq!(traces[0].status, Status::Ok);
    assert_eq!(traces[1].status, Status::Error);

    let failed = &common::store().get_spans(&traces[1].trace_id).unwrap()[0];
    assert_eq!(failed.params, Some(json!({"input": "abc"})));
    assert_eq!(failed.error.as_ref().unwrap().kind, "ParseIntError");
    assert_eq!(failed.result, None);
}

#[tokio::test]
async fn test_spawned_tasks_are_independent() {
    common::store();
    let tasks: Vec<_> = (0..3).map(|i| tokio::spawn(fetch_part(i, 1))).collect();
    for task in tasks {
        task.await.unwrap();
    }

    let traces = common::traces_for("fetch_part");
    assert_eq!(traces.len(), 3);
    for trace in &traces {
        let spans = common::store().get_spans(&trace.trace_id).unwrap();
        assert_eq!(spans[0].parent_span_id, None);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_interleaved_tasks_on_one_thread_keep_separate_traces() {
    common::store();
    let holder = tokio::spawn(async {
        let held = traced::span("held_across_await");
        tokio::time::sleep(Duration::from_millis(50)).await;
        held.end();
    });
    let other = tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        isolated_leaf()
    });
    assert_eq!(other.await.unwrap(), 7);
    holder.await.unwrap();

    let (held_trace, held_spans) = common::only_trace("held_across_await");
    assert_eq!(held_trace.status, Status::Ok);
    assert_eq!(held_spans.len(), 1);

    let (leaf_trace, leaf_spans) = common::only_trace("isolated_leaf");
    assert_ne!(leaf_trace.trace_id, held_trace.trace_id);
    assert_eq!(leaf_spans.len(), 1);
    assert_eq!(leaf_spans[0].parent_span_id, None);
    assert_eq!(leaf_spans[0].result, Some(json!(7)));
}
