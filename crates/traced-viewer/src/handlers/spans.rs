//! Per-span event and artifact handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use traced_core::{ArtifactRecord, EventRecord};
use traced_store::view;

use super::query;
use crate::error::AppError;
use crate::ServerState;

/// Spans are addressed within a trace.
#[derive(Debug, Deserialize, Default)]
pub struct SpanQuery {
    pub trace_id: Option<String>,
}

impl SpanQuery {
    fn require_trace_id(self) -> Result<String, AppError> {
        self.trace_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::BadRequest("trace_id is required".into()))
    }
}

/// GET /api/spans/{span_id}/events?trace_id= - Events of one span.
pub async fn events(
    State(state): State<Arc<ServerState>>,
    Path(span_id): Path<String>,
    Query(params): Query<SpanQuery>,
) -> Result<Json<Vec<EventRecord>>, AppError> {
    let trace_id = params.require_trace_id()?;
    let store = state.store.clone();
    query("get span events", move || {
        view::span_events(store.as_ref(), &trace_id, &span_id)
    })
    .await?
    .map(Json)
    .ok_or_else(|| AppError::NotFound("span not found".into()))
}

/// GET /api/spans/{span_id}/artifacts?trace_id= - Artifacts of one span.
pub async fn artifacts(
    State(state): State<Arc<ServerState>>,
    Path(span_id): Path<String>,
    Query(params): Query<SpanQuery>,
) -> Result<Json<Vec<ArtifactRecord>>, AppError> {
    let trace_id = params.require_trace_id()?;
    let store = state.store.clone();
    query("get span artifacts", move || {
        view::span_artifacts(store.as_ref(), &trace_id, &span_id)
    })
    .await?
    .map(Json)
    .ok_or_else(|| AppError::NotFound("span not found".into()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::{app, get_json};

    #[tokio::test]
    async fn test_span_events_and_artifacts() {
        let (status, body) = get_json(app(), "/api/spans/child/events?trace_id=trace-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["label"], "step");
        assert_eq!(body[0]["payload"]["n"], 1);

        let (status, body) = get_json(app(), "/api/spans/root/artifacts?trace_id=trace-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "report");
        assert_eq!(body[0]["artifact_type"], "json");

        let (_, body) = get_json(app(), "/api/spans/root/events?trace_id=trace-1").await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_span_lookup_errors() {
        let (status, body) = get_json(app(), "/api/spans/child/events").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "trace_id is required");

        let (status, _) = get_json(app(), "/api/spans/nope/artifacts?trace_id=trace-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get_json(app(), "/api/spans/child/events?trace_id=trace-2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
