//! Trace listing and detail handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use traced_core::{Status, TraceQuery};
use traced_store::view::{self, TraceDetail, TraceSummary, DEFAULT_LIST_LIMIT};

use super::query;
use crate::error::AppError;
use crate::ServerState;

/// Query parameters for listing traces.
#[derive(Debug, Deserialize, Default)]
pub struct ListTracesQuery {
    pub root_agent: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn parse_status(status: &str) -> Result<Status, AppError> {
    let parsed = Status::from_str(status);
    if parsed.as_str() != status {
        return Err(AppError::BadRequest(format!("unknown status: {}", status)));
    }
    Ok(parsed)
}

/// GET /api/traces - List trace summaries, oldest first.
pub async fn list(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ListTracesQuery>,
) -> Result<Json<Vec<TraceSummary>>, AppError> {
    let filter = TraceQuery {
        root_agent: params.root_agent,
        status: params.status.as_deref().map(parse_status).transpose()?,
        limit: params.limit.or(Some(DEFAULT_LIST_LIMIT)),
        offset: params.offset,
    };

    let store = state.store.clone();
    let traces = query("list traces", move || view::list_summaries(store.as_ref(), &filter)).await?;
    Ok(Json(traces))
}

/// GET /api/traces/{trace_id} - One trace with its span tree.
pub async fn get(
    State(state): State<Arc<ServerState>>,
    Path(trace_id): Path<String>,
) -> Result<Json<TraceDetail>, AppError> {
    let store = state.store.clone();
    query("get trace", move || view::trace_detail(store.as_ref(), &trace_id))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("trace not found".into()))
}
