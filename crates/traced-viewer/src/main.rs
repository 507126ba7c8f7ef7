mod error;
mod handlers;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use traced_config::{StorageConfig, TracingConfig};
use traced_store::TraceStore;

const DEFAULT_DB_PATH: &str = "/data/traces.db";
const DEFAULT_ADDR: &str = "0.0.0.0:5000";

pub struct ServerState {
    pub store: Arc<dyn TraceStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let db_path = env::var("TRACED_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.into());
    let config = TracingConfig::from_env_or(StorageConfig::sql(db_path))?;
    let store = tokio::task::spawn_blocking(move || config.open_store()).await??;
    info!("Serving traces from {} store", store.backend());

    let state = Arc::new(ServerState { store });

    let addr = env::var("TRACED_VIEWER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.into());
    info!("Starting trace viewer on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    let api_routes = Router::new()
        .route("/api/traces", get(handlers::traces::list))
        .route("/api/traces/{trace_id}", get(handlers::traces::get))
        .route("/api/spans/{span_id}/events", get(handlers::spans::events))
        .route("/api/spans/{span_id}/artifacts", get(handlers::spans::artifacts))
        .layer(trace_layer);

    Router::new()
        .merge(api_routes)
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod test_support {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use traced_core::{
        ArtifactRecord, ArtifactType, EventRecord, SpanRecord, Status, TraceRecord,
    };
    use traced_store::{MemoryStore, TraceStore};

    use crate::ServerState;

    const START: i64 = 1_700_000_000_000;

    fn span(span_id: &str, name: &str, parent: Option<&str>, offset: i64) -> SpanRecord {
        SpanRecord {
            span_id: span_id.to_string(),
            trace_id: "trace-1".to_string(),
            parent_span_id: parent.map(str::to_string),
            name: name.to_string(),
            component: None,
            start_time: START + offset,
            end_time: Some(START + 1500 - offset),
            status: Status::Ok,
            params: None,
            result: Some(json!(offset)),
            error: None,
            seq: offset,
        }
    }

    /// Two traces: a finished `pipeline` with a child span, and a running `ingest`.
    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_trace(&TraceRecord {
                trace_id: "trace-1".to_string(),
                root_agent: "pipeline".to_string(),
                start_time: START,
                end_time: Some(START + 1500),
                status: Status::Ok,
            })
            .unwrap();
        store
            .insert_trace(&TraceRecord {
                trace_id: "trace-2".to_string(),
                root_agent: "ingest".to_string(),
                start_time: START + 10,
                end_time: None,
                status: Status::Running,
            })
            .unwrap();
        store.insert_span(&span("root", "pipeline", None, 0)).unwrap();
        store.insert_span(&span("child", "load", Some("root"), 1)).unwrap();
        store
            .insert_event(&EventRecord {
                event_id: "event-1".to_string(),
                span_id: "child".to_string(),
                trace_id: "trace-1".to_string(),
                timestamp: START + 2,
                seq: 2,
                label: "step".to_string(),
                payload: Some(json!({"n": 1})),
            })
            .unwrap();
        store
            .save_artifact(&ArtifactRecord {
                artifact_id: "artifact-1".to_string(),
                span_id: "root".to_string(),
                trace_id: "trace-1".to_string(),
                name: "report".to_string(),
                artifact_type: ArtifactType::Json,
                payload: json!({"rows": 3}),
                created_at: START + 3,
            })
            .unwrap();
        store
    }

    pub fn app() -> Router {
        crate::router(Arc::new(ServerState {
            store: Arc::new(seeded_store()),
        }))
    }

    pub async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
