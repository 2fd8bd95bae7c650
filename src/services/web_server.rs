// src/services/web_server.rs
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::context::{LogEntry, RunResult};
use crate::core::executor::FlowExecutor;
use crate::core::graph::{FlowEdge, FlowNode};
use crate::services::config::SpiderConfig;
use crate::services::flow_store::{DirectoryFlowStore, FlowStore};

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<FlowExecutor>,
    pub store: Arc<dyn FlowStore>,
}

/// Body of the preview and stream endpoints: an unsaved flow from the editor.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub nodes: Option<Vec<FlowNode>>,
    pub edges: Option<Vec<FlowEdge>>,
}

type ApiResponse = (StatusCode, Json<Value>);

fn failure(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

fn run_payload(result: &RunResult) -> Result<Value, ApiResponse> {
    serde_json::to_value(result).map_err(|e| {
        error!("Failed to encode run result: {}", e);
        failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "spiderflow", "version": env!("CARGO_PKG_VERSION") }))
}

async fn run_preview(
    Extension(state): Extension<AppState>,
    Json(req): Json<RunRequest>,
) -> ApiResponse {
    let (Some(nodes), Some(edges)) = (req.nodes, req.edges) else {
        return failure(StatusCode::BAD_REQUEST, "nodes and edges are required");
    };

    let result = state.executor.execute_flow(&nodes, &edges, None).await;
    match run_payload(&result) {
        Ok(data) => (StatusCode::OK, Json(json!({ "success": true, "data": data }))),
        Err(resp) => resp,
    }
}

async fn run_saved(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> ApiResponse {
    let doc = match state.store.load(&id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return failure(StatusCode::NOT_FOUND, "Flow not found"),
        Err(e) => {
            warn!("Failed to load flow '{}': {:#}", id, e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e));
        }
    };

    let execution_id = Uuid::new_v4();
    info!("Running flow '{}' ({})", doc.title(), execution_id);
    let result = state.executor.execute_flow(&doc.nodes, &doc.edges, None).await;

    match run_payload(&result) {
        Ok(data) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": data, "executionId": execution_id })),
        ),
        Err(resp) => resp,
    }
}

fn log_event(entry: &LogEntry) -> Event {
    let data = serde_json::to_string(entry).unwrap_or_default();
    Event::default().event("log").data(data)
}

fn result_event(result: RunResult) -> Event {
    let data = serde_json::to_string(&json!({ "success": true, "data": result }))
        .unwrap_or_default();
    Event::default().event("result").data(data)
}

/// Streams log entries while the flow runs, then one `result` event.
async fn run_stream(
    Extension(state): Extension<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiResponse> {
    let (Some(nodes), Some(edges)) = (req.nodes, req.edges) else {
        return Err(failure(StatusCode::BAD_REQUEST, "nodes and edges are required"));
    };

    let (log_tx, log_rx) = mpsc::unbounded_channel::<LogEntry>();
    let (done_tx, done_rx) = oneshot::channel::<RunResult>();
    let ctx = state.executor.new_context().with_sender(log_tx);
    let executor = state.executor.clone();

    tokio::spawn(async move {
        let result = executor.run(&nodes, &edges, ctx).await;
        if done_tx.send(result).is_err() {
            warn!("Stream client went away before the run finished");
        }
    });

    // The log channel closes when the run drops its context.
    let logs = UnboundedReceiverStream::new(log_rx)
        .map(|entry| Ok::<_, Infallible>(log_event(&entry)));
    let outcome = stream::once(done_rx).filter_map(|done| async move {
        match done {
            Ok(result) => Some(Ok::<_, Infallible>(result_event(result))),
            Err(_) => {
                error!("Flow run ended without a result");
                None
            }
        }
    });

    Ok(Sse::new(logs.chain(outcome)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/flows/run/preview", post(run_preview))
        .route("/api/flows/run/stream", post(run_stream))
        .route("/api/flows/:id/run", post(run_saved))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}

pub async fn start_web_server(config: SpiderConfig, host: String, port: u16) -> anyhow::Result<()> {
    let store = DirectoryFlowStore::new(&config.store.flows_dir);
    info!("Serving saved flows from {:?}", store.root());

    let state = AppState {
        executor: Arc::new(FlowExecutor::new(config)),
        store: Arc::new(store),
    };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("spiderflow listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::FlowDocument;

    struct MemoryStore(Option<FlowDocument>);

    impl FlowStore for MemoryStore {
        fn load(&self, id: &str) -> anyhow::Result<Option<FlowDocument>> {
            if id == "broken" {
                anyhow::bail!("unreadable");
            }
            Ok(self.0.clone())
        }
    }

    fn state(doc: Option<FlowDocument>) -> AppState {
        AppState {
            executor: Arc::new(FlowExecutor::new(SpiderConfig::default())),
            store: Arc::new(MemoryStore(doc)),
        }
    }

    fn simple_flow() -> (Vec<FlowNode>, Vec<FlowEdge>) {
        let doc: FlowDocument = serde_json::from_value(json!({
            "nodes": [
                { "id": "s", "type": "start" },
                { "id": "o", "type": "output", "data": { "items": [{ "name": "x", "value": "1" }] } }
            ],
            "edges": [{ "id": "e1", "source": "s", "target": "o" }]
        }))
        .unwrap();
        (doc.nodes, doc.edges)
    }

    #[tokio::test]
    async fn test_preview_requires_nodes_and_edges() {
        let req = RunRequest { nodes: Some(vec![]), edges: None };
        let (status, Json(body)) = run_preview(Extension(state(None)), Json(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "success": false, "error": "nodes and edges are required" }));
    }

    #[tokio::test]
    async fn test_preview_runs_flow() {
        let (nodes, edges) = simple_flow();
        let req = RunRequest { nodes: Some(nodes), edges: Some(edges) };
        let (status, Json(body)) = run_preview(Extension(state(None)), Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["success"], true);
        assert_eq!(body["data"]["data"], json!([{ "x": "1" }]));
        assert!(body["data"]["logs"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn test_saved_flow_lookup() {
        let (status, Json(body)) =
            run_saved(Extension(state(None)), Path("nope".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Flow not found");

        let (status, _) = run_saved(Extension(state(None)), Path("broken".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (nodes, edges) = simple_flow();
        let doc = FlowDocument { nodes, edges, ..Default::default() };
        let (status, Json(body)) =
            run_saved(Extension(state(Some(doc))), Path("daily".to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["data"], json!([{ "x": "1" }]));
        let execution_id = body["executionId"].as_str().unwrap();
        assert!(Uuid::parse_str(execution_id).is_ok());
    }

    #[tokio::test]
    async fn test_stream_rejects_missing_edges() {
        let req = RunRequest { nodes: None, edges: Some(vec![]) };
        let Err((status, _)) = run_stream(Extension(state(None)), Json(req)).await else {
            panic!("expected a 400 response");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
