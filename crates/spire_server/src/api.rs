//! HTTP and WebSocket API.
//!
//! `/ws` upgrades to the realtime protocol. The `/internal` routes are for
//! collaborators on the same host: the mutation layer reports committed
//! writes, and operators can force an artifact reload.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use spire_core::{ArtifactStore, ArtifactVersion, CoreError, Operation, Record};
use spire_hooks::{DispatchStats, HookMatcher, JobQueue};
use spire_hub::{BroadcastHub, ConnectionConfig, HubStats, serve_socket};
use spire_watch::{ArtifactReloader, ReloadError};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live artifact
    pub store: Arc<ArtifactStore>,
    /// Realtime hub
    pub hub: Arc<BroadcastHub>,
    /// Hook matcher wired to `jobs`
    pub matcher: HookMatcher,
    /// Job dispatch engine
    pub jobs: Arc<JobQueue>,
    /// Explicit reload path
    pub reloader: Arc<ArtifactReloader>,
    /// Per-connection settings
    pub connection: ConnectionConfig,
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Path named an operation other than create/update/delete
    #[error(transparent)]
    UnknownOperation(CoreError),

    /// Commit body is not a JSON object
    #[error("record must be a JSON object or null")]
    InvalidRecord,

    /// Reload failed; previous artifact kept
    #[error(transparent)]
    Reload(#[from] ReloadError),

    /// Reload task did not complete
    #[error("reload task failed: {0}")]
    Task(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownOperation(_) | Self::InvalidRecord => StatusCode::BAD_REQUEST,
            Self::Reload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket))
        .route("/health", get(health))
        .route("/internal/commits/{entity}/{operation}", post(commit))
        .route("/internal/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn websocket(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    // a little headroom so oversize frames get an error reply before the close
    let limit = state.connection.max_frame_bytes.saturating_mul(2);
    upgrade
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| serve_socket(socket, state.hub, state.connection))
}

/// `GET /health` body
#[derive(Debug, Serialize)]
pub struct Health {
    /// Always `"ok"` when the server answers
    pub status: &'static str,
    /// Live artifact version, if one is installed
    pub artifact: Option<ArtifactVersion>,
    /// Connected WebSocket clients
    pub clients: usize,
    /// Hub delivery counters
    pub hub: HubStats,
    /// Job dispatch counters
    pub jobs: DispatchStats,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        artifact: state.store.version(),
        clients: state.hub.client_count(),
        hub: state.hub.stats(),
        jobs: state.jobs.stats(),
    })
}

/// `POST /internal/commits/...` body
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CommitAccepted {
    /// Topic the record was published on
    pub topic: String,
    /// Dispatch requests accepted
    pub dispatched: usize,
    /// Clients the record was queued for
    pub delivered: usize,
}

async fn commit(
    State(state): State<AppState>,
    Path((entity, operation)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<CommitAccepted>), ApiError> {
    let operation: Operation = operation.parse().map_err(ApiError::UnknownOperation)?;
    let record: Option<Record> = match &body {
        Value::Object(map) => Some(map.clone()),
        Value::Null => None,
        _ => return Err(ApiError::InvalidRecord),
    };

    let dispatched = state.matcher.evaluate(&entity, operation, record.as_ref());
    let topic = operation.topic(&entity);
    let delivered = state.hub.publish(&topic, &body);
    debug!(topic = %topic, dispatched, delivered, "commit processed");

    Ok((
        StatusCode::ACCEPTED,
        Json(CommitAccepted {
            topic,
            dispatched,
            delivered,
        }),
    ))
}

async fn reload(State(state): State<AppState>) -> Result<Json<ArtifactVersion>, ApiError> {
    let reloader = Arc::clone(&state.reloader);
    let version = tokio::task::spawn_blocking(move || reloader.reload())
        .await
        .map_err(|err| ApiError::Task(err.to_string()))??;
    Ok(Json(version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use spire_hooks::{JobDispatchPort, LogRunner, QueueConfig};
    use spire_hub::Client;
    use tower::ServiceExt;

    const ARTIFACT: &str = r#"{
        "name": "blog",
        "entities": ["Post"],
        "hooks": [{"entity": "Post", "timing": "after", "operation": "create", "jobs": ["notify"]}],
        "jobs": [{"name": "notify", "inputEntity": "Post"}]
    }"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        state: AppState,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, ARTIFACT).unwrap();

        let store = Arc::new(ArtifactStore::new());
        store.load_file(&path).unwrap();
        let hub = Arc::new(BroadcastHub::new());
        let jobs = Arc::new(JobQueue::start(QueueConfig::default(), Arc::new(LogRunner)));
        let port: Arc<dyn JobDispatchPort> = jobs.clone();
        let state = AppState {
            matcher: HookMatcher::new(store.clone(), port),
            reloader: Arc::new(ArtifactReloader::new(&path, store.clone(), hub.clone())),
            store,
            hub,
            jobs,
            connection: ConnectionConfig::default(),
        };
        Fixture {
            _dir: dir,
            path,
            state,
        }
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let fixture = fixture();
        let (status, body) = call(&fixture.state, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["artifact"]["generation"], 1);
        assert_eq!(body["clients"], 0);
    }

    #[tokio::test]
    async fn test_commit_dispatches_and_publishes() {
        let fixture = fixture();
        let (client, mut queue) = Client::channel(8);
        let id = client.id();
        fixture.state.hub.register(client);
        fixture.state.hub.subscribe(id, "Post:create");

        let (status, body) = call(
            &fixture.state,
            "POST",
            "/internal/commits/Post/create",
            r#"{"id": 1, "title": "hello"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({"topic": "Post:create", "dispatched": 1, "delivered": 1}));

        let frame: Value = serde_json::from_str(queue.try_recv().unwrap().as_str()).unwrap();
        assert_eq!(frame["type"], "data");
        assert_eq!(frame["data"]["title"], "hello");

        fixture.state.jobs.shutdown().await;
        assert_eq!(fixture.state.jobs.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_bad_input() {
        let fixture = fixture();
        let (status, body) =
            call(&fixture.state, "POST", "/internal/commits/Post/upsert", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown operation: upsert");

        let (status, _) =
            call(&fixture.state, "POST", "/internal/commits/Post/create", "[1]").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_commit_null_record() {
        let fixture = fixture();
        let (status, body) =
            call(&fixture.state, "POST", "/internal/commits/Post/create", "null").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["dispatched"], 1);
        assert_eq!(body["delivered"], 0);
    }

    #[tokio::test]
    async fn test_reload_endpoint() {
        let fixture = fixture();
        let (status, body) = call(&fixture.state, "POST", "/internal/reload", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generation"], 2);

        std::fs::write(&fixture.path, "not json").unwrap();
        let (status, body) = call(&fixture.state, "POST", "/internal/reload", "").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("reload of"));
        assert_eq!(fixture.state.store.version().unwrap().generation, 2);
    }
}
