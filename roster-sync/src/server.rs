//! HTTP surface: JSON request endpoints and the server-sent event stream.
//!
//! ```text
//! GET    /health                 (open)        liveness + counts
//! GET    /data[?group=G]         x-api-key     committed snapshot
//! POST   /append, /add           x-api-key     add one record
//! POST   /update                 x-api-key     upsert one record / replace a group
//! DELETE /delete/:id             x-api-key     delete by id
//! GET    /events?apiKey=K        query key     text/event-stream of snapshots
//! ```
//!
//! Errors are always `{ "error": <message>, "kind": <stable kind> }`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use roster_core::{RecordFields, StoreError, Upsert};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::coordinator::{Applied, Coordinator, Mutation, SyncError};

/// Header carrying the shared secret on request endpoints.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Shared secret expected from every client
    pub api_key: String,
    /// Snapshots buffered per subscriber before it skips ahead
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            api_key: String::new(),
            broadcast_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Loopback config with a small broadcast buffer.
    pub fn for_testing(bind_addr: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            api_key: api_key.into(),
            broadcast_capacity: 8,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<Coordinator>,
    api_key: Arc<str>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            coordinator,
            api_key: api_key.into(),
        }
    }

    fn authorized(&self, provided: Option<&str>) -> bool {
        !self.api_key.is_empty() && provided == Some(&*self.api_key)
    }
}

/// Error response with a stable kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", "Unauthorized")
    }

    fn invalid_shape(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidShape", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match err {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Exhausted(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(e) => e.into(),
            SyncError::Persist(e) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, e.kind(), e.to_string())
            }
            SyncError::Aborted => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal",
                "mutation could not be completed",
            ),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_shape(rejection.body_text())
    }
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/data", get(get_data))
        .route("/append", post(add_record))
        .route("/add", post(add_record))
        .route("/update", post(update_records))
        .route("/delete/:id", delete(delete_record))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .merge(protected)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    coordinator: Arc<Coordinator>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Sync server listening on {}", listener.local_addr()?);
        let app = router(AppState::new(self.coordinator, self.config.api_key));
        axum::serve(listener, app).await
    }
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if !state.authorized(provided) {
        log::debug!("Rejected {} {}: bad API key", request.method(), request.uri().path());
        return Err(ApiError::unauthorized());
    }
    Ok(next.run(request).await)
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Value> {
    let hub = state.coordinator.hub().stats();
    let commits = state.coordinator.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": hub.active_subscribers,
        "records": state.coordinator.snapshot().len(),
        "commits": commits.committed,
    }))
}

#[derive(Debug, Deserialize)]
struct DataQuery {
    group: Option<String>,
}

/// GET /data[?group=G]
async fn get_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Response, ApiError> {
    match query.group {
        Some(group) => Ok(Json(state.coordinator.filter(&group)?).into_response()),
        None => {
            let encoded = state.coordinator.snapshot_json();
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                encoded.to_string(),
            )
                .into_response())
        }
    }
}

/// POST /append, POST /add
async fn add_record(
    State(state): State<AppState>,
    body: Result<Json<RecordFields>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(fields) = body?;
    let group = fields.group_name()?.to_string();

    match state.coordinator.submit(Mutation::Add { group, fields }).await? {
        Applied::Added(item) => Ok(Json(json!({ "success": true, "item": item }))),
        other => Err(unexpected(other)),
    }
}

/// POST /update
///
/// `{ "group": G, "items": [...] }` replaces group G; anything else is a
/// single-record upsert by id.
async fn update_records(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    if !body.is_object() {
        return Err(ApiError::invalid_shape("expected a JSON object"));
    }

    let mutation = if let Some(items) = body.get("items") {
        let group = match body.get("group") {
            Some(Value::String(group)) => group.clone(),
            Some(other) => return Err(StoreError::InvalidGroup(other.to_string()).into()),
            None => return Err(StoreError::InvalidGroup(String::new()).into()),
        };
        let items = items
            .as_array()
            .cloned()
            .ok_or_else(|| ApiError::invalid_shape("`items` must be an array"))?;
        Mutation::ReplaceGroup { group, items }
    } else {
        let fields: RecordFields =
            serde_json::from_value(body).map_err(|e| ApiError::invalid_shape(e.to_string()))?;
        Mutation::Update(fields)
    };

    match state.coordinator.submit(mutation).await? {
        Applied::Updated(Upsert::Updated(item)) => {
            Ok(Json(json!({ "success": true, "item": item, "inserted": false })))
        }
        Applied::Updated(Upsert::Inserted(item)) => {
            Ok(Json(json!({ "success": true, "item": item, "inserted": true })))
        }
        Applied::Replaced { group, records } => {
            Ok(Json(json!({ "success": true, "group": group, "items": records })))
        }
        other => Err(unexpected(other)),
    }
}

/// DELETE /delete/:id
async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id: i64 = id.trim().parse().map_err(|_| {
        ApiError::new(StatusCode::BAD_REQUEST, "InvalidId", format!("invalid id {id:?}"))
    })?;

    match state.coordinator.submit(Mutation::Delete(id)).await? {
        Applied::Deleted(deleted) => Ok(Json(json!({ "success": true, "deleted": deleted }))),
        other => Err(unexpected(other)),
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

/// GET /events?apiKey=K
///
/// The key travels in the query string because browser `EventSource`
/// cannot set headers.
async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if !state.authorized(query.api_key.as_deref()) {
        return Err(ApiError::unauthorized());
    }

    let label = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("events")
        .to_string();
    let subscription = state.coordinator.subscribe(label);
    log::info!(
        "Event stream opened ({} active)",
        state.coordinator.hub().subscriber_count()
    );

    let stream = subscription
        .into_stream()
        .map(|encoded| Ok(Event::default().data(&*encoded)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn unexpected(applied: Applied) -> ApiError {
    log::error!("Mutation produced an unexpected outcome: {applied:?}");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal",
        "unexpected mutation outcome",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use roster_core::SchemaConfig;

    async fn state(key: &str) -> AppState {
        let coordinator =
            Coordinator::bootstrap(SchemaConfig::default(), Arc::new(MemoryStore::new()), 8)
                .await
                .unwrap();
        AppState::new(coordinator, key)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.broadcast_capacity, 64);
        assert!(config.api_key.is_empty());

        let config = ServerConfig::for_testing("127.0.0.1:0", "k");
        assert_eq!(config.bind_addr, "127.0.0.1:0");
        assert_eq!(config.broadcast_capacity, 8);
    }

    #[tokio::test]
    async fn test_authorized() {
        let s = state("secret").await;
        assert!(s.authorized(Some("secret")));
        assert!(!s.authorized(Some("nope")));
        assert!(!s.authorized(None));
    }

    #[tokio::test]
    async fn test_empty_key_never_authorizes() {
        let s = state("").await;
        assert!(!s.authorized(Some("")));
        assert!(!s.authorized(None));
    }

    #[test]
    fn test_error_status_mapping() {
        let not_found: ApiError = StoreError::NotFound(3).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.kind, "NotFound");

        let group: ApiError = StoreError::InvalidGroup("x".to_string()).into();
        assert_eq!(group.status, StatusCode::BAD_REQUEST);

        let exhausted: ApiError = StoreError::Exhausted("id").into();
        assert_eq!(exhausted.status, StatusCode::CONFLICT);
        assert_eq!(exhausted.kind, "Exhausted");

        let persist: ApiError = SyncError::Persist(crate::persist::PersistError::Unavailable).into();
        assert_eq!(persist.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(persist.kind, "PersistError");
    }
}
