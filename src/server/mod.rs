//! HTTP endpoints for field clients.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /get/{tenant}` | every stored task and user |
//! | `POST /set/{tenant}` | apply a field update, answers `ok` |
//! | `GET /report/{tenant}/{project}` | render and mail a report |
//! | `POST /import/{tenant}` | reconcile the tenant's documents |
//! | `GET /projects/{tenant}` | list the tenant's documents |
//! | `POST /activity/{tenant}` | append an activity event |
//! | `GET /activity/{tenant}` | list activity events |
//! | `GET /health` | liveness |
//!
//! Requests are handled one at a time. The [`Service`] sits behind a single
//! async mutex, and each handler runs its blocking work on the blocking pool
//! while holding it.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::Error;
use crate::commands::{self, Service};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Mutex<Service>>,
}

impl AppState {
    pub fn new(service: Service) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
        }
    }
}

type JsonResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::TransientLock(_) | Error::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_error(error: Error) -> (StatusCode, Json<Value>) {
    (status_for(&error), Json(json!({ "error": error.to_string() })))
}

fn to_json<T: serde::Serialize>(value: &T) -> JsonResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| json_error(Error::Json(e)))
}

fn parse_body(body: &str) -> crate::Result<Value> {
    serde_json::from_str(body).map_err(|e| Error::Validation(vec![format!("invalid JSON: {}", e)]))
}

/// Run `f` on the blocking pool with exclusive access to the service.
async fn with_service<T, F>(state: &AppState, f: F) -> crate::Result<T>
where
    F: FnOnce(&mut Service) -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let mut service = state.service.clone().lock_owned().await;
    tokio::task::spawn_blocking(move || f(&mut service))
        .await
        .map_err(|e| Error::Other(format!("request worker failed: {}", e)))?
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/get/{tenant}", get(get_tenant))
        .route("/set/{tenant}", post(set_task))
        .route("/report/{tenant}/{project}", get(get_report))
        .route("/import/{tenant}", post(import_tenant))
        .route("/projects/{tenant}", get(get_projects))
        .route("/activity/{tenant}", post(add_activity).get(get_activity))
        .with_state(state)
}

/// Start the HTTP service
pub async fn start_server(service: Service, addr: &str) -> crate::Result<()> {
    let data_root = service.data_root().to_path_buf();
    let app = router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, data_root = %data_root.display(), "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Outbound read
async fn get_tenant(State(state): State<AppState>, Path(tenant): Path<String>) -> JsonResult {
    let dump = with_service(&state, move |s| s.dump(&tenant))
        .await
        .map_err(json_error)?;
    to_json(&dump)
}

/// Inbound update. Plain-text answers: `ok`, or the error text.
async fn set_task(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: String,
) -> (StatusCode, String) {
    let result = match parse_body(&body) {
        Ok(payload) => with_service(&state, move |s| s.update(&tenant, &payload)).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(_) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "rejected field update");
            (status_for(&e), e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    requested_by: Option<String>,
}

async fn get_report(
    State(state): State<AppState>,
    Path((tenant, project)): Path<(String, String)>,
    Query(query): Query<ReportQuery>,
) -> JsonResult {
    let result = with_service(&state, move |s| {
        s.report(&tenant, &project, query.requested_by.as_deref())
    })
    .await
    .map_err(json_error)?;
    to_json(&result)
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    user: Option<String>,
}

async fn import_tenant(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<ImportQuery>,
) -> JsonResult {
    let result = with_service(&state, move |s| s.import(&tenant, query.user.as_deref()))
        .await
        .map_err(json_error)?;
    to_json(&result)
}

async fn get_projects(State(state): State<AppState>, Path(tenant): Path<String>) -> JsonResult {
    let projects = with_service(&state, move |s| s.projects(&tenant))
        .await
        .map_err(json_error)?;
    let value: Value = serde_json::from_str(&commands::Output::to_json(&projects))
        .map_err(|e| json_error(Error::Json(e)))?;
    Ok(Json(value))
}

async fn add_activity(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: String,
) -> JsonResult {
    let event = parse_body(&body)
        .and_then(|payload| commands::parse_activity(&payload))
        .map_err(json_error)?;
    let recorded = with_service(&state, move |s| s.record_activity(&tenant, &event))
        .await
        .map_err(json_error)?;
    to_json(&recorded)
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    user_id: Option<i64>,
}

async fn get_activity(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> JsonResult {
    let list = with_service(&state, move |s| s.list_activity(&tenant, query.user_id))
        .await
        .map_err(json_error)?;
    to_json(&list)
}
