//! The admin HTTP surface.
//!
//! Exposes the container, the scheduler, and the cache over the fixed
//! paths the rest of the platform expects: `/_bean`, `/_job`, `/_cache`,
//! and `DELETE /` for a graceful shutdown.

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};

use crate::{
    cache::{Cache, CacheValue},
    error::{Error, ErrorKind, Result},
    registry::Registry,
    scheduler::Scheduler,
    shutdown::Workload,
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::UnknownComponent | ErrorKind::ConditionNotMet => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Clone)]
pub struct AdminState {
    pub registry: Registry,
    pub scheduler: Scheduler,
    pub cache: Arc<dyn Cache>,
    pub work: Workload,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/_bean", get(beans))
        .route("/_job", get(jobs))
        .route("/_job/{name}", post(trigger_job).delete(delete_job))
        .route("/_job/{name}/restart", post(restart_job))
        .route("/_cache", get(cache_keys).delete(cache_delete_pattern))
        .route("/_cache/{key}", get(cache_get).delete(cache_delete))
        .route("/", delete(shutdown_process))
        .with_state(state)
}

/// Serve the admin surface until shutdown is requested.
pub async fn serve(addr: SocketAddr, state: AdminState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("admin surface listening on {addr}");
    let work = state.work.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { work.shutdown_requested().await })
        .await?;
    Ok(())
}

async fn beans(State(state): State<AdminState>) -> Json<Vec<String>> {
    Json(state.registry.labels())
}

async fn jobs(State(state): State<AdminState>) -> Json<BTreeMap<String, BTreeMap<String, String>>> {
    Json(state.scheduler.jobs())
}

async fn trigger_job(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.scheduler.trigger_first(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restart_job(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.scheduler.restart(&state.registry, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_job(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.scheduler.destroy(&state.registry, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn pattern_of(params: &HashMap<String, String>) -> &str {
    params.get("pattern").map(String::as_str).unwrap_or("*")
}

async fn cache_keys(
    State(state): State<AdminState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<String>> {
    Json(state.cache.keys(pattern_of(&params)).await)
}

async fn cache_get(State(state): State<AdminState>, Path(key): Path<String>) -> Response {
    match state.cache.get(&key, None).await.value {
        Some(value) => Json(value).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn cache_delete(State(state): State<AdminState>, Path(key): Path<String>) -> Json<CacheValue> {
    let prior = state.cache.delete(&key).await;
    Json(prior.unwrap_or(CacheValue::Null))
}

async fn cache_delete_pattern(
    State(state): State<AdminState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<usize> {
    let keys = state.cache.keys(pattern_of(&params)).await;
    let mut deleted = 0;
    for key in &keys {
        if state.cache.delete(key).await.is_some() {
            deleted += 1;
        }
    }
    Json(deleted)
}

async fn shutdown_process(State(state): State<AdminState>) -> StatusCode {
    log::info!("graceful shutdown requested over the admin surface");
    state.work.request_shutdown();
    StatusCode::ACCEPTED
}
