//! HTTP control surface.
//!
//! Worker, serving-layer and admin operations over JSON:
//! - POST /v1/requests, POST /v1/requests/dequeue, GET/DELETE /v1/requests/{id}
//! - POST /v1/requests/{id}/heartbeat, POST /v1/requests/{id}/complete
//! - POST /v1/payloads, GET /v1/payloads/{id}, POST /v1/payloads/{id}/access
//! - GET /v1/cache/stats, preload triggers, admin quota and queue gates
//! - GET /health, GET /metrics

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::payload::{PayloadEntry, PayloadRegistration, Tier};
use crate::cache::tier_manager::{EvictionReport, PreloadReport, TierUsage};
use crate::error::Error;
use crate::queue::request::{EnqueueRequest, QueueClass, RequestId, RequestItem};
use crate::service::{QueueStatus, ResourceManager};
use crate::telemetry::TenantUsage;
use crate::tenant::TenantQuota;

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<ResourceManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/requests", post(enqueue))
        .route("/v1/requests/dequeue", post(dequeue))
        .route("/v1/requests/{id}", get(request_status).delete(cancel))
        .route("/v1/requests/{id}/heartbeat", post(heartbeat))
        .route("/v1/requests/{id}/complete", post(complete))
        .route("/v1/payloads", post(register_payload))
        .route("/v1/payloads/{id}", get(payload))
        .route("/v1/payloads/{id}/access", post(access_payload))
        .route("/v1/payloads/{id}/pin", post(pin))
        .route("/v1/payloads/{id}/unpin", post(unpin))
        .route("/v1/models/{id}", delete(remove_model))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/evict", post(evict))
        .route("/v1/preload/interaction", post(preload_interaction))
        .route("/v1/preload/tenants/{id}", post(preload_tenant))
        .route("/admin/tenants/{id}/quota", put(set_quota).get(get_quota))
        .route("/admin/queues", get(queue_status))
        .route("/admin/queues/{class}/pause", post(pause_class))
        .route("/admin/queues/{class}/resume", post(resume_class))
        .route("/admin/usage", get(usage))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Errors ────────────────────────────────────────────────────────────────

/// Crate error rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ClaimConflict(_) | Error::Throttled(_) | Error::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidConfig(_) | Error::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_class(raw: &str) -> ApiResult<QueueClass> {
    raw.parse()
        .map_err(|_| ApiError(Error::NotFound(format!("queue class {raw}"))))
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub cache: BTreeMap<String, TierUsage>,
    pub queue: QueueStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub request_id: RequestId,
}

#[derive(Debug, Deserialize)]
pub struct DequeueRequest {
    pub worker_id: String,
    /// Class order to try; defaults to Hot, Warm, Cold.
    #[serde(default)]
    pub classes: Vec<QueueClass>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompletionReport {
    pub worker_id: String,
    pub success: bool,
    #[serde(default)]
    pub actual_cost: f64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub payload_id: String,
    pub served_from: Tier,
    pub hit: bool,
    pub size_bytes: usize,
}

#[derive(Debug, Deserialize)]
pub struct InteractionPreload {
    pub model_id: String,
    pub tenant_id: String,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<ResourceManager>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        cache: state.get_cache_stats(),
        queue: state.queue_status(),
    })
}

async fn metrics(State(state): State<Arc<ResourceManager>>) -> ApiResult<Response> {
    state.queue_depth();
    state.get_cache_stats();
    let body = state.metrics().encode().map_err(Error::from)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

async fn enqueue(
    State(state): State<Arc<ResourceManager>>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let request_id = state.enqueue(req)?;
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { request_id })))
}

async fn dequeue(
    State(state): State<Arc<ResourceManager>>,
    Json(req): Json<DequeueRequest>,
) -> Response {
    match state.dequeue(&req.worker_id, &req.classes) {
        Some(item) => Json(item).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn request_status(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RequestItem>> {
    Ok(Json(state.request_status(id)?))
}

async fn cancel(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.cancel_pending(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn heartbeat(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    state.heartbeat(id, &req.worker_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<Uuid>,
    Json(report): Json<CompletionReport>,
) -> ApiResult<Json<RequestItem>> {
    let item = state.report_completion(
        id,
        &report.worker_id,
        report.success,
        report.actual_cost,
        report.error_message,
    )?;
    Ok(Json(item))
}

async fn register_payload(
    State(state): State<Arc<ResourceManager>>,
    Json(reg): Json<PayloadRegistration>,
) -> StatusCode {
    if state.register_payload(reg) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

async fn payload(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PayloadEntry>> {
    Ok(Json(state.payload(&id)?))
}

async fn access_payload(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<String>,
    Json(req): Json<AccessRequest>,
) -> ApiResult<Json<AccessResponse>> {
    let request_id = req.request_id.unwrap_or_else(Uuid::new_v4);
    let outcome = state.access_payload(&id, &req.tenant_id, request_id).await?;
    Ok(Json(AccessResponse {
        payload_id: id,
        served_from: outcome.served_from,
        hit: outcome.hit,
        size_bytes: outcome.data.len(),
    }))
}

async fn pin(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let pins = state.cache().pin(&id)?;
    Ok(Json(json!({ "payload_id": id, "pins": pins })))
}

async fn unpin(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let pins = state.cache().unpin(&id)?;
    Ok(Json(json!({ "payload_id": id, "pins": pins })))
}

async fn remove_model(
    State(state): State<Arc<ResourceManager>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.cache().remove_model(&id).await;
    Json(json!({ "model_id": id, "removed": removed }))
}

async fn cache_stats(State(state): State<Arc<ResourceManager>>) -> Json<BTreeMap<String, TierUsage>> {
    Json(state.get_cache_stats())
}

async fn evict(State(state): State<Arc<ResourceManager>>) -> Json<EvictionReport> {
    Json(state.cache().run_eviction(Utc::now()).await)
}

async fn preload_interaction(
    State(state): State<Arc<ResourceManager>>,
    Json(req): Json<InteractionPreload>,
) -> ApiResult<Json<PreloadReport>> {
    let report = state
        .cache()
        .preload_interaction(&req.model_id, &req.tenant_id, Utc::now())
        .await?;
    Ok(Json(report))
}

async fn preload_tenant(
    State(state): State<Arc<ResourceManager>>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<PreloadReport>> {
    let report = state.cache().preload_tenant(&tenant_id, Utc::now()).await?;
    Ok(Json(report))
}

async fn set_quota(
    State(state): State<Arc<ResourceManager>>,
    Path(tenant_id): Path<String>,
    Json(quota): Json<TenantQuota>,
) -> StatusCode {
    info!(
        tenant_id = %tenant_id,
        tier = %quota.subscription_tier,
        max_concurrent = quota.max_concurrent_requests,
        max_queued = quota.max_queued_requests,
        "Tenant quota updated"
    );
    state.set_tenant_quota(&tenant_id, quota);
    StatusCode::NO_CONTENT
}

async fn get_quota(
    State(state): State<Arc<ResourceManager>>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<TenantQuota>> {
    Ok(Json(state.tenant_quota(&tenant_id)?))
}

async fn queue_status(State(state): State<Arc<ResourceManager>>) -> Json<QueueStatus> {
    Json(state.queue_status())
}

async fn pause_class(
    State(state): State<Arc<ResourceManager>>,
    Path(class): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let class = parse_class(&class)?;
    let moved = state.pause_queue_class(class);
    Ok(Json(json!({ "class": class, "paused": true, "moved": moved })))
}

async fn resume_class(
    State(state): State<Arc<ResourceManager>>,
    Path(class): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let class = parse_class(&class)?;
    let moved = state.resume_queue_class(class);
    Ok(Json(json!({ "class": class, "paused": state.scheduler().is_paused(class), "moved": moved })))
}

async fn usage(State(state): State<Arc<ResourceManager>>) -> Json<Vec<TenantUsage>> {
    Json(state.usage_rollups())
}
