//! End-to-end tests through the resource manager and the HTTP router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use payload_tier::blob::BlobLocation;
use payload_tier::cache::payload::{PayloadRegistration, Tier};
use payload_tier::config::Config;
use payload_tier::queue::request::{EnqueueRequest, OperationType, QueueClass, RequestStatus};
use payload_tier::server::build_router;
use payload_tier::tenant::{SubscriptionTier, TenantQuota};
use payload_tier::{Error, ResourceManager};

fn manager() -> Arc<ResourceManager> {
    let rm = ResourceManager::in_memory(Config::default()).unwrap();
    rm.set_tenant_quota(
        "acme",
        TenantQuota::new("acme", SubscriptionTier::Enterprise, 4, 4),
    );
    rm.set_tenant_quota(
        "hobby",
        TenantQuota::new("hobby", SubscriptionTier::Free, 1, 1),
    );
    Arc::new(rm)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[test]
fn test_request_lifecycle_through_manager() {
    let rm = manager();
    let hot = rm
        .enqueue(
            EnqueueRequest::new("acme", "alice", OperationType::Search)
                .with_input_size(500)
                .interactive(true),
        )
        .unwrap();
    let warm = rm
        .enqueue(EnqueueRequest::new("hobby", "bob", OperationType::Ingestion).with_input_size(50_000))
        .unwrap();

    assert_eq!(rm.request_item(hot).unwrap().priority, 100);
    assert_eq!(rm.request_item(hot).unwrap().queue_class, QueueClass::Hot);
    assert_eq!(rm.request_item(warm).unwrap().priority, 50);
    assert_eq!(rm.request_item(warm).unwrap().queue_class, QueueClass::Warm);

    // Free tenant is at its limit.
    assert!(matches!(
        rm.enqueue(EnqueueRequest::new("hobby", "bob", OperationType::Search)),
        Err(Error::QuotaExceeded { .. })
    ));

    let first = rm.dequeue("w1", &[]).unwrap();
    assert_eq!(first.id, hot);
    rm.heartbeat(hot, "w1").unwrap();
    assert!(rm.heartbeat(hot, "w2").is_err());

    assert!(matches!(
        rm.report_completion(hot, "w2", true, 1.25, None),
        Err(Error::InvalidTransition { .. })
    ));
    let done = rm.report_completion(hot, "w1", true, 1.25, None).unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert!(rm.report_completion(hot, "w1", true, 1.25, None).is_err());

    rm.cancel_pending(warm).unwrap();
    assert_eq!(rm.request_item(warm).unwrap().status, RequestStatus::Failed);
    assert!(rm.dequeue("w1", &[]).is_none());
    assert!(rm
        .enqueue(EnqueueRequest::new("hobby", "bob", OperationType::Search))
        .is_ok());
}

#[tokio::test]
async fn test_http_enqueue_dequeue_complete() {
    let app = build_router(manager());

    let (status, body) = call(
        &app,
        "POST",
        "/v1/requests",
        Some(json!({
            "tenant_id": "acme",
            "user_id": "alice",
            "operation_type": "inference",
            "interactive": true,
            "input_size": 2000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["request_id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "GET", &format!("/v1/requests/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    let (status, body) = call(
        &app,
        "POST",
        "/v1/requests/dequeue",
        Some(json!({ "worker_id": "w1", "classes": ["hot", "warm"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());

    let (status, _) = call(
        &app,
        "POST",
        "/v1/requests/dequeue",
        Some(json!({ "worker_id": "w1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/requests/{id}/heartbeat"),
        Some(json!({ "worker_id": "w1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/requests/{id}/complete"),
        Some(json!({ "worker_id": "w2", "success": true, "actual_cost": 3.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/v1/requests/{id}/complete"),
        Some(json!({ "worker_id": "w1", "success": true, "actual_cost": 3.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let (status, body) = call(&app, "GET", "/admin/usage", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["tenant_id"], "acme");
}

#[tokio::test]
async fn test_http_error_statuses() {
    let app = build_router(manager());

    let (status, body) = call(
        &app,
        "POST",
        "/v1/requests",
        Some(json!({ "tenant_id": "ghost", "user_id": "u", "operation_type": "search" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());

    let enqueue = json!({ "tenant_id": "hobby", "user_id": "u", "operation_type": "search" });
    let (status, _) = call(&app, "POST", "/v1/requests", Some(enqueue.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = call(&app, "POST", "/v1/requests", Some(enqueue)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = call(&app, "GET", &format!("/v1/requests/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "POST", "/admin/queues/lukewarm/pause", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http_admin_pause_reports_throttled() {
    let rm = manager();
    let app = build_router(rm.clone());

    let id = rm
        .enqueue(EnqueueRequest::new("hobby", "u", OperationType::Ingestion).with_input_size(50_000))
        .unwrap();

    let (status, body) = call(&app, "POST", "/admin/queues/warm/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["moved"], 1);

    let (status, _) = call(&app, "GET", &format!("/v1/requests/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app, "GET", "/admin/queues", None).await;
    assert_eq!(body["throttled"], 1);
    assert_eq!(body["paused"], json!(["warm"]));

    let (status, body) = call(&app, "POST", "/admin/queues/warm/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paused"], false);

    let (status, body) = call(&app, "GET", &format!("/v1/requests/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn test_http_payload_access_and_stats() {
    let rm = manager();
    let app = build_router(rm.clone());

    rm.register_payload(PayloadRegistration {
        id: "emb/1".to_string(),
        owner_model_id: "emb".to_string(),
        layer_index: None,
        size_bytes: 0,
        blob_location: BlobLocation::new("mem:missing"),
    });
    let (status, _) = call(
        &app,
        "POST",
        "/v1/payloads/emb%2F1/access",
        Some(json!({ "tenant_id": "acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rm.cache().tier_of("emb/1"), Some(Tier::Cold));

    let (status, _) = call(
        &app,
        "POST",
        "/v1/payloads",
        Some(json!({
            "id": "layer-0",
            "owner_model_id": "tiny",
            "layer_index": 0,
            "size_bytes": 0,
            "blob_location": "mem:missing-too"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(&app, "POST", "/v1/payloads/layer-0/pin", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pins"], 1);

    let (status, body) = call(&app, "GET", "/v1/cache/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cold"]["entry_count"], 2);
    assert_eq!(body["memory"]["entry_count"], 0);

    let (status, body) = call(&app, "DELETE", "/v1/models/tiny", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let tiers = Config::default().tiers;
    assert_eq!(body["cache"]["memory"]["capacity_bytes"], tiers.memory_capacity_bytes);
    assert_eq!(body["cache"]["ssd"]["capacity_bytes"], tiers.ssd_capacity_bytes);
    assert!(body["cache"]["cold"]["capacity_bytes"].is_null());

    let (status, _) = call(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}
