//! Integration tests for the run trigger and worker lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::Router;
use connector_core::dispatch_cache::DispatchCache;
use connector_worker::error::{AppError, WorkflowError};
use connector_worker::registry::RunStatus;
use connector_worker::worker::ConnectorWorker;
use serde_json::json;

use common::{
    body_json, build_test_app, check_request, get, post_json, workflows_with_cache, FakeRuntime,
    MemoryStore, CONNECTOR, IMAGE,
};

fn trigger(operation: &str) -> serde_json::Value {
    json!({
        "owner_id": "users/alice",
        "connector_id": CONNECTOR,
        "image": IMAGE,
        "operation": operation,
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_version_and_load() {
    let (_dir, _worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["in_flight"], 0);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (_dir, _worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = get(app, "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_trigger_is_accepted() {
    let (_dir, worker, app) = build_test_app(
        MemoryStore::seeded(),
        FakeRuntime::exiting(0).running_for(Duration::from_millis(50)),
    );
    let response = post_json(
        app,
        "/api/v1/runs",
        json!({
            "owner_id": "users/alice",
            "connector_id": format!("connectors/{CONNECTOR}"),
            "image": IMAGE,
            "operation": "check",
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["container_name"], format!("{CONNECTOR}.check"));
    assert_eq!(json["data"]["operation"], "check");

    assert!(worker.shutdown(Duration::from_secs(5)).await);
    assert_eq!(worker.in_flight(), 0);
}

#[tokio::test]
async fn malformed_connector_id_is_rejected() {
    let (_dir, worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = post_json(
        app,
        "/api/v1/runs",
        json!({
            "owner_id": "users/alice",
            "connector_id": "not-a-uuid",
            "image": IMAGE,
            "operation": "check",
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_IDENTIFIER");
    assert_eq!(worker.in_flight(), 0);
}

#[tokio::test]
async fn write_without_catalog_is_rejected() {
    let (_dir, _worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = post_json(
        app,
        "/api/v1/runs",
        json!({
            "owner_id": "users/alice",
            "connector_id": CONNECTOR,
            "image": IMAGE,
            "operation": "write",
            "messages": [{"id": 1}],
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn invalid_container_name_is_rejected() {
    let (_dir, _worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = post_json(
        app,
        "/api/v1/runs",
        json!({
            "owner_id": "users/alice",
            "connector_id": CONNECTOR,
            "image": IMAGE,
            "operation": "check",
            "container_name": "../escape",
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// GET /api/v1/runs/{container_name}
// ---------------------------------------------------------------------------

/// Poll the status route until the run leaves `running`.
async fn wait_for_terminal(app: &Router, container_name: &str) -> serde_json::Value {
    for _ in 0..100 {
        let response = get(app.clone(), &format!("/api/v1/runs/{container_name}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        if json["data"]["status"] != "running" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {container_name} never finished");
}

#[tokio::test]
async fn completed_run_status_is_queryable() {
    let (_dir, worker, app) = build_test_app(
        MemoryStore::seeded(),
        FakeRuntime::exiting(1).running_for(Duration::from_millis(50)),
    );
    let name = format!("{CONNECTOR}.check");

    let response = post_json(app.clone(), "/api/v1/runs", trigger("check")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = wait_for_terminal(&app, &name).await;
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["report"]["container_name"], name);
    assert_eq!(json["data"]["report"]["outcome"], "ERROR");
    assert_eq!(json["data"]["report"]["state"], "ERROR");
    assert_eq!(json["data"]["report"]["dispatched"], true);

    assert!(worker.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn failed_run_status_carries_error_kind() {
    // No configuration stored for the connector.
    let (_dir, worker, app) = build_test_app(MemoryStore::default(), FakeRuntime::exiting(0));
    let name = format!("{CONNECTOR}.healthcheck");

    let response = post_json(app.clone(), "/api/v1/runs", trigger("healthcheck")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = wait_for_terminal(&app, &name).await;
    assert_eq!(json["data"]["status"], "failed");
    assert_eq!(json["data"]["operation"], "healthcheck");
    assert_eq!(json["data"]["kind"], "StoreError");
    assert!(json["data"]["error"].is_string());

    assert!(worker.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn unknown_run_returns_404() {
    let (_dir, _worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = get(app, &format!("/api/v1/runs/{CONNECTOR}.check")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn finished_statuses_are_trimmed_by_eviction() {
    let (_dir, worker, _app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let name = check_request().container_name;

    worker.submit(check_request()).unwrap().await.unwrap().unwrap();
    assert!(worker.status(&name).is_some());

    assert_eq!(worker.runs().evict_older_than(Duration::ZERO), 1);
    assert!(worker.status(&name).is_none());
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs/{connector_id}/cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_reports_removed_files() {
    let (_dir, _worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = post_json(
        app,
        &format!("/api/v1/runs/{CONNECTOR}/cleanup"),
        json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["removed"], 0);
}

#[tokio::test]
async fn cleanup_rejects_malformed_id() {
    let (_dir, _worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    let response = post_json(app, "/api/v1/runs/nope/cleanup", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Worker lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_cancels_in_flight_runs() {
    let (_dir, worker, _app) = build_test_app(
        MemoryStore::seeded(),
        FakeRuntime::exiting(0).running_for(Duration::from_secs(30)),
    );

    let handle = worker.submit(check_request()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(worker.in_flight(), 1);

    assert!(worker.shutdown(Duration::from_secs(5)).await);
    assert_matches!(handle.await.unwrap(), Err(WorkflowError::Cancelled { .. }));
    assert!(worker.cache().is_empty());
    assert_matches!(
        worker.status(&check_request().container_name),
        Some(RunStatus::Failed { kind: "CancelledError", .. })
    );

    assert_matches!(
        worker.submit(check_request()),
        Err(AppError::Unavailable(_))
    );
}

#[tokio::test]
async fn eviction_tick_drops_statuses_older_than_dispatch_ttl() {
    let (_dir, workflows) = workflows_with_cache(
        Arc::new(MemoryStore::seeded()),
        Arc::new(FakeRuntime::exiting(0)),
        Duration::from_secs(5),
        DispatchCache::new(Duration::from_millis(20)),
    );
    let worker = ConnectorWorker::new(workflows);
    let name = check_request().container_name;

    worker.submit(check_request()).unwrap().await.unwrap().unwrap();
    assert!(worker.status(&name).is_some());

    let _eviction = worker.spawn_cache_eviction(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(worker.status(&name).is_none());

    assert!(worker.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn health_reports_draining_after_shutdown() {
    let (_dir, worker, app) = build_test_app(MemoryStore::seeded(), FakeRuntime::exiting(0));
    worker.shutdown(Duration::from_secs(1)).await;

    let json = body_json(get(app, "/health").await).await;
    assert_eq!(json["status"], "draining");
}
