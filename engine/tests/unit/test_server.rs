//! HTTP front-end tests

mod support;

use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use bluegreen::models::deployment::{Deployment, DeploymentStatus};
use bluegreen::models::slot::Slot;
use bluegreen::server::serve::router;
use bluegreen::server::state::ServerState;

use support::{harness, Harness};

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.orchestrator.clone())))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = send(app(&h), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_services_listing() {
    let h = harness();

    let (status, body) = send(app(&h), get("/services")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(3));
    assert_eq!(body[0]["service"], "m1");
    assert_eq!(body[0]["primary"]["status"], "idle");

    let (status, body) = send(app(&h), get("/services/m9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("m9"));
}

#[tokio::test]
async fn test_deploy_is_accepted() {
    let h = harness();

    let (status, body) = send(
        app(&h),
        post("/deploy", json!({"service": "m1", "version": "v1", "slot": "secondary"})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: Deployment = serde_json::from_value(body).unwrap();
    assert_eq!(accepted.slot, Slot::Secondary);
    assert_eq!(accepted.status, DeploymentStatus::InProgress);

    let record = h.orchestrator.wait_for(accepted.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Success);

    let (status, body) = send(app(&h), get(&format!("/deployments/{}", accepted.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn test_deploy_errors() {
    let h = harness();

    let (status, body) = send(
        app(&h),
        post("/deploy", json!({"service": "m9", "version": "v1"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, body) = send(
        app(&h),
        post("/deploy", json!({"service": "m1", "version": "v1", "slot": "purple"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    assert!(h.orchestrator.list_deployments().is_empty());
}

#[tokio::test]
async fn test_traffic_errors() {
    let h = harness();

    let (status, body) = send(
        app(&h),
        post("/traffic", json!({"service": "m1", "primary": -10, "secondary": 110})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, body) = send(
        app(&h),
        post("/traffic", json!({"service": "m1", "primary": 60, "secondary": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn test_traffic_applies_weights() {
    let h = harness();
    h.activate("m1", "v1", Slot::Primary).await;

    let (status, body) = send(
        app(&h),
        post("/traffic", json!({"service": "m1", "primary": 100, "secondary": 0})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"primary": 100, "secondary": 0}));
}

#[tokio::test]
async fn test_recovery_errors() {
    let h = harness();

    let (status, _) = send(app(&h), post("/rollback/m1", Value::Null)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(app(&h), post("/restart/m1/purple", Value::Null)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(app(&h), post("/restart/m1/primary", Value::Null)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn test_deployment_lookup_errors() {
    let h = harness();

    let (status, body) = send(app(&h), get("/deployments/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, _) = send(
        app(&h),
        get("/deployments/3f2b8c1e-6a41-4b8e-9d7e-2f0c5a9b1d34"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(app(&h), get("/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_releases_without_catalog() {
    let h = harness();

    let (status, body) = send(app(&h), get("/releases")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "collaborator_unavailable");
}
