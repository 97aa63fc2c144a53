use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use polaris_core::{Registry, RegistryConfig, time::SystemClock};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> Router {
    let registry = Arc::new(Registry::new(
        RegistryConfig::default(),
        Arc::new(SystemClock),
    ));
    let handle = PrometheusBuilder::new().build_recorder().handle();
    polaris_server::app(registry, handle)
}

fn put_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_empty(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn delete(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn register_then_query_returns_instance() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(put_json(
            "/apps/orders/i1",
            json!({ "address": "10.0.0.1:8080" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(get("/apps/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let instances = body_json(response).await;
    assert_eq!(instances.as_array().unwrap().len(), 1);
    assert_eq!(instances[0]["instance_id"], "i1");
    assert_eq!(instances[0]["status"], "UP");
}

#[tokio::test]
async fn heartbeat_is_empty_body_put() {
    let app = test_app();
    app.clone()
        .oneshot(put_json(
            "/apps/orders/i1",
            json!({ "address": "10.0.0.1:8080" }),
        ))
        .await
        .unwrap();

    let response = app.oneshot(put_empty("/apps/orders/i1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn heartbeat_for_unknown_lease_is_404() {
    let app = test_app();
    let response = app.oneshot(put_empty("/apps/ghost/i9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_registration_is_400() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(put_json("/apps/orders/i1", json!({ "address": "" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let garbage = Request::builder()
        .method(Method::PUT)
        .uri("/apps/orders/i1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(garbage).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_removes_instance() {
    let app = test_app();
    app.clone()
        .oneshot(put_json(
            "/apps/orders/i1",
            json!({ "address": "10.0.0.1:8080" }),
        ))
        .await
        .unwrap();

    let response = app.clone().oneshot(delete("/apps/orders/i1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/apps/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(delete("/apps/orders/i1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reregistration_replaces_entry() {
    let app = test_app();
    for _ in 0..3 {
        app.clone()
            .oneshot(put_json(
                "/apps/orders/i1",
                json!({ "address": "10.0.0.1:8080" }),
            ))
            .await
            .unwrap();
    }

    let response = app.oneshot(get("/apps/orders")).await.unwrap();
    let instances = body_json(response).await;
    assert_eq!(instances.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn query_all_maps_service_names_to_instances() {
    let app = test_app();
    app.clone()
        .oneshot(put_json(
            "/apps/orders/i1",
            json!({ "address": "10.0.0.1:8080" }),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(put_json(
            "/apps/billing/i1",
            json!({ "address": "10.0.0.2:8080" }),
        ))
        .await
        .unwrap();

    let response = app.oneshot(get("/apps")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["orders"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["billing"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn status_override_is_visible_in_queries() {
    let app = test_app();
    app.clone()
        .oneshot(put_json(
            "/apps/orders/i1",
            json!({ "address": "10.0.0.1:8080" }),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(put_json(
            "/apps/orders/i1/status",
            json!({ "status": "OUT_OF_SERVICE" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/apps/orders")).await.unwrap();
    let instances = body_json(response).await;
    assert_eq!(instances[0]["status"], "OUT_OF_SERVICE");
}

#[tokio::test]
async fn health_reports_up() {
    let app = test_app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "UP");
}

#[tokio::test]
async fn status_endpoint_reports_registry_overview() {
    let app = test_app();
    app.clone()
        .oneshot(put_json(
            "/apps/orders/i1",
            json!({ "address": "10.0.0.1:8080" }),
        ))
        .await
        .unwrap();

    let response = app.oneshot(get("/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let overview = body_json(response).await;
    assert_eq!(overview["services"], 1);
    assert_eq!(overview["instances"], 1);
    assert_eq!(overview["state"], "NORMAL");
}

#[tokio::test]
async fn registration_accepts_metadata_and_lease_override() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(put_json(
            "/apps/orders/i1",
            json!({
                "address": "10.0.0.1:8080",
                "status": "STARTING",
                "metadata": { "zone": "eu-1" },
                "lease": { "duration_secs": 10, "eviction_threshold_secs": 30 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(get("/apps/orders")).await.unwrap();
    let instances = body_json(response).await;
    assert_eq!(instances[0]["status"], "STARTING");
    assert_eq!(instances[0]["metadata"]["zone"], "eu-1");
}
