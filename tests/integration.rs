use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use courier_dispatch::api::rest::router;
use courier_dispatch::clock::{ManualClock, SystemClock};
use courier_dispatch::engine::events::{run_event_processor, OrderEventProcessor};
use courier_dispatch::engine::AssignmentEngine;
use courier_dispatch::models::order::OrderEvent;
use courier_dispatch::observability::metrics::Metrics;
use courier_dispatch::ratelimit::{RateLimitConfig, RateLimiter};
use courier_dispatch::state::AppState;
use courier_dispatch::storage::MemoryRepository;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    events_rx: mpsc::Receiver<OrderEvent>,
}

fn setup() -> TestApp {
    setup_with_limits(RateLimitConfig {
        rate: 1.0,
        burst: 10_000.0,
        idle_ttl: Duration::from_secs(600),
    })
}

/// The limiter runs on a frozen clock, so buckets never refill mid-test.
fn setup_with_limits(limits: RateLimitConfig) -> TestApp {
    let metrics = Metrics::new();
    let engine = Arc::new(AssignmentEngine::new(
        Arc::new(MemoryRepository::new()),
        Arc::new(SystemClock),
        metrics.clone(),
        64,
    ));
    let limiter = RateLimiter::new(limits, Arc::new(ManualClock::new()));
    let (state, events_rx) = AppState::new(engine, limiter, metrics, 64);
    let state = Arc::new(state);

    TestApp {
        app: router(state.clone()),
        state,
        events_rx,
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn from_client(uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_courier(app: &Router, name: &str, transport: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/couriers",
            json!({ "name": name, "phone": "+49 30 1234567", "transport_type": transport }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn health_reports_counts() {
    let TestApp { app, .. } = setup();
    create_courier(&app, "Alice", "foot").await;

    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["couriers"], 1);
    assert_eq!(body["deliveries"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let TestApp { app, .. } = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("rate_limited_total"));
    assert!(body.contains("order_events_in_queue"));
}

#[tokio::test]
async fn create_courier_starts_available() {
    let TestApp { app, .. } = setup();

    let body = create_courier(&app, "Alice", "scooter").await;

    assert_eq!(body["name"], "Alice");
    assert_eq!(body["status"], "available");
    assert_eq!(body["transport_type"], "scooter");
    assert!(!body["id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn create_courier_blank_name_returns_400() {
    let TestApp { app, .. } = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/couriers",
            json!({ "name": "  ", "phone": "+49 30 1234567", "transport_type": "car" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_courier_unknown_transport_is_rejected() {
    let TestApp { app, .. } = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/couriers",
            json!({ "name": "Bob", "phone": "+49 30 1234567", "transport_type": "bicycle" }),
        ))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn assign_and_unassign_flow() {
    let TestApp { app, .. } = setup();
    let courier = create_courier(&app, "Dan", "car").await;
    let courier_id = courier["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(post_request("/orders/order-1/assign"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let assigned = body_json(res).await;
    assert_eq!(assigned["courier_id"], courier_id);
    assert_eq!(assigned["order_id"], "order-1");
    assert_eq!(assigned["transport_type"], "car");

    let res = app.clone().oneshot(get_request("/couriers")).await.unwrap();
    let couriers = body_json(res).await;
    assert_eq!(couriers[0]["status"], "busy");

    let res = app
        .clone()
        .oneshot(post_request("/orders/order-2/assign"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app.clone().oneshot(get_request("/deliveries")).await.unwrap();
    let deliveries = body_json(res).await;
    assert_eq!(deliveries.as_array().unwrap().len(), 1);
    assert_eq!(deliveries[0]["order_id"], "order-1");

    let res = app
        .clone()
        .oneshot(post_request("/orders/order-1/unassign"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let released = body_json(res).await;
    assert_eq!(released["courier_id"], courier_id);
    assert_eq!(released["status"], "available");

    let res = app
        .oneshot(post_request("/orders/order-1/unassign"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn assigning_twice_is_a_conflict() {
    let TestApp { app, .. } = setup();
    create_courier(&app, "Dan", "car").await;
    create_courier(&app, "Eve", "foot").await;

    let first = app
        .clone()
        .oneshot(post_request("/orders/order-1/assign"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(post_request("/orders/order-1/assign"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn paused_courier_is_not_assigned() {
    let TestApp { app, .. } = setup();
    let courier = create_courier(&app, "Eve", "foot").await;
    let id = courier["id"].as_str().unwrap();

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/couriers/{id}/status"),
            json!({ "status": "paused" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "paused");

    let res = app
        .oneshot(post_request("/orders/order-1/assign"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn courier_status_changes_are_guarded() {
    let TestApp { app, .. } = setup();
    let courier = create_courier(&app, "Eve", "foot").await;
    let id = courier["id"].as_str().unwrap();

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/couriers/{id}/status"),
            json!({ "status": "busy" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    app.clone()
        .oneshot(post_request("/orders/order-1/assign"))
        .await
        .unwrap();
    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/couriers/{id}/status"),
            json!({ "status": "paused" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .oneshot(json_request(
            "PATCH",
            "/couriers/00000000-0000-0000-0000-000000000000/status",
            json!({ "status": "paused" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_events_are_processed_asynchronously() {
    let TestApp {
        app,
        state,
        events_rx,
    } = setup();
    create_courier(&app, "Dan", "car").await;

    let processor = Arc::new(OrderEventProcessor::new(
        state.dispatcher.clone(),
        None,
        state.metrics.clone(),
    ));
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(run_event_processor(processor, events_rx, shutdown.clone()));

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/events/orders",
            json!({ "order_id": "order-7", "status": "CREATED" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let mut deliveries = Value::Null;
    for _ in 0..100 {
        let res = app.clone().oneshot(get_request("/deliveries")).await.unwrap();
        deliveries = body_json(res).await;
        if !deliveries.as_array().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(deliveries[0]["order_id"], "order-7");

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn accepted_order_event_is_queued() {
    let TestApp {
        app,
        state,
        mut events_rx,
    } = setup();

    let res = app
        .oneshot(json_request(
            "POST",
            "/events/orders",
            json!({ "order_id": "order-9", "status": "completed" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let queued = events_rx.try_recv().unwrap();
    assert_eq!(queued.order_id, "order-9");
    assert_eq!(queued.status, "completed");
    assert_eq!(state.metrics.order_events_in_queue.get(), 1);
}

#[tokio::test]
async fn order_event_after_processor_exit_is_an_error() {
    let TestApp { app, events_rx, .. } = setup();
    drop(events_rx);

    let res = app
        .oneshot(json_request(
            "POST",
            "/events/orders",
            json!({ "order_id": "order-9", "status": "created" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn order_event_without_id_returns_400() {
    let TestApp { app, .. } = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/events/orders",
            json!({ "order_id": " ", "status": "created" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clients_over_their_burst_get_429() {
    let TestApp { app, state, .. } = setup_with_limits(RateLimitConfig {
        rate: 1.0,
        burst: 2.0,
        idle_ttl: Duration::from_secs(600),
    });

    for _ in 0..2 {
        let res = app
            .clone()
            .oneshot(from_client("/couriers", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let denied = app
        .clone()
        .oneshot(from_client("/couriers", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(denied).await["error"], "too many requests");

    let other = app
        .clone()
        .oneshot(from_client("/couriers", "10.0.0.2, 172.16.0.1"))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    let health = app
        .oneshot(from_client("/health", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    assert_eq!(state.metrics.rate_limited_total.get(), 1);
}
