//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use service::{BusSettings, InMemoryEventPublisher, InMemoryNotifications};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    publisher: InMemoryEventPublisher,
    notifications: InMemoryNotifications,
}

fn setup() -> TestApp {
    let store = InMemoryStore::new();
    let publisher = InMemoryEventPublisher::new();
    let notifications = InMemoryNotifications::new();
    let state = api::create_state(
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(publisher.clone()),
        Arc::new(notifications.clone()),
        &BusSettings::default(),
    )
    .unwrap();

    TestApp {
        app: api::create_app(state, get_metrics_handle()),
        publisher,
        notifications,
    }
}

impl TestApp {
    async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = self
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn add_batch(&self, reference: &str, sku: &str, qty: u32, eta: Option<&str>) {
        let (status, body) = self
            .post(
                "/add_batch",
                serde_json::json!({ "ref": reference, "sku": sku, "qty": qty, "eta": eta }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, b"OK");
    }

    async fn allocate(&self, order_id: &str, sku: &str, qty: u32) -> (StatusCode, serde_json::Value) {
        let (status, body) = self
            .post(
                "/allocate",
                serde_json::json!({ "orderid": order_id, "sku": sku, "qty": qty }),
            )
            .await;
        (status, serde_json::from_slice(&body).unwrap())
    }
}

#[tokio::test]
async fn test_health_check() {
    let t = setup();

    let (status, body) = t.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_allocate_returns_preferred_batch() {
    let t = setup();
    t.add_batch("later", "ELEGANT-LAMP", 100, Some("2025-01-02"))
        .await;
    t.add_batch("earliest", "ELEGANT-LAMP", 100, Some("2025-01-01"))
        .await;
    t.add_batch("other", "OTHER-SKU", 100, None).await;

    let (status, json) = t.allocate("order-1", "ELEGANT-LAMP", 3).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["batchref"], "earliest");
    assert_eq!(t.publisher.published_on("line_allocated").len(), 1);
}

#[tokio::test]
async fn test_allocate_unknown_sku_is_bad_request() {
    let t = setup();

    let (status, json) = t.allocate("order-1", "UNKNOWN-SKU", 1).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid sku UNKNOWN-SKU");
}

#[tokio::test]
async fn test_allocate_out_of_stock_is_bad_request() {
    let t = setup();
    t.add_batch("b1", "SMALL-TABLE", 5, None).await;

    let (status, json) = t.allocate("order-1", "SMALL-TABLE", 10).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Out of stock for sku SMALL-TABLE");
    assert_eq!(t.notifications.sent_to("stock@made.com").len(), 1);
}

#[tokio::test]
async fn test_add_batch_rejects_duplicate_reference() {
    let t = setup();
    t.add_batch("b1", "LAMP", 5, None).await;

    let (status, body) = t
        .post(
            "/add_batch",
            serde_json::json!({ "ref": "b1", "sku": "LAMP", "qty": 5 }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("b1"));
}

#[tokio::test]
async fn test_add_batch_with_malformed_body_is_rejected() {
    let t = setup();

    let (status, _) = t
        .post("/add_batch", serde_json::json!({ "ref": "b1", "qty": -1 }))
        .await;

    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_change_batch_quantity_reallocates() {
    let t = setup();
    t.add_batch("batch1", "INDIFFERENT-TABLE", 50, None).await;
    t.add_batch("batch2", "INDIFFERENT-TABLE", 50, Some("2025-03-01"))
        .await;
    t.allocate("order1", "INDIFFERENT-TABLE", 20).await;
    t.allocate("order2", "INDIFFERENT-TABLE", 20).await;

    let (status, body) = t
        .post(
            "/change_batch_quantity",
            serde_json::json!({ "ref": "batch1", "qty": 25 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");

    let (status, body) = t.get("/allocations/order2").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json,
        serde_json::json!([{ "sku": "INDIFFERENT-TABLE", "batchref": "batch2" }])
    );
}

#[tokio::test]
async fn test_change_quantity_of_unknown_batch_is_not_found() {
    let t = setup();

    let (status, body) = t
        .post(
            "/change_batch_quantity",
            serde_json::json!({ "ref": "missing", "qty": 5 }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Domain error: Batch not found: missing");
}

#[tokio::test]
async fn test_allocations_for_order() {
    let t = setup();
    t.add_batch("lamp-1", "LAMP", 10, None).await;
    t.add_batch("desk-1", "DESK", 10, None).await;
    t.allocate("order-1", "LAMP", 1).await;
    t.allocate("order-1", "DESK", 1).await;

    let (status, body) = t.get("/allocations/order-1").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json,
        serde_json::json!([
            { "sku": "DESK", "batchref": "desk-1" },
            { "sku": "LAMP", "batchref": "lamp-1" },
        ])
    );
}

#[tokio::test]
async fn test_allocations_for_unknown_order_is_not_found() {
    let t = setup();

    let (status, _) = t.get("/allocations/nobody").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup();
    t.add_batch("b1", "LAMP", 10, None).await;

    let (status, body) = t.get("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("messagebus_commands_total"));
}
