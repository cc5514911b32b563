//! HTTP tests for the gateway router
//!
//! Drives the full axum stack against the in-memory feed store.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use telemetry_gateway::clock::ManualClock;
use telemetry_gateway::errors::{StoreError, StoreResult};
use telemetry_gateway::gate::{GatePolicy, InactiveStatus, ValidationMode};
use telemetry_gateway::metrics::INGEST_REJECTED_TOTAL;
use telemetry_gateway::model::{AppInterface, NewRecord, TelemetryRecord, Watermark};
use telemetry_gateway::rest::create_router;
use telemetry_gateway::store::{FeedStore, MemoryFeedStore};
use telemetry_gateway::Gateway;
use tower::ServiceExt;

// ============================================================================
// Fixtures
// ============================================================================

struct TestApp {
    store: Arc<MemoryFeedStore>,
    clock: Arc<ManualClock>,
    router: Router,
}

impl TestApp {
    fn new(iface: Option<AppInterface>) -> Self {
        Self::with_policy(iface, GatePolicy::default())
    }

    fn with_policy(iface: Option<AppInterface>, policy: GatePolicy) -> Self {
        let store = Arc::new(MemoryFeedStore::new());
        store.replace_app_interface(iface);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway = Gateway::with_clock(store.clone(), clock.clone(), policy);
        let router = create_router(Arc::new(gateway));
        Self {
            store,
            clock,
            router,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: &str, auth: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            // from_bytes keeps non-ASCII keys intact
            let value = HeaderValue::from_bytes(auth.as_bytes()).unwrap();
            builder = builder.header("authorization", value);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn add(&self, temperature: i64, humidity: i64) -> Value {
        let body = json!({"temperature": temperature, "humidity": humidity}).to_string();
        let (status, json) = self.post("/add-data", &body, None).await;
        assert_eq!(status, StatusCode::OK, "body: {}", json);
        json
    }
}

/// Keeps the singleton readable while every feed operation fails.
struct BrokenStore {
    healthy: MemoryFeedStore,
}

fn broken() -> StoreError {
    StoreError::Corrupt("telemetry table unreadable".to_string())
}

#[async_trait]
impl FeedStore for BrokenStore {
    async fn app_interface(&self) -> StoreResult<Option<AppInterface>> {
        self.healthy.app_interface().await
    }

    async fn provision_app_interface(&self, iface: &AppInterface) -> StoreResult<bool> {
        self.healthy.provision_app_interface(iface).await
    }

    async fn set_api_active(&self, _active: bool) -> StoreResult<bool> {
        Err(broken())
    }

    async fn insert(&self, _record: NewRecord) -> StoreResult<TelemetryRecord> {
        Err(broken())
    }

    async fn find_by_item_id(&self, _item_id: &str) -> StoreResult<Option<TelemetryRecord>> {
        Err(broken())
    }

    async fn all(&self) -> StoreResult<Vec<TelemetryRecord>> {
        Err(broken())
    }

    async fn newer_than(&self, _watermark: Watermark) -> StoreResult<Vec<TelemetryRecord>> {
        Err(broken())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(false)
    }

    fn backend_type(&self) -> &str {
        "broken"
    }
}

fn open_config() -> Option<AppInterface> {
    Some(AppInterface::new(true, None))
}

fn error_kind(body: &Value) -> &str {
    body["error"]["kind"].as_str().unwrap_or_default()
}

fn item_ids(body: &Value) -> Vec<String> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["item_id"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Example scenarios
// ============================================================================

#[tokio::test]
async fn test_scenarios_ingest_then_sync() {
    let app = TestApp::new(open_config());

    // 1. first reading stored with a server timestamp
    let first = app.add(21, 40).await;
    assert_eq!(app.store.len(), 1);
    let t1: DateTime<Utc> = first["timestamp"].as_str().unwrap().parse().unwrap();

    // 2. second reading, strictly later
    app.clock.advance(Duration::milliseconds(5));
    let second = app.add(22, 41).await;
    let t2: DateTime<Utc> = second["timestamp"].as_str().unwrap().parse().unwrap();
    assert!(t2 > t1);

    // 3. sync from the first reading returns exactly the second
    let uri = format!("/get-data/{}", first["item_id"].as_str().unwrap());
    let (status, body) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(item_ids(&body), vec![second["item_id"].as_str().unwrap()]);
    assert_eq!(body["data"][0]["temperature"], 22);
    assert_eq!(body["data"][0]["humidity"], 41);
}

#[tokio::test]
async fn test_scenario_inactive_api() {
    let app = TestApp::new(Some(AppInterface::new(false, None)));

    let (status, body) = app
        .post("/add-data", r#"{"temperature":21,"humidity":40}"#, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_kind(&body), "api_inactive");
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_scenario_unknown_cursor() {
    let app = TestApp::new(open_config());
    app.add(21, 40).await;

    let (status, body) = app.get("/get-data/unknown-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(&body), "cursor_not_found");
}

#[tokio::test]
async fn test_scenario_wrong_key() {
    let app = TestApp::new(Some(AppInterface::new(true, Some("secret".to_string()))));

    let (status, body) = app
        .post(
            "/add-data",
            r#"{"temperature":21,"humidity":40}"#,
            Some("Bearer wrong"),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_kind(&body), "unauthorized");

    let (status, _) = app
        .post(
            "/add-data",
            r#"{"temperature":21,"humidity":40}"#,
            Some("Bearer secret"),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn test_non_ascii_key_is_accepted() {
    let app = TestApp::new(Some(AppInterface::new(true, Some("clé".to_string()))));

    let (status, body) = app
        .post(
            "/add-data",
            r#"{"temperature":21,"humidity":40}"#,
            Some("Bearer clé"),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(app.store.len(), 1);

    let (status, body) = app
        .post(
            "/add-data",
            r#"{"temperature":21,"humidity":40}"#,
            Some("Bearer cle"),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Unauthorized: invalid API key");
}

// ============================================================================
// Gate and validation
// ============================================================================

#[tokio::test]
async fn test_shutdown_window_precedes_everything() {
    let now = Utc::now().trunc_subsecs(6);
    let iface = AppInterface::new(true, None).with_shutdown_at(now - Duration::seconds(30));
    let app = TestApp::new(Some(iface));
    app.clock.set(now);

    let (status, body) = app.post("/add-data", "not even json", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_kind(&body), "shutdown_window");
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_inactive_status_can_be_bad_request() {
    let policy = GatePolicy {
        inactive_status: InactiveStatus::BadRequest,
        ..GatePolicy::default()
    };
    let app = TestApp::with_policy(Some(AppInterface::new(false, None)), policy);

    let (status, body) = app
        .post("/add-data", r#"{"temperature":21,"humidity":40}"#, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "api_inactive");
}

#[tokio::test]
async fn test_malformed_and_missing_fields() {
    let app = TestApp::new(open_config());

    let (status, body) = app.post("/add-data", "{broken", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "malformed_payload");

    let (status, body) = app.post("/add-data", "[1, 2, 3]", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "malformed_payload");

    let (status, body) = app.post("/add-data", r#"{"temperature": 21}"#, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "missing_fields");
    assert!(body["error"]["message"].as_str().unwrap().contains("humidity"));

    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_permissive_mode_accepts_any_object() {
    let policy = GatePolicy {
        validation: ValidationMode::Permissive,
        ..GatePolicy::default()
    };
    let app = TestApp::with_policy(open_config(), policy);

    let (status, _) = app.post("/add-data", r#"{"pressure": 1013}"#, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.post("/add-data", "[]", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "malformed_payload");
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn test_dashboard_envelope_is_unwrapped() {
    let app = TestApp::new(open_config());

    let (status, _) = app
        .post(
            "/add-data",
            r#"{"data": {"temperature": 21, "humidity": 40}}"#,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get("/get-data").await;
    assert_eq!(body["data"][0]["temperature"], 21);
    assert!(body["data"][0].get("data").is_none());
}

#[tokio::test]
async fn test_client_cannot_choose_id_or_timestamp() {
    let app = TestApp::new(open_config());

    let (status, accepted) = app
        .post(
            "/add-data",
            r#"{"temperature":21,"humidity":40,"item_id":"mine","timestamp":"2000-01-01T00:00:00Z"}"#,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(accepted["item_id"], "mine");
    assert_ne!(accepted["timestamp"], "2000-01-01T00:00:00Z");

    let (status, _) = app.get("/get-data/mine").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_missing_configuration_is_not_found_everywhere() {
    let app = TestApp::new(None);

    for uri in ["/", "/get-data", "/get-data/some-id"] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(error_kind(&body), "configuration_missing", "{}", uri);
    }

    let (status, body) = app
        .post("/add-data", r#"{"temperature":21,"humidity":40}"#, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(&body), "configuration_missing");

    let (status, body) = app
        .post("/update-app-interface", r#"{"api_is_active": true}"#, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(&body), "configuration_missing");
}

#[tokio::test]
async fn test_toggle_activation_at_runtime() {
    let app = TestApp::new(open_config());
    app.add(21, 40).await;

    let (status, body) = app
        .post("/update-app-interface", r#"{"api_is_active": false}"#, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"api_is_active": false}));

    let (status, _) = app
        .post("/add-data", r#"{"temperature":21,"humidity":40}"#, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, index) = app.get("/").await;
    assert_eq!(index["app_interface"]["api_is_active"], false);
    assert_eq!(index["total"], 1);

    app.post("/update-app-interface", r#"{"api_is_active": true}"#, None)
        .await;
    app.add(23, 42).await;
    assert_eq!(app.store.len(), 2);
}

#[tokio::test]
async fn test_update_app_interface_accepts_dashboard_envelope() {
    let app = TestApp::new(open_config());

    let (status, body) = app
        .post("/update-app-interface", r#"{"data":{"api_is_active":false}}"#, None)
        .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body, json!({"api_is_active": false}));

    let (_, index) = app.get("/").await;
    assert_eq!(index["app_interface"]["api_is_active"], false);
}

#[tokio::test]
async fn test_update_app_interface_rejects_bad_body() {
    let app = TestApp::new(open_config());

    let (status, body) = app
        .post("/update-app-interface", r#"{"api_is_active": "yes"}"#, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "malformed_payload");
}

#[tokio::test]
async fn test_index_never_exposes_key() {
    let app = TestApp::new(Some(AppInterface::new(true, Some("secret".to_string()))));

    let (status, body) = app.get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.to_string().contains("secret"));
}

// ============================================================================
// Incremental sync
// ============================================================================

#[tokio::test]
async fn test_cursor_never_returns_older_records() {
    let app = TestApp::new(open_config());

    let mut ids = Vec::new();
    for i in 0..5 {
        let accepted = app.add(20 + i, 40 + i).await;
        ids.push(accepted["item_id"].as_str().unwrap().to_string());
        app.clock.advance(Duration::milliseconds(1));
    }

    for (position, id) in ids.iter().enumerate() {
        let (status, body) = app.get(&format!("/get-data/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item_ids(&body), ids[position + 1..].to_vec());
    }
}

#[tokio::test]
async fn test_follower_replays_feed_without_gaps() {
    let app = TestApp::new(open_config());

    let (_, snapshot) = app.get("/get-data").await;
    assert_eq!(snapshot["total"], 0);

    let mut seen: Vec<String> = Vec::new();
    let mut written: Vec<String> = Vec::new();
    let first = app.add(1, 1).await;
    written.push(first["item_id"].as_str().unwrap().to_string());
    seen.extend(item_ids(&app.get("/get-data").await.1));

    for round in 0..4 {
        // Several readings per round share a clock tick.
        for _ in 0..3 {
            let accepted = app.add(round + 2, 50).await;
            written.push(accepted["item_id"].as_str().unwrap().to_string());
        }
        app.clock.advance(Duration::microseconds(1));

        let cursor = seen.last().unwrap().clone();
        let (status, body) = app.get(&format!("/get-data/{}", cursor)).await;
        assert_eq!(status, StatusCode::OK);
        seen.extend(item_ids(&body));
    }

    assert_eq!(seen, written);
}

#[tokio::test]
async fn test_snapshot_preserves_insertion_order() {
    let app = TestApp::new(open_config());
    let mut written = Vec::new();
    for i in 0..4 {
        written.push(app.add(i + 1, 10).await["item_id"].as_str().unwrap().to_string());
    }

    let (status, body) = app.get("/get-data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 4);
    assert_eq!(item_ids(&body), written);
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(None);
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));
}

// ============================================================================
// Store failures
// ============================================================================

#[tokio::test]
async fn test_store_failure_is_internal_error() {
    let store = Arc::new(BrokenStore {
        healthy: MemoryFeedStore::with_app_interface(AppInterface::new(true, None)),
    });
    let gateway = Gateway::new(store.clone(), GatePolicy::default());
    let router = create_router(Arc::new(gateway));
    let rejected = INGEST_REJECTED_TOTAL.with_label_values(&["storage_error"]);
    let before = rejected.get();

    let requests = [
        ("POST", "/add-data", r#"{"temperature":21,"humidity":40}"#),
        ("GET", "/get-data", ""),
        ("GET", "/get-data/some-id", ""),
        ("POST", "/update-app-interface", r#"{"api_is_active": false}"#),
    ];
    for (method, uri, body) in requests {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{} {}", method, uri);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(error_kind(&json), "storage_error", "{} {}", method, uri);
    }

    assert!(rejected.get() >= before + 1.0);
    assert!(store.healthy.is_empty());
    assert!(store.healthy.app_interface().await.unwrap().unwrap().api_is_active);
}
