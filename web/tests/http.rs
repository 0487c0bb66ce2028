//! HTTP tests for the delivery endpoints
//!
//! Exercises the full axum router with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Tests can unwrap

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use notiflow_core::{FlowControlConfig, Record};
use notiflow_runtime::{
    Handler, HandlerOutcome, LifecycleManager, NotificationRouter, ScopeProvider, Settings,
    FlowController,
};
use notiflow_testing::helpers::init_tracing;
use notiflow_testing::{Behavior, ManualClock, RecordingHandler};
use notiflow_web::{build_router, AppState, CORRELATION_ID_HEADER};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    state: AppState,
    handler: Arc<RecordingHandler>,
    clock: Arc<ManualClock>,
}

impl TestApp {
    fn new(handler: RecordingHandler) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::epoch());
        let handler = Arc::new(handler);
        let router = NotificationRouter::builder(FlowController::new(
            FlowControlConfig::default(),
            clock.clone(),
        ))
        .route("user:update", handler.clone() as Arc<dyn Handler>)
        .build();

        let state = AppState::new(
            Arc::new(router),
            ScopeProvider::new(Settings::new()),
            Arc::new(LifecycleManager::new()),
        );
        Self {
            state,
            handler,
            clock,
        }
    }

    fn app(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn post(&self, path: &str, body: &Value) -> Response {
        self.app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> Response {
        self.app()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn single(id: &str) -> Value {
    json!({"topic": "user:update", "records": [{"id": id, "plan": "pro"}]})
}

#[tokio::test]
async fn test_accepted_delivery_returns_hint() {
    let app = TestApp::new(RecordingHandler::accepting());

    let response = app.post("/notify", &single("a")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["records"], 1);
    assert_eq!(
        body["flowControl"],
        json!({"type": "next", "size": 30, "in": 5, "in_time": 60000})
    );
}

#[tokio::test]
async fn test_unknown_topic_is_acknowledged() {
    let app = TestApp::new(RecordingHandler::accepting());

    let response = app
        .post("/notify", &json!({"topic": "ship:update", "records": [{"id": "s1"}]}))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ignored");
    assert_eq!(app.handler.calls(), 0);
}

#[tokio::test]
async fn test_sixth_delivery_gets_429_with_retry_after() {
    let app = TestApp::new(RecordingHandler::accepting());

    for i in 0..5 {
        let response = app.post("/notify", &single(&format!("e{i}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    app.clock.advance_ms(100);

    let response = app.post("/notify", &single("late")).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
    let body = json_body(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(body["retryAfterMs"], 59_900);
    assert_eq!(body["flowControl"]["type"], "retry");
}

#[tokio::test]
async fn test_batch_endpoint_is_not_flow_controlled() {
    let app = TestApp::new(RecordingHandler::accepting());
    for i in 0..5 {
        app.post("/notify", &single(&format!("e{i}"))).await;
    }

    let records: Vec<Value> = (0..40).map(|i| json!({"id": format!("b{i}")})).collect();
    let response = app
        .post("/batch", &json!({"topic": "user:update", "records": records}))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["records"], 40);
    assert!(body.get("flowControl").is_none());
    assert_eq!(app.handler.calls(), 45);
}

#[tokio::test]
async fn test_is_batch_flag_on_notify_takes_batch_path() {
    let app = TestApp::new(RecordingHandler::accepting());

    let response = app
        .post(
            "/notify",
            &json!({"topic": "user:update", "isBatch": true, "records": [{"id": "a"}, {"id": "a"}]}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["records"], 2);
    assert_eq!(app.state.router.flow_control().admitted_in_window(), 0);
}

#[tokio::test]
async fn test_numeric_entity_ids_are_accepted_and_grouped() {
    let app = TestApp::new(RecordingHandler::accepting());

    let response = app
        .post(
            "/notify",
            &json!({"topic": "user:update", "records": [{"id": 42, "x": 1}, {"id": 42, "x": 2}]}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let invocations = app.handler.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].records.len(), 1);
    assert_eq!(invocations[0].records[0].entity_id(), Some("42"));
    assert_eq!(invocations[0].records[0].traits["x"], 2);
}

#[tokio::test]
async fn test_empty_batch_succeeds_without_invocation() {
    let app = TestApp::new(RecordingHandler::accepting());

    let response = app
        .post("/batch", &json!({"topic": "user:update", "records": []}))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.handler.calls(), 0);
}

#[tokio::test]
async fn test_deferred_and_rejected_outcomes() {
    let handler = RecordingHandler::accepting()
        .then(Behavior::Respond(HandlerOutcome::Deferred))
        .then(Behavior::Respond(HandlerOutcome::Rejected("unknown plan".into())));
    let app = TestApp::new(handler);

    let deferred = app.post("/notify", &single("a")).await;
    assert_eq!(deferred.status(), StatusCode::ACCEPTED);

    let rejected = app.post("/notify", &single("b")).await;
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(rejected).await;
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["reason"], "unknown plan");
}

#[tokio::test]
async fn test_handler_failure_is_500_with_correlation_id() {
    let app = TestApp::new(RecordingHandler::failing("downstream exploded"));
    let correlation_id = Uuid::new_v4();

    let response = app
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header(header::CONTENT_TYPE, "application/json")
                .header(CORRELATION_ID_HEADER, correlation_id.to_string())
                .body(Body::from(single("a").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get(CORRELATION_ID_HEADER).unwrap(),
        correlation_id.to_string().as_str()
    );
    let body = json_body(response).await;
    assert_eq!(body["correlationId"], correlation_id.to_string());
    // Internal detail stays in the logs.
    assert!(!body["message"].as_str().unwrap().contains("exploded"));

    assert_eq!(app.handler.invocations()[0].correlation_id, correlation_id);
    assert_eq!(app.state.scopes.open_scopes(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let app = TestApp::new(RecordingHandler::accepting());

    let response = app
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let missing_topic = app.post("/notify", &json!({"records": []})).await;
    assert_eq!(missing_topic.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(missing_topic).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_deliveries_refused_after_shutdown() {
    let app = TestApp::new(RecordingHandler::accepting());

    assert_eq!(app.get("/health/ready").await.status(), StatusCode::OK);

    app.state.lifecycle.shutdown().await;

    let response = app.post("/notify", &single("a")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.handler.calls(), 0);

    let ready = app.get("/health/ready").await;
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(ready).await["state"], "disposed");

    // Liveness is unaffected.
    assert_eq!(app.get("/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_deliveries_refused_while_draining() {
    let app = TestApp::new(RecordingHandler::accepting());

    app.state.lifecycle.begin_draining();

    let response = app.post("/notify", &single("a")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let batch = app
        .post("/batch", &json!({"topic": "user:update", "records": [{"id": "a"}]}))
        .await;
    assert_eq!(batch.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.handler.calls(), 0);

    let ready = app.get("/health/ready").await;
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(ready).await["state"], "draining");
}

#[tokio::test]
async fn test_settings_snapshot_reaches_handler() {
    let app = TestApp::new(RecordingHandler::accepting());

    app.post(
        "/notify",
        &json!({
            "topic": "user:update",
            "records": [{"id": "a"}],
            "settings": {"segment": "vip"}
        }),
    )
    .await;

    let invocation = &app.handler.invocations()[0];
    assert_eq!(invocation.settings.get("segment"), Some(&json!("vip")));
    assert_eq!(invocation.records, vec![Record::new("a")]);
}

#[tokio::test]
async fn test_metrics_without_recorder_is_unavailable() {
    let app = TestApp::new(RecordingHandler::accepting());

    let response = app.get("/metrics").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
