use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use domain_events::{IngestService, events_router};
use event_pipeline::{
    DefaultProcessor, EventStore, InMemoryEventStore, MetricsAggregator, Pipeline, PipelineConfig,
    ProcessedEvent, StorageError,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tower::ServiceExt;

/// Store that holds every call until permits are added
struct GatedStore {
    gate: Arc<Semaphore>,
    inner: InMemoryEventStore,
}

#[async_trait]
impl EventStore for GatedStore {
    async fn store(&self, events: &[ProcessedEvent]) -> Result<(), StorageError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| StorageError::backend("gate closed"))?;
        self.inner.store(events).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Store that refuses every record
struct RejectingStore;

#[async_trait]
impl EventStore for RejectingStore {
    async fn store(&self, _events: &[ProcessedEvent]) -> Result<(), StorageError> {
        Err(StorageError::rejected("duplicate key"))
    }

    fn name(&self) -> &'static str {
        "rejecting"
    }
}

fn service_with(config: PipelineConfig, store: Arc<dyn EventStore>) -> IngestService {
    let pipeline = Pipeline::start(
        config,
        Arc::new(DefaultProcessor::new()),
        store.clone(),
        Arc::new(MetricsAggregator::new()),
    )
    .unwrap();
    IngestService::new(Arc::new(pipeline), store, core_config::app_info!())
}

fn app(service: IngestService) -> Router {
    events_router().with_state(service)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn purchase() -> Value {
    json!({
        "type": "user_action",
        "source": "web",
        "data": { "action": "purchase", "value": 99.99 }
    })
}

async fn metrics(app: &Router) -> Value {
    body_json(app.clone().oneshot(get("/metrics")).await.unwrap()).await
}

#[tokio::test]
async fn test_submit_event_is_accepted_and_processed() {
    let store = InMemoryEventStore::new();
    let app = app(service_with(PipelineConfig::new(2, 10), Arc::new(store.clone())));

    let response = app
        .clone()
        .oneshot(post_json("/events", purchase()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "accepted");
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 36);

    assert_eq!(metrics(&app).await["events_received"], 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while metrics(&app).await["events_processed"] != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("event was not processed");
    assert!(store.get(&id).is_some());
}

#[tokio::test]
async fn test_empty_type_is_rejected_before_the_queue() {
    let app = app(service_with(
        PipelineConfig::new(1, 10),
        Arc::new(InMemoryEventStore::new()),
    ));

    let response = app
        .clone()
        .oneshot(post_json("/events", json!({ "type": "", "source": "web" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert_eq!(body["details"]["field"], "type");

    let snapshot = metrics(&app).await;
    assert_eq!(snapshot["events_failed"], 0);
    assert_eq!(snapshot["events_received"], 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = app(service_with(
        PipelineConfig::new(1, 10),
        Arc::new(InMemoryEventStore::new()),
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"type\": "))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "JSON_EXTRACTION");
}

#[tokio::test]
async fn test_batch_reports_each_item() {
    let store = InMemoryEventStore::new();
    let service = service_with(PipelineConfig::new(2, 10), Arc::new(store.clone()));
    let app = app(service.clone());

    let response = app
        .oneshot(post_json(
            "/events/batch",
            json!({ "events": [purchase(), { "type": "", "source": "web" }, purchase()] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["accepted"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 3);
    assert_eq!(body["items"][1]["index"], 1);

    let report = service.pipeline().shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.metrics.events_processed, 2);
    assert_eq!(report.metrics.failures_by_reason["validation"], 1);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_oversized_batch_enqueues_nothing() {
    let app = app(service_with(
        PipelineConfig::new(1, 200),
        Arc::new(InMemoryEventStore::new()),
    ));
    let events: Vec<Value> = (0..101).map(|_| purchase()).collect();

    let response = app
        .clone()
        .oneshot(post_json("/events/batch", json!({ "events": events })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "VALIDATION_ERROR");
    assert_eq!(metrics(&app).await["events_received"], 0);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let app = app(service_with(
        PipelineConfig::new(1, 10),
        Arc::new(InMemoryEventStore::new()),
    ));

    let response = app
        .oneshot(post_json("/events/batch", json!({ "events": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_returns_503() {
    let gate = Arc::new(Semaphore::new(0));
    let store = GatedStore {
        gate: gate.clone(),
        inner: InMemoryEventStore::new(),
    };
    let service = service_with(PipelineConfig::new(1, 1), Arc::new(store));
    let app = app(service.clone());

    // First event occupies the worker, second fills the queue
    app.clone()
        .oneshot(post_json("/events", purchase()))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.pipeline().metrics().active_workers() != 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    app.clone()
        .oneshot(post_json("/events", purchase()))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/events", purchase()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "QUEUE_FULL");
    assert_eq!(metrics(&app).await["events_rejected"], 1);

    gate.add_permits(10);
    let report = service.pipeline().shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.metrics.events_processed, 2);
}

#[tokio::test]
async fn test_wait_returns_201_when_stored() {
    let app = app(service_with(
        PipelineConfig::new(1, 10),
        Arc::new(InMemoryEventStore::new()),
    ));

    let response = app
        .oneshot(post_json("/events?wait=true", purchase()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "stored");
    assert!(body["id"].is_string());
}

#[tokio::test]
async fn test_wait_returns_422_when_storage_rejects() {
    let app = app(service_with(PipelineConfig::new(1, 10), Arc::new(RejectingStore)));

    let response = app
        .oneshot(post_json("/events?wait=true", purchase()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "UNPROCESSABLE_ENTITY");
    assert!(body["message"].as_str().unwrap().contains("storage"));
}

#[tokio::test]
async fn test_health_reports_shutdown() {
    let service = service_with(
        PipelineConfig::new(1, 10),
        Arc::new(InMemoryEventStore::new()),
    );
    let app = app(service.clone());

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pipeline"], "running");

    service.pipeline().shutdown(Duration::from_secs(1)).await;

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "stopped");

    let response = app
        .oneshot(post_json("/events", purchase()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "SHUTTING_DOWN");
}

#[tokio::test]
async fn test_ready_checks_pipeline_and_storage() {
    let service = service_with(
        PipelineConfig::new(1, 10),
        Arc::new(InMemoryEventStore::new()),
    );
    let app = app(service.clone());

    let response = app.clone().oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["in_memory"], "connected");

    service.pipeline().shutdown(Duration::from_secs(1)).await;

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
