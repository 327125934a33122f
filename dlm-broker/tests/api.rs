use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use camino::Utf8Path;
use dlm_broker::BrokerState;
use dlm_broker::config::Conf;
use http_body_util::BodyExt as _;
use queue_store::QueueDb;
use serde_json::{Value, json};
use tower::ServiceExt as _;

const TEST_KEY: &str = "test-key";

struct TestBroker {
    _dir: tempfile::TempDir,
    router: Router,
}

impl TestBroker {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir").join("queue.db");

        let conf = Conf {
            port: 0,
            db_path: db_path.clone(),
            key: TEST_KEY.to_owned(),
            key_generated: false,
            default_queue: "default".to_owned(),
            log_file: None,
            log_filter: "info".to_owned(),
        };

        let db = QueueDb::open(&db_path).expect("open db");

        let state = BrokerState {
            conf: Arc::new(conf),
            db: Arc::new(db),
        };

        TestBroker {
            _dir: dir,
            router: dlm_broker::api::make_router(state),
        }
    }

    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request_with_headers(method, uri, body, &[(AUTHORIZATION.as_str(), TEST_KEY)])
            .await
    }

    async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();

        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, value)
    }
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let broker = TestBroker::new();

    let (status, _) = broker
        .request_with_headers(Method::GET, "/health", None, &[])
        .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_key_is_unauthenticated() {
    let broker = TestBroker::new();

    let (status, _) = broker
        .request_with_headers(Method::GET, "/queues", None, &[])
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_key_is_unauthenticated() {
    let broker = TestBroker::new();

    let (status, _) = broker
        .request_with_headers(Method::GET, "/queues", None, &[(AUTHORIZATION.as_str(), "nope")])
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_key_is_unauthenticated() {
    let broker = TestBroker::new();

    let (status, _) = broker
        .request_with_headers(
            Method::GET,
            "/queues",
            None,
            &[(AUTHORIZATION.as_str(), TEST_KEY), (AUTHORIZATION.as_str(), TEST_KEY)],
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_queue_validates_name() {
    let broker = TestBroker::new();

    let (status, _) = broker
        .request(Method::POST, "/queues", Some(json!({ "name": "" })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn colliding_queue_names_conflict() {
    let broker = TestBroker::new();

    let (status, body) = broker
        .request(Method::POST, "/queues", Some(json!({ "name": "a b" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "a_b");

    let (status, _) = broker
        .request(Method::POST, "/queues", Some(json!({ "name": "a_b" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn enqueue_validates_urls() {
    let broker = TestBroker::new();
    broker
        .request(Method::POST, "/queues", Some(json!({ "name": "q" })))
        .await;

    let (status, _) = broker
        .request(
            Method::POST,
            "/queues/q/items",
            Some(json!({ "source": "", "destination": "file:///x" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = broker
        .request(
            Method::POST,
            "/queues/q/items",
            Some(json!({ "source": "http://example/a", "destination": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_queue_is_not_found() {
    let broker = TestBroker::new();

    let (status, _) = broker.request(Method::POST, "/queues/ghost/claim", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn enqueue_claim_progress_complete_round_trip() {
    let broker = TestBroker::new();

    broker
        .request(Method::POST, "/queues", Some(json!({ "name": "q" })))
        .await;

    let (status, body) = broker
        .request(
            Method::POST,
            "/queues/q/items",
            Some(json!({ "source": "http://example/a", "destination": "file:///x/y" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "q:00000000000000000010");

    let (status, body) = broker.request(Method::POST, "/queues/q/claim", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item"]["id"], "q:00000000000000000010");
    assert_eq!(body["item"]["source"], "http://example/a");

    let (status, _) = broker
        .request(
            Method::POST,
            "/items/state",
            Some(json!({
                "id": "q:00000000000000000010",
                "state": "DOWNLOADING",
                "downloadedBytes": 1000,
                "totalSizeBytes": 2000,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = broker
        .request(
            Method::POST,
            "/items/state",
            Some(json!({
                "id": "q:00000000000000000010",
                "state": "COMPLETE",
                "downloadedBytes": 2000,
                "totalSizeBytes": 2000,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = broker.request(Method::GET, "/queues/q/items", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().expect("items").len(), 0);

    let (status, body) = broker.request(Method::GET, "/queues/q/finished", None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["state"], "COMPLETE");
    assert_eq!(items[0]["downloadedBytes"], 2000);
    assert_eq!(items[0]["totalSizeBytes"], 2000);
}

#[tokio::test]
async fn claimed_items_report_downloading() {
    let broker = TestBroker::new();

    broker
        .request(Method::POST, "/queues", Some(json!({ "name": "q" })))
        .await;
    broker
        .request(
            Method::POST,
            "/queues/q/items",
            Some(json!({ "source": "http://example/a", "destination": "file:///x" })),
        )
        .await;

    let (_, body) = broker.request(Method::GET, "/queues/q/items", None).await;
    assert_eq!(body["items"][0]["state"], "QUEUED");

    broker.request(Method::POST, "/queues/q/claim", None).await;

    let (_, body) = broker.request(Method::GET, "/queues/q/items", None).await;
    assert_eq!(body["items"][0]["state"], "DOWNLOADING");
}

#[tokio::test]
async fn cancelled_items_report_failed_on_the_wire() {
    let broker = TestBroker::new();

    broker
        .request(Method::POST, "/queues", Some(json!({ "name": "q" })))
        .await;
    let (_, body) = broker
        .request(
            Method::POST,
            "/queues/q/items",
            Some(json!({ "source": "http://example/a", "destination": "file:///x" })),
        )
        .await;
    let id = body["id"].as_str().expect("id").to_owned();

    let (status, _) = broker
        .request(Method::POST, "/items/cancel", Some(json!({ "id": id })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = broker.request(Method::GET, "/queues/q/finished", None).await;
    assert_eq!(body["items"][0]["state"], "FAILED");
    assert_eq!(body["items"][0]["message"], "cancelled by user");
}

#[tokio::test]
async fn set_item_state_rejects_unspecified() {
    let broker = TestBroker::new();

    let (status, _) = broker
        .request(
            Method::POST,
            "/items/state",
            Some(json!({
                "id": "q:00000000000000000010",
                "state": "UNSPECIFIED",
                "downloadedBytes": 0,
                "totalSizeBytes": 0,
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn listing_honours_client_pagination() {
    let broker = TestBroker::new();

    broker
        .request(Method::POST, "/queues", Some(json!({ "name": "q" })))
        .await;

    for i in 0..3 {
        broker
            .request(
                Method::POST,
                "/queues/q/items",
                Some(json!({ "source": format!("http://example/{i}"), "destination": "file:///x" })),
            )
            .await;
    }

    let (status, body) = broker.request(Method::GET, "/queues/q/items?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().expect("items").len(), 2);
    let next = body["next"].as_str().expect("next").to_owned();
    assert!(!next.is_empty());

    let (status, body) = broker
        .request(Method::GET, &format!("/queues/q/items?limit=2&next={next}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().expect("items").len(), 1);
    assert_eq!(body["next"], "");
}

#[tokio::test]
async fn clear_history_empties_the_finished_namespace() {
    let broker = TestBroker::new();

    broker
        .request(Method::POST, "/queues", Some(json!({ "name": "q" })))
        .await;
    let (_, body) = broker
        .request(
            Method::POST,
            "/queues/q/items",
            Some(json!({ "source": "http://example/a", "destination": "file:///x" })),
        )
        .await;
    let id = body["id"].as_str().expect("id").to_owned();
    broker
        .request(Method::POST, "/items/cancel", Some(json!({ "id": id })))
        .await;

    let (status, _) = broker.request(Method::DELETE, "/queues/q/finished", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = broker.request(Method::GET, "/queues/q/finished", None).await;
    assert_eq!(body["items"].as_array().expect("items").len(), 0);
}
