//! RequestClient against a mock HTTP backend

use std::sync::Arc;
use std::time::{Duration, Instant};

use kiosk_sync_core::{
    ApiResponse, BucketLimits, ChannelNotifier, ErrorKind, Notice, RateLimitInfo, RateLimiter,
    RequestClient, RequestOptions, RetryHint,
};
use reqwest::{Method, Url};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(uri: &str, limits: BucketLimits) -> (RequestClient, UnboundedReceiver<Notice>) {
    let (notifier, notices) = ChannelNotifier::new();
    let client = RequestClient::new(
        Url::parse(uri).unwrap(),
        Duration::from_secs(5),
        Arc::new(RateLimiter::new(limits)),
        Arc::new(notifier),
    )
    .unwrap();
    (client, notices)
}

fn client(server: &MockServer) -> (RequestClient, UnboundedReceiver<Notice>) {
    client_for(&server.uri(), BucketLimits::default())
}

#[tokio::test]
async fn test_success_with_rate_limit_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/menu"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": [{"id": 1, "name": "Flat white"}]}))
                .insert_header("X-RateLimit-Limit", "60")
                .insert_header("X-RateLimit-Remaining", "59")
                .insert_header("X-RateLimit-Reset", "30"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, _notices) = client(&server);
    let response: ApiResponse<Value> = client.get("/menu").await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.data["items"][0]["name"], "Flat white");
    assert_eq!(
        response.rate_limit,
        Some(RateLimitInfo {
            limit: Some(60),
            remaining: Some(59),
            reset: Some(30),
        })
    );
    assert_eq!(client.limiter().remaining_tokens("/menu"), 59);
}

#[tokio::test]
async fn test_too_many_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"message": "slow down"}))
                .insert_header("X-RateLimit-Reset", "5"),
        )
        .mount(&server)
        .await;

    let (client, mut notices) = client(&server);
    let err = client
        .post::<Value>("/orders", &json!({"items": []}))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert_eq!(err.status, Some(429));
    assert_eq!(err.message, "slow down");
    assert_eq!(
        err.retry_hint(),
        RetryHint::AfterRefill(Some(Duration::from_secs(5)))
    );

    match notices.try_recv() {
        Ok(Notice::RequestFailed { endpoint, error }) => {
            assert_eq!(endpoint, "/orders");
            assert_eq!(error.kind, ErrorKind::RateLimited);
        }
        other => panic!("expected RequestFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exhausted_quota_on_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/menu"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": []}))
                .insert_header("X-RateLimit-Remaining", "0"),
        )
        .mount(&server)
        .await;

    let (client, _notices) = client(&server);
    let err = client.get::<Value>("/menu").await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert_eq!(err.status, Some(200));
    // The local bucket follows the server's quota
    assert_eq!(client.limiter().remaining_tokens("/menu"), 0);
}

#[tokio::test]
async fn test_server_and_client_errors() {
    let server = MockServer::start().await;
    Mock::given(path("/orders"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "maintenance"})))
        .mount(&server)
        .await;
    Mock::given(path("/feedback"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (client, _notices) = client(&server);

    let err = client.post::<Value>("/orders", &json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerError);
    assert_eq!(err.status, Some(503));
    assert_eq!(err.message, "maintenance");
    assert!(err.is_retryable());

    let err = client.post::<Value>("/feedback", &json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ClientError);
    assert_eq!(err.status, Some(404));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let (client, _notices) = client(&server);
    let err = client.get::<Value>("/menu").await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::ParseError);
    assert_eq!(err.status, Some(200));
}

#[tokio::test]
async fn test_unreachable_backend_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let (client, mut notices) = client_for(&uri, BucketLimits::default());
    let err = client.get::<Value>("/menu").await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::TransientNetwork);
    assert_eq!(err.status, None);
    assert!(notices.try_recv().is_ok());
}

#[tokio::test]
async fn test_silent_failure_is_not_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (client, mut notices) = client(&server);
    let options = RequestOptions {
        silent: true,
        ..RequestOptions::default()
    };
    let err = client
        .request::<Value>(Method::GET, "/menu", None, &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ServerError);
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn test_idempotency_key_and_body_are_sent() {
    let server = MockServer::start().await;
    let order = json!({"items": [{"id": 3, "qty": 2}], "table": 7});
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("Idempotency-Key", "op-123"))
        .and(body_json(order.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"orderId": "A12"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _notices) = client(&server);
    let options = RequestOptions {
        idempotency_key: Some("op-123".to_string()),
        ..RequestOptions::default()
    };
    let response = client
        .request::<Value>(Method::POST, "/orders", Some(&order), &options)
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.data["orderId"], "A12");
}

#[tokio::test]
async fn test_empty_body_decodes_as_null() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let (client, _notices) = client(&server);
    let response = client.post::<Value>("/feedback", &json!({"stars": 5})).await.unwrap();

    assert_eq!(response.status, 204);
    assert_eq!(response.data, Value::Null);
}

#[tokio::test]
async fn test_bypass_does_not_consume_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let (client, _notices) = client(&server);
    let options = RequestOptions {
        bypass_rate_limit: true,
        ..RequestOptions::default()
    };
    for _ in 0..3 {
        client
            .request::<Value>(Method::GET, "/health", None, &options)
            .await
            .unwrap();
    }

    assert_eq!(client.limiter().remaining_tokens("/health"), 60);
}

#[tokio::test]
async fn test_requests_wait_for_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let (client, _notices) = client_for(
        &server.uri(),
        BucketLimits {
            max_tokens: 1,
            refill_rate: 1,
            refill_interval: Duration::from_millis(200),
        },
    );

    let start = Instant::now();
    client.get::<Value>("/menu").await.unwrap();
    client.get::<Value>("/menu").await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(200));
}
