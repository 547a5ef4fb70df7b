//! Integration tests using wiremock to simulate the authentication service
//! and the services being called.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_client::{
    CacheKey, Error, ExternalService, MemoryTokenStore, RequestOptions, RouteDescriptor,
    RouteParams, ServiceClient, TokenPair, TokenStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PATH: &str = "/authentication/api/v1/service/jwt/create";
const REFRESH_PATH: &str = "/authentication/api/v1/service/jwt/update";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Order {
    id: String,
    total: u64,
}

fn pair(access: &str, refresh: &str, access_in: i64, refresh_in: i64) -> TokenPair {
    let now = Utc::now();
    TokenPair {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        access_expiry: now + TimeDelta::seconds(access_in),
        refresh_expiry: now + TimeDelta::seconds(refresh_in),
    }
}

fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    let now = Utc::now().timestamp();
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "accessExpiry": now + 300,
        "refreshExpiry": now + 3600,
    })
}

fn key() -> CacheKey {
    CacheKey::new("books", "books-svc")
}

fn build_client(server: &MockServer, store: Arc<dyn TokenStore>) -> ServiceClient {
    ServiceClient::builder()
        .identity("books", "books-svc", "s3cret")
        .external_service(
            ExternalService::new("authentication", format!("{}/authentication", server.uri()))
                .unwrap(),
        )
        .external_service(
            ExternalService::new("orders", format!("{}/orders", server.uri()))
                .unwrap()
                .route("get_order", RouteDescriptor::get("/v1/orders/{orderId}"))
                .route("create_order", RouteDescriptor::post("/v1/orders").require("orderId")),
        )
        .token_store(store)
        .build()
        .unwrap()
}

async fn seeded_store(pair: &TokenPair) -> Arc<MemoryTokenStore> {
    let store = Arc::new(MemoryTokenStore::new());
    store.set(&key(), pair, Duration::from_secs(3600)).await;
    store
}

async fn mount_order(server: &MockServer, token: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .and(header("Authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42", "total": 1999})))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_login(server: &MockServer, response: ResponseTemplate, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(response)
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn order_params() -> RouteParams {
    RouteParams::new().with("orderId", "42")
}

/// Records every TTL passed to `set` while delegating to memory.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryTokenStore,
    ttls: Mutex<Vec<Duration>>,
}

#[async_trait]
impl TokenStore for RecordingStore {
    async fn get(&self, key: &CacheKey) -> Option<TokenPair> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, pair: &TokenPair, ttl: Duration) {
        self.ttls.lock().unwrap().push(ttl);
        self.inner.set(key, pair, ttl).await;
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.inner.invalidate(key).await;
    }
}

#[tokio::test]
async fn test_cached_token_is_used_without_login() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("cached", "r", 300, 3600)).await;

    mount_login(&mock_server, ResponseTemplate::new(500), 0).await;
    mount_order(&mock_server, "cached", 1).await;

    let client = build_client(&mock_server, store);
    let response = client
        .get::<Order>("orders", "get_order", &order_params())
        .await
        .unwrap();

    assert_eq!(
        response.data,
        Order {
            id: "42".to_string(),
            total: 1999
        }
    );
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
}

#[tokio::test]
async fn test_login_when_nothing_cached() {
    let mock_server = MockServer::start().await;
    let store = Arc::new(RecordingStore::default());

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(body_json(json!({
            "service": "books",
            "login": "books-svc",
            "password": "s3cret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_order(&mock_server, "fresh", 2).await;

    let client = build_client(&mock_server, store.clone());

    // Second call is served from the cache.
    for _ in 0..2 {
        client
            .get::<Order>("orders", "get_order", &order_params())
            .await
            .unwrap();
    }

    let ttls = store.ttls.lock().unwrap().clone();
    assert_eq!(ttls.len(), 1);
    assert!(ttls[0] > Duration::from_secs(3500));
    assert!(ttls[0] <= Duration::from_secs(3600));
}

#[tokio::test]
async fn test_expired_access_token_is_refreshed() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("old", "r-old", -10, 3600)).await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refreshToken": "r-old"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("renewed", "r-new")))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_login(&mock_server, ResponseTemplate::new(500), 0).await;
    mount_order(&mock_server, "renewed", 1).await;

    let client = build_client(&mock_server, store.clone());
    client
        .get::<Order>("orders", "get_order", &order_params())
        .await
        .unwrap();

    let cached = store.get(&key()).await.unwrap();
    assert_eq!(cached.access_token, "renewed");
    assert_eq!(cached.refresh_token, "r-new");
}

#[tokio::test]
async fn test_both_tokens_expired_falls_back_to_login() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("old", "r-old", -20, -10)).await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;
    mount_login(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")),
        1,
    )
    .await;
    mount_order(&mock_server, "fresh", 1).await;

    let client = build_client(&mock_server, store);
    client
        .get::<Order>("orders", "get_order", &order_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_login() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("old", "r-revoked", -10, 3600)).await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_login(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")),
        1,
    )
    .await;
    mount_order(&mock_server, "fresh", 1).await;

    let client = build_client(&mock_server, store);
    client
        .get::<Order>("orders", "get_order", &order_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_login() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("old", "r-old", -10, 3600)).await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_login(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")),
        1,
    )
    .await;
    mount_order(&mock_server, "fresh", 1).await;

    let client = build_client(&mock_server, store.clone());
    client
        .get::<Order>("orders", "get_order", &order_params())
        .await
        .unwrap();

    assert_eq!(store.get(&key()).await.unwrap().access_token, "fresh");
}

#[tokio::test]
async fn test_401_renews_token_and_retries_once() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("stale", "r", 300, 3600)).await;

    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_login(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")),
        1,
    )
    .await;
    mount_order(&mock_server, "fresh", 1).await;

    let client = build_client(&mock_server, store);
    let response = client
        .get::<Order>("orders", "get_order", &order_params())
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert!(response.was_retried());
}

#[tokio::test]
async fn test_second_401_is_returned_as_request_error() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("stale", "r", 300, 3600)).await;

    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .expect(2)
        .mount(&mock_server)
        .await;
    mount_login(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")),
        1,
    )
    .await;

    let client = build_client(&mock_server, store);
    let result = client
        .get::<Order>("orders", "get_order", &order_params())
        .await;

    match result {
        Err(Error::Request {
            status,
            raw_response,
            ..
        }) => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(raw_response, "denied");
        }
        other => panic!("Expected Request error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_other_client_errors_are_not_retried() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("cached", "r", 300, 3600)).await;

    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_login(&mock_server, ResponseTemplate::new(500), 0).await;

    let client = build_client(&mock_server, store);
    let result = client
        .get::<Order>("orders", "get_order", &order_params())
        .await;

    assert!(matches!(result, Err(Error::Request { status, .. }) if status.as_u16() == 403));
}

#[tokio::test]
async fn test_missing_params_fail_before_any_request() {
    let mock_server = MockServer::start().await;

    mount_login(&mock_server, ResponseTemplate::new(500), 0).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = build_client(&mock_server, Arc::new(MemoryTokenStore::new()));
    let result = client
        .get::<Order>("orders", "get_order", &RouteParams::new().with("orderId", ""))
        .await;

    match result {
        Err(Error::Validation { missing, .. }) => assert_eq!(missing, vec!["orderId"]),
        other => panic!("Expected Validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_post_sends_body_and_extra_params_as_query() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("cached", "r", 300, 3600)).await;

    let new_order = Order {
        id: "42".to_string(),
        total: 500,
    };

    Mock::given(method("POST"))
        .and(path("/orders/v1/orders"))
        .and(query_param("orderId", "42"))
        .and(header("Authorization", "Bearer cached"))
        .and(body_json(&new_order))
        .respond_with(ResponseTemplate::new(201).set_body_json(&new_order))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = build_client(&mock_server, store);
    let response = client
        .post::<_, Order>("orders", "create_order", &order_params(), &new_order)
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(response.data, new_order);
}

#[tokio::test]
async fn test_rejected_login_is_a_credentials_error() {
    let mock_server = MockServer::start().await;

    mount_login(
        &mock_server,
        ResponseTemplate::new(401).set_body_string("bad password"),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = build_client(&mock_server, Arc::new(MemoryTokenStore::new()));
    let result = client
        .get::<Order>("orders", "get_order", &order_params())
        .await;

    match result {
        Err(Error::Credentials { raw_response, .. }) => assert_eq!(raw_response, "bad password"),
        other => panic!("Expected Credentials error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_service_is_a_connectivity_error() {
    let store = seeded_store(&pair("cached", "r", 300, 3600)).await;

    let client = ServiceClient::builder()
        .identity("books", "books-svc", "s3cret")
        .external_service(ExternalService::new("authentication", "http://127.0.0.1:1/authentication").unwrap())
        .external_service(
            ExternalService::new("orders", "http://127.0.0.1:1/orders")
                .unwrap()
                .route("get_order", RouteDescriptor::get("/v1/orders/{orderId}")),
        )
        .token_store(store)
        .build()
        .unwrap();

    let result = client
        .get::<Order>("orders", "get_order", &order_params())
        .await;

    let error = result.unwrap_err();
    assert!(error.is_connectivity(), "got {:?}", error);
}

#[tokio::test]
async fn test_deadline_elapsing_is_a_timeout() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("cached", "r", 300, 3600)).await;

    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "42", "total": 1}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let client = build_client(&mock_server, store);
    let options = RequestOptions::new().deadline(Duration::from_millis(100));
    let result = client
        .get_with::<Order>("orders", "get_order", &order_params(), &options)
        .await;

    assert!(matches!(result, Err(Error::Timeout)));
}

#[tokio::test]
async fn test_deadline_covers_the_renewal_retry() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("stale", "r", 300, 3600)).await;

    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_login(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(token_body("fresh", "r1"))
            .set_delay(Duration::from_millis(400)),
        1,
    )
    .await;

    let client = build_client(&mock_server, store);
    let options = RequestOptions::new().deadline(Duration::from_millis(150));
    let result = client
        .get_with::<Order>("orders", "get_order", &order_params(), &options)
        .await;

    assert!(matches!(result, Err(Error::Timeout)), "got {:?}", result);
}

#[tokio::test]
async fn test_without_auth_sends_no_token() {
    let mock_server = MockServer::start().await;

    mount_login(&mock_server, ResponseTemplate::new(500), 0).await;
    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42", "total": 0})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = build_client(&mock_server, Arc::new(MemoryTokenStore::new()));
    let options = RequestOptions::new().without_auth();
    client
        .get_with::<Order>("orders", "get_order", &order_params(), &options)
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_default_and_per_call_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(header("x-caller", "books"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/v1/orders/42"))
        .and(header("x-caller", "books"))
        .and(header("x-request-id", "abc-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42", "total": 0})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = ServiceClient::builder()
        .identity("books", "books-svc", "s3cret")
        .external_service(
            ExternalService::new("authentication", format!("{}/authentication", mock_server.uri()))
                .unwrap(),
        )
        .external_service(
            ExternalService::new("orders", format!("{}/orders", mock_server.uri()))
                .unwrap()
                .route("get_order", RouteDescriptor::get("/v1/orders/{orderId}")),
        )
        .default_header("x-caller", "books")
        .unwrap()
        .build()
        .unwrap();

    let options = RequestOptions::new().header("x-request-id", "abc-123").unwrap();
    client
        .get_with::<Order>("orders", "get_order", &order_params(), &options)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invalidate_tokens_forces_login() {
    let mock_server = MockServer::start().await;
    let store = seeded_store(&pair("cached", "r", 300, 3600)).await;

    mount_login(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(token_body("fresh", "r1")),
        1,
    )
    .await;

    let client = build_client(&mock_server, store);
    assert_eq!(client.access_token().await.unwrap(), "cached");

    client.invalidate_tokens().await;
    assert_eq!(client.access_token().await.unwrap(), "fresh");
}
