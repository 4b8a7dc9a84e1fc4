//! Request shapes and response mapping of the etcd client against a mock
//! etcd HTTP server.

use serde_json::json;
use std::time::Duration;
use warden_core::{CoordinationClient, CoordinationError, InstanceToken, LeaseKey};
use warden_etcd::{EtcdClient, EtcdConfig};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY_PATH: &str = "/v2/keys/warden/web";

fn key() -> LeaseKey {
    LeaseKey::new("/warden/web")
}

fn token(value: &str) -> InstanceToken {
    InstanceToken::new(value)
}

fn client_for(servers: &[&str]) -> EtcdClient {
    let config = EtcdConfig::new(servers.iter().copied())
        .unwrap()
        .with_request_timeout(Duration::from_secs(2));
    EtcdClient::new(config).unwrap()
}

fn etcd_error(status: u16, code: u64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "errorCode": code,
        "message": message,
        "cause": "/warden/web",
        "index": 12
    }))
}

fn node_response(action: &str, value: &str, ttl: i64) -> serde_json::Value {
    json!({
        "action": action,
        "node": {
            "key": "/warden/web",
            "value": value,
            "expiration": "2026-10-17T12:00:30Z",
            "ttl": ttl,
            "modifiedIndex": 9,
            "createdIndex": 9
        }
    })
}

#[tokio::test]
async fn test_get_returns_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(KEY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_response("get", "node-a", 21)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    let record = client.get(&key()).await.unwrap();

    assert_eq!(record.value, "node-a");
    assert_eq!(record.ttl_remaining, Some(Duration::from_secs(21)));
    assert_eq!(record.modified_index, 9);
    assert!(record.is_held_by(&token("node-a")));
}

#[tokio::test]
async fn test_get_missing_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(KEY_PATH))
        .respond_with(etcd_error(404, 100, "Key not found"))
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    let error = client.get(&key()).await.unwrap_err();
    assert_eq!(error, CoordinationError::not_found("/warden/web"));
}

#[tokio::test]
async fn test_create_sends_prev_exist_and_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(KEY_PATH))
        .and(query_param("prevExist", "false"))
        .and(body_string_contains("value=node-a"))
        .and(body_string_contains("ttl=30"))
        .respond_with(ResponseTemplate::new(201).set_body_json(node_response("create", "node-a", 30)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    client
        .create_if_absent(&key(), &token("node-a"), 30)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(KEY_PATH))
        .respond_with(etcd_error(412, 105, "Key already exists"))
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    let error = client
        .create_if_absent(&key(), &token("node-b"), 30)
        .await
        .unwrap_err();
    assert_eq!(error, CoordinationError::already_exists("/warden/web"));
    assert!(error.is_conflict());
}

#[tokio::test]
async fn test_compare_and_swap() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(KEY_PATH))
        .and(query_param("prevValue", "node-a"))
        .and(body_string_contains("ttl=30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_response("compareAndSwap", "node-a", 30)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(KEY_PATH))
        .and(query_param("prevValue", "node-b"))
        .respond_with(etcd_error(412, 101, "Compare failed"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    client
        .compare_and_swap(&key(), &token("node-a"), 30, &token("node-a"))
        .await
        .unwrap();

    let error = client
        .compare_and_swap(&key(), &token("node-b"), 30, &token("node-b"))
        .await
        .unwrap_err();
    assert!(matches!(error, CoordinationError::PreconditionFailed { .. }));
}

#[tokio::test]
async fn test_compare_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(KEY_PATH))
        .and(query_param("prevValue", "node-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": "compareAndDelete",
            "node": { "key": "/warden/web", "modifiedIndex": 11, "createdIndex": 9 },
            "prevNode": { "key": "/warden/web", "value": "node-a", "modifiedIndex": 9, "createdIndex": 9 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    client
        .compare_and_delete(&key(), &token("node-a"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_compare_and_delete_missing_key() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(KEY_PATH))
        .respond_with(etcd_error(404, 100, "Key not found"))
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    let error = client
        .compare_and_delete(&key(), &token("node-a"))
        .await
        .unwrap_err();
    assert!(error.is_not_found());
}

#[tokio::test]
async fn test_fails_over_and_sticks_to_healthy_endpoint() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&broken)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(KEY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_response("get", "node-a", 25)))
        .expect(2)
        .mount(&healthy)
        .await;

    let client = client_for(&[broken.uri().as_str(), healthy.uri().as_str()]);
    assert_eq!(client.get(&key()).await.unwrap().value, "node-a");
    assert_eq!(
        client.current_endpoint().as_str().trim_end_matches('/'),
        healthy.uri()
    );
    // Second read goes straight to the healthy endpoint
    assert_eq!(client.get(&key()).await.unwrap().value, "node-a");
}

#[tokio::test]
async fn test_all_endpoints_down_is_unavailable() {
    let broken = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let client = client_for(&[broken.uri().as_str()]);
    let error = client
        .create_if_absent(&key(), &token("node-a"), 30)
        .await
        .unwrap_err();
    assert!(matches!(error, CoordinationError::Unavailable { .. }));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_unexpected_status_without_etcd_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let client = client_for(&[server.uri().as_str()]);
    let error = client.get(&key()).await.unwrap_err();
    assert!(matches!(error, CoordinationError::Other { .. }));
    assert!(!error.is_retryable());
}
