// tests/api_tests.rs
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use misskey_streamer::api::{ApiClient, ApiError};

async fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&format!("{}/", server.uri()), "secret-token").unwrap()
}

#[tokio::test]
async fn merges_token_into_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/notes/timeline"))
        .and(body_json(json!({"i": "secret-token", "limit": 10})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "n1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let notes = api.request("notes/timeline", json!({"limit": 10})).await.unwrap();
    assert_eq!(notes, json!([{"id": "n1"}]));
}

#[tokio::test]
async fn null_body_sends_only_the_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/i"))
        .and(body_json(json!({"i": "secret-token"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1", "username": "alice"})))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let me = api.request("i", Value::Null).await.unwrap();
    assert_eq!(me["username"], "alice");
}

#[tokio::test]
async fn non_object_body_is_rejected_before_sending() {
    let server = MockServer::start().await;
    let api = client_for(&server).await;

    let result = api.request("i", json!(["not", "an", "object"])).await;
    assert!(matches!(result, Err(ApiError::InvalidBody)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn error_status_carries_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/users/show"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "No such user.", "code": "NO_SUCH_USER", "id": "4362f8dc"}
        })))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    match api.request("users/show", json!({"userId": "nobody"})).await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "No such user.");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn error_status_with_plain_body_keeps_the_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let err = api.request("i", json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), "API request failed: 502 - Bad Gateway");
}

#[tokio::test]
async fn embedded_error_object_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"message": "Rate limit exceeded.", "code": "RATE_LIMIT_EXCEEDED"}
        })))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    match api.request("notes/create", json!({"text": "hi"})).await {
        Err(ApiError::Remote { code, message }) => {
            assert_eq!(code, "RATE_LIMIT_EXCEEDED");
            assert_eq!(message, "Rate limit exceeded.");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_and_non_json_successes_are_empty_objects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/notes/reactions/create"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    let reacted = api
        .request("notes/reactions/create", json!({"noteId": "n1", "reaction": ":+1:"}))
        .await
        .unwrap();
    assert_eq!(reacted, json!({}));
    assert_eq!(api.request("ping", json!({})).await.unwrap(), json!({}));
}

#[test]
fn debug_output_hides_the_token() {
    let api = ApiClient::new("misskey.example", "secret-token").unwrap();
    let rendered = format!("{api:?}");
    assert!(rendered.contains("https://misskey.example"));
    assert!(!rendered.contains("secret-token"));
}
