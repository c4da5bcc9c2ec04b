//! Integration tests for the Ollama client against a mock `/api/chat`.

use relay_bot::{ChatRequest, InferenceClient, InferenceError, OllamaClient, Turn};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(stream: bool) -> ChatRequest {
    ChatRequest {
        model: "llama3".into(),
        messages: vec![Turn::user("What is 2+2?")],
        stream,
    }
}

fn client(server: &MockServer) -> OllamaClient {
    OllamaClient::new(&server.uri(), Duration::from_secs(5))
}

#[tokio::test]
async fn sends_wire_shape_and_reads_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_json(json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "What is 2+2?"}],
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "4"},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let answer = client(&server).chat(&request(false)).await.unwrap();
    assert_eq!(answer, "4");
}

#[tokio::test]
async fn decorated_body_is_trimmed_to_the_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"garbage-prefix{"message":{"content":"hi"}}garbage-suffix"#),
        )
        .mount(&server)
        .await;

    assert_eq!(client(&server).chat(&request(false)).await.unwrap(), "hi");
}

#[tokio::test]
async fn status_codes_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model ran out of context"))
        .mount(&server)
        .await;

    let err = client(&server).chat(&request(false)).await.unwrap_err();
    assert_eq!(err, InferenceError::Status(500));
}

#[tokio::test]
async fn missing_model_is_a_plain_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "model \"llama3\" not found"
        })))
        .mount(&server)
        .await;

    let err = client(&server).chat(&request(false)).await.unwrap_err();
    assert_eq!(err, InferenceError::Status(404));
}

#[tokio::test]
async fn streamed_reply_is_concatenated() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"message":{"role":"assistant","content":"2+2 "},"done":false}"#,
        "\n",
        r#"{"message":{"role":"assistant","content":"is 4"},"done":false}"#,
        "\n",
        r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        "\n"
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_json(json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "What is 2+2?"}],
            "stream": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    assert_eq!(client(&server).chat(&request(true)).await.unwrap(), "2+2 is 4");
}

#[tokio::test]
async fn non_json_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("upstream hiccup"))
        .mount(&server)
        .await;

    let err = client(&server).chat(&request(false)).await.unwrap_err();
    assert!(matches!(err, InferenceError::Parse(_)));
}

#[tokio::test]
async fn slow_server_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"content": "late"}}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), Duration::from_millis(200));
    let err = client.chat(&request(false)).await.unwrap_err();
    assert!(matches!(err, InferenceError::Transport(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2));
    let err = client.chat(&request(false)).await.unwrap_err();
    assert!(matches!(err, InferenceError::Transport(_)));
}
