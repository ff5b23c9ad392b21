//! Provider clients against a local stub standing in for the vendor API.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use realty_extract::llm::{
    GeminiClient, HttpTransport, MistralClient, ProviderClient, ProviderKind, ProviderPayload,
    RetryPolicy,
};
use serde_json::{Value, json};

/// Replies with the scripted statuses in order, then 200 with `body`.
#[derive(Debug)]
struct Stub {
    statuses: Mutex<Vec<StatusCode>>,
    body: Value,
    calls: AtomicUsize,
    api_keys: Mutex<Vec<String>>,
}

impl Stub {
    fn new(statuses: &[u16], body: Value) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(
                statuses
                    .iter()
                    .rev()
                    .map(|s| StatusCode::from_u16(*s).unwrap())
                    .collect(),
            ),
            body,
            calls: AtomicUsize::new(0),
            api_keys: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn reply(State(stub): State<Arc<Stub>>, headers: HeaderMap) -> impl IntoResponse {
    stub.calls.fetch_add(1, Ordering::SeqCst);
    let key = headers
        .get("authorization")
        .or_else(|| headers.get("x-goog-api-key"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    stub.api_keys.lock().unwrap().push(key);

    match stub.statuses.lock().unwrap().pop() {
        Some(status) => (status, Json(json!({ "error": "scripted" }))),
        None => (StatusCode::OK, Json(stub.body.clone())),
    }
}

async fn spawn(stub: Arc<Stub>) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(reply))
        .route("/v1beta/models/{action}", post(reply))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn transport(provider: ProviderKind) -> HttpTransport {
    let retry = RetryPolicy {
        max_attempts: 3,
        min_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };
    HttpTransport::new(provider, Duration::from_secs(5), 100, retry).unwrap()
}

fn chat_body(content: &str) -> Value {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}

fn payload() -> ProviderPayload {
    ProviderPayload::text("system", "user")
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let stub = Stub::new(&[500, 500, 500], chat_body("{}"));
    let base = spawn(Arc::clone(&stub)).await;
    let client = MistralClient::new(base, "test-key", transport(ProviderKind::Mistral));

    let err = client
        .send(&payload(), "mistral-large-latest")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ProviderCallError");
    assert!(err.to_string().contains("500"));
    assert_eq!(stub.calls(), 3);
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let stub = Stub::new(&[429, 503], chat_body(r#"{"a": 1}"#));
    let base = spawn(Arc::clone(&stub)).await;
    let client = MistralClient::new(base, "test-key", transport(ProviderKind::Mistral));

    let raw = client.send(&payload(), "mistral-large-latest").await.unwrap();

    assert_eq!(raw.text, r#"{"a": 1}"#);
    assert_eq!(raw.provider, ProviderKind::Mistral);
    assert_eq!(stub.calls(), 3);
    assert!(
        stub.api_keys
            .lock()
            .unwrap()
            .iter()
            .all(|k| k == "Bearer test-key")
    );
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let stub = Stub::new(&[401], chat_body("{}"));
    let base = spawn(Arc::clone(&stub)).await;
    let client = MistralClient::new(base, "bad-key", transport(ProviderKind::Mistral));

    let err = client
        .send(&payload(), "mistral-large-latest")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ProviderCallError");
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn test_gemini_concatenates_parts() {
    let body = json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": "{\"a\":" }, { "text": " 2}" }] }
        }]
    });
    let stub = Stub::new(&[500], body);
    let base = spawn(Arc::clone(&stub)).await;
    let client = GeminiClient::new(base, "g-key", transport(ProviderKind::Gemini));

    let raw = client.send(&payload(), "models/gemini-2.5-pro").await.unwrap();

    assert_eq!(raw.text, r#"{"a": 2}"#);
    assert_eq!(stub.calls(), 2);
    assert_eq!(stub.api_keys.lock().unwrap().last().unwrap(), "g-key");
}
