use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub api_key: Option<String>,
    pub body: Value,
}

/// In-process stand-in for the generateContent endpoint.
pub struct FakeGemini {
    pub base_url: String,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl FakeGemini {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

struct Reply {
    status: StatusCode,
    delay: Option<Duration>,
    body: Value,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

pub async fn spawn(status: StatusCode, body: Value) -> FakeGemini {
    serve(status, body, None).await
}

/// Like [`spawn`], but holds every response back for `delay`.
pub async fn spawn_delayed(delay: Duration, body: Value) -> FakeGemini {
    serve(StatusCode::OK, body, Some(delay)).await
}

async fn serve(status: StatusCode, body: Value, delay: Option<Duration>) -> FakeGemini {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let reply = Arc::new(Reply {
        status,
        delay,
        body,
        calls: calls.clone(),
    });

    let app = Router::new()
        .route("/v1beta/models/{method}", post(generate_content))
        .with_state(reply);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeGemini {
        base_url: format!("http://{addr}/v1beta"),
        calls,
    }
}

pub fn text_reply(text: &str) -> Value {
    serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }],
        "usageMetadata": {
            "promptTokenCount": 6,
            "candidatesTokenCount": 4,
            "totalTokenCount": 10
        }
    })
}

async fn generate_content(
    State(reply): State<Arc<Reply>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let api_key = headers
        .get("x-goog-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    reply.calls.lock().unwrap().push(RecordedCall {
        method,
        api_key,
        body,
    });

    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    (reply.status, Json(reply.body.clone()))
}
