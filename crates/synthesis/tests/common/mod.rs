//! A local stand-in for the Ollama generate endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

/// How the mock answers every request.
#[derive(Clone)]
pub enum MockReply {
    /// 200 with `{"response": <text>, "done": true}`.
    Model(String),
    /// Arbitrary status and raw body.
    Raw(StatusCode, String),
    /// Sleep, then answer like [`MockReply::Model`].
    Slow(Duration, String),
}

#[derive(Clone)]
struct MockState {
    reply: MockReply,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

pub struct MockOllama {
    pub url: String,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockOllama {
    /// Request bodies received so far.
    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn generate(State(state): State<MockState>, Json(body): Json<serde_json::Value>) -> Response {
    state.requests.lock().unwrap().push(body);
    match state.reply {
        MockReply::Model(text) => model_reply(text),
        MockReply::Raw(status, body) => (status, body).into_response(),
        MockReply::Slow(delay, text) => {
            tokio::time::sleep(delay).await;
            model_reply(text)
        }
    }
}

fn model_reply(text: String) -> Response {
    Json(serde_json::json!({ "model": "codellama", "response": text, "done": true })).into_response()
}

/// Serve `reply` on an ephemeral local port.
pub async fn spawn_mock(reply: MockReply) -> MockOllama {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        reply,
        requests: Arc::clone(&requests),
    };
    let app = Router::new()
        .route("/api/generate", post(generate))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockOllama {
        url: format!("http://{addr}"),
        requests,
    }
}

/// A model answer that passes validation.
pub fn valid_model_text() -> String {
    serde_json::json!({
        "python_script": "import bpy\nbpy.ops.mesh.primitive_cube_add()\nbpy.ops.export_scene.gltf(filepath='EXPORT_PATH', export_format='GLB')"
    })
    .to_string()
}
