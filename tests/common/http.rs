//! Throwaway HTTP server for webhook and object storage tests.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[derive(Default)]
struct ServerState {
    requests: Mutex<Vec<CapturedRequest>>,
    scripted_statuses: Mutex<VecDeque<u16>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    object_store: bool,
}

/// Records every request. In object store mode PUT/GET/DELETE behave like a
/// bucket keyed by request path; otherwise every request gets 200.
pub struct FakeHttpServer {
    pub base_url: String,
    state: Arc<ServerState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl FakeHttpServer {
    pub async fn webhook() -> Self {
        Self::spawn(false).await
    }

    pub async fn object_store() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(object_store: bool) -> Self {
        let state = Arc::new(ServerState {
            object_store,
            ..Default::default()
        });
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// The next requests get these statuses, in order, before normal handling resumes.
    pub fn respond_with(&self, statuses: &[u16]) {
        self.state
            .scripted_statuses
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.objects.lock().unwrap().get(path).cloned()
    }

    pub fn object_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.objects.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(CapturedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(String::from),
        headers: headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
            .collect(),
        body: body.to_vec(),
    });

    if let Some(status) = state.scripted_statuses.lock().unwrap().pop_front() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "scripted").into_response();
    }

    if !state.object_store {
        return StatusCode::OK.into_response();
    }

    let mut objects = state.objects.lock().unwrap();
    match method {
        Method::PUT => {
            objects.insert(path, body.to_vec());
            StatusCode::OK.into_response()
        }
        Method::GET => match objects.get(&path) {
            Some(data) => (StatusCode::OK, data.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Method::DELETE => match objects.remove(&path) {
            Some(_) => StatusCode::NO_CONTENT.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
