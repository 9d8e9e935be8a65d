// In-process stand-in for the MediaMTX control API and the signaling server

#![allow(dead_code)]

use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camrelay_server::models::RelaySettings;
use camrelay_server::services::RelayContext;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    requests: Vec<RecordedRequest>,
    paths: BTreeMap<String, Map<String, Value>>,
    scripted: VecDeque<u16>,
    token: Option<String>,
}

#[derive(Clone)]
pub struct FakeMediaMtx {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
}

impl FakeMediaMtx {
    pub async fn start() -> Self {
        Self::start_with_token(None).await
    }

    /// Requests without `Authorization: Bearer <token>` get 401
    pub async fn start_with_token(token: Option<&str>) -> Self {
        let state = Arc::new(Mutex::new(FakeState {
            token: token.map(String::from),
            ..FakeState::default()
        }));

        let handler_state = state.clone();
        let app = Router::new().fallback(move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let state = handler_state.clone();
            async move { handle(state, method, uri, headers, body) }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Answer the next requests with these statuses, in order, before normal handling resumes
    pub fn push_statuses(&self, statuses: &[u16]) {
        self.state.lock().unwrap().scripted.extend(statuses.iter().copied());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with(prefix))
            .collect()
    }

    pub fn path_names(&self) -> Vec<String> {
        self.state.lock().unwrap().paths.keys().cloned().collect()
    }

    pub fn path_config(&self, name: &str) -> Option<Map<String, Value>> {
        self.state.lock().unwrap().paths.get(name).cloned()
    }

    /// Relay settings pointing both MediaMTX and signaling at this fake
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            mediamtx_api_port: self.port(),
            mediamtx_streaming_port: 8554,
            mediamtx_timeout_secs: 2,
            mediamtx_max_retries: 3,
            mediamtx_backoff_ms: 10,
            signaling_port: self.port(),
            ..RelaySettings::default()
        }
    }

    pub fn relay(&self) -> RelayContext {
        RelayContext::from_settings(&self.settings())
    }
}

/// A local port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn short_backoff() -> Duration {
    Duration::from_millis(10)
}

fn handle(
    state: Arc<Mutex<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    let path = uri.path().to_string();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body_json: Option<Value> = serde_json::from_slice(&body).ok();

    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(String::from),
        authorization: authorization.clone(),
        body: body_json.clone(),
    });

    if let Some(status) = state.scripted.pop_front() {
        return status_only(status);
    }

    if let Some(token) = &state.token {
        if authorization.as_deref() != Some(format!("Bearer {token}").as_str()) {
            return status_only(401);
        }
    }

    let object = match body_json {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    if let Some(name) = path.strip_prefix("/v3/config/paths/add/") {
        if state.paths.contains_key(name) {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "path already exists" }))).into_response();
        }
        state.paths.insert(name.to_string(), object);
        return status_only(200);
    }

    if let Some(name) = path.strip_prefix("/v3/config/paths/patch/") {
        return match state.paths.get_mut(name) {
            Some(existing) => {
                existing.extend(object);
                status_only(200)
            }
            None => status_only(404),
        };
    }

    if let Some(name) = path.strip_prefix("/v3/config/paths/delete/") {
        return match state.paths.remove(name) {
            Some(_) => status_only(200),
            None => status_only(404),
        };
    }

    if path == "/v3/config/paths/list" {
        let items: Vec<Value> = state
            .paths
            .iter()
            .map(|(name, config)| {
                let mut item = config.clone();
                item.insert("name".to_string(), Value::String(name.clone()));
                Value::Object(item)
            })
            .collect();
        return Json(json!({ "itemCount": items.len(), "pageCount": 1, "items": items })).into_response();
    }

    if let Some(name) = path.strip_prefix("/v3/paths/get/") {
        return match state.paths.get(name) {
            Some(config) => Json(Value::Object(config.clone())).into_response(),
            None => status_only(404),
        };
    }

    // Signaling endpoints and anything else
    status_only(200)
}

fn status_only(status: u16) -> Response {
    StatusCode::from_u16(status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        .into_response()
}
