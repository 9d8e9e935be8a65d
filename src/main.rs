use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use log::{LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use subtle::ConstantTimeEq;
use tokio::signal;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use camrelay_server::models::RelaySettings;
use camrelay_server::services::{
    prune_logs, rotate_log, RegisterError, RelayContext, SessionRegistry, SessionRequest,
    SettingsManager, UnregisterOutcome, LOG_FILE_NAME,
};

const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 300;

// ============================================================================
// Application State
// ============================================================================

/// Tokens supplied through the environment; applied on top of settings, never saved
#[derive(Clone, Default)]
struct TokenOverrides {
    mediamtx: Option<String>,
    signaling: Option<String>,
}

impl TokenOverrides {
    fn relay_for(&self, settings: &RelaySettings) -> RelayContext {
        let mut effective = settings.clone();
        if let Some(token) = &self.mediamtx {
            effective.mediamtx_token = token.clone();
        }
        if let Some(token) = &self.signaling {
            effective.signaling_token = token.clone();
        }
        RelayContext::from_settings(&effective)
    }
}

#[derive(Clone)]
struct AppState {
    registry: Arc<SessionRegistry>,
    settings_manager: Arc<SettingsManager>,
    settings: Arc<RwLock<RelaySettings>>,
    relay: Arc<RwLock<RelayContext>>,
    token_overrides: TokenOverrides,
    setup_locked: Arc<AtomicBool>,
    auth_token: Option<String>,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

#[derive(Serialize)]
struct InvokeResponse {
    ok: bool,
    data: Option<Value>,
    error: Option<String>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let response = InvokeResponse {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    };
    (status, Json(response)).into_response()
}

// ============================================================================
// Logging
// ============================================================================

struct ServerLogger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl ServerLogger {
    fn new(log_dir: &std::path::Path, level: LevelFilter) -> Result<Self, Box<dyn std::error::Error>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))?;
        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");
        let line = format!(
            "[{date}][{time}][{}][{}] {}",
            record.target(),
            record.level(),
            record.args()
        );

        if let Ok(mut file) = self.file.try_lock() {
            let _ = writeln!(file, "{line}");
        }
        eprintln!("{line}");
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn init_logger(log_dir: &std::path::Path, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let logger = ServerLogger::new(log_dir, level)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

// ============================================================================
// Security Utilities
// ============================================================================

/// Constant-time token comparison to prevent timing attacks
fn verify_token(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Extract bearer token from Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_host(host: &str) -> IpAddr {
    host.parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

// ============================================================================
// CORS Configuration
// ============================================================================

fn build_cors_layer() -> CorsLayer {
    let cors_origins = env::var("CAMRELAY_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:*,http://127.0.0.1:*".to_string());

    let allowed_origins: Vec<String> = cors_origins
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin_str) = origin.to_str() else {
                return false;
            };

            allowed_origins.iter().any(|allowed| {
                if allowed.ends_with(":*") {
                    let prefix = allowed.trim_end_matches(":*");
                    origin_str.starts_with(prefix) && origin_str[prefix.len()..].starts_with(':')
                } else {
                    origin_str == allowed
                }
            })
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// ============================================================================
// Middleware
// ============================================================================

/// Bearer-token authentication; open when no token is configured
async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    match bearer_token(&headers) {
        Some(token) if verify_token(expected, token) => next.run(request).await,
        _ => error_response(StatusCode::UNAUTHORIZED, "Authentication required"),
    }
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match state.rate_limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
        ),
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "ok": true, "sessions": state.registry.len().await }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    uid: String,
    otp: String,
    linked_device: String,
    virtual_stream_url: String,
    status_code: u16,
    message: String,
}

/// POST /api/register - provision a source/virtual pair and keep the session
async fn register(State(state): State<AppState>, Json(request): Json<SessionRequest>) -> Response {
    let relay = state.relay.read().await.clone();
    let registry = state.registry.clone();

    // Provisioning runs to completion even if the caller disconnects
    let outcome = tokio::spawn(async move { registry.register(request, &relay).await }).await;

    match outcome {
        Ok(Ok(shared)) => {
            let session = shared.lock().await;
            let status = if session.ready() {
                StatusCode::CREATED
            } else {
                StatusCode::BAD_GATEWAY
            };
            let response = RegisterResponse {
                uid: session.uid().to_string(),
                otp: session.otp().to_string(),
                linked_device: session.linked_device().to_string(),
                virtual_stream_url: session.virtual_stream_url(),
                status_code: if session.ready() { 200 } else { 500 },
                message: session.status_message().to_string(),
            };
            (status, Json(response)).into_response()
        }
        Ok(Err(e @ RegisterError::InvalidRequest(_))) => {
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Ok(Err(e @ RegisterError::UidTaken(_))) => error_response(StatusCode::CONFLICT, &e.to_string()),
        Err(e) => {
            log::warn!("Registration task failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Registration failed")
        }
    }
}

#[derive(Deserialize)]
struct UnregisterRequest {
    uid: String,
    otp: String,
}

/// POST /api/unregister - remove a session authenticated by (uid, otp)
async fn unregister(
    State(state): State<AppState>,
    Json(request): Json<UnregisterRequest>,
) -> Response {
    match state.registry.unregister(&request.uid, &request.otp).await {
        UnregisterOutcome::Removed => Json(json!({ "ok": true })).into_response(),
        UnregisterOutcome::NotFound => {
            error_response(StatusCode::NOT_FOUND, "No session matches these credentials")
        }
        UnregisterOutcome::PathsRemain(status) => error_response(
            StatusCode::BAD_GATEWAY,
            &format!("Session removed but MediaMTX paths remain (status {status})"),
        ),
    }
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshots().await)
}

async fn get_session(State(state): State<AppState>, Path(uid): Path<String>) -> Response {
    match state.registry.find_by_uid(&uid).await {
        Some(shared) => Json(shared.lock().await.snapshot()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Session not found"),
    }
}

fn default_self_locking() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupRequest {
    mediamtx_protocol: Option<String>,
    mediamtx_host: Option<String>,
    mediamtx_api_port: Option<u16>,
    mediamtx_streaming_port: Option<u16>,
    mediamtx_token: Option<String>,
    signaling_protocol: Option<String>,
    signaling_host: Option<String>,
    signaling_port: Option<u16>,
    signaling_token: Option<String>,
    #[serde(default = "default_self_locking")]
    self_locking: bool,
}

impl SetupRequest {
    fn apply(self, settings: &mut RelaySettings) {
        if let Some(value) = self.mediamtx_protocol {
            settings.mediamtx_protocol = value;
        }
        if let Some(value) = self.mediamtx_host {
            settings.mediamtx_host = value;
        }
        if let Some(value) = self.mediamtx_api_port {
            settings.mediamtx_api_port = value;
        }
        if let Some(value) = self.mediamtx_streaming_port {
            settings.mediamtx_streaming_port = value;
        }
        if let Some(value) = self.mediamtx_token {
            settings.mediamtx_token = value;
        }
        if let Some(value) = self.signaling_protocol {
            settings.signaling_protocol = value;
        }
        if let Some(value) = self.signaling_host {
            settings.signaling_host = value;
        }
        if let Some(value) = self.signaling_port {
            settings.signaling_port = value;
        }
        if let Some(value) = self.signaling_token {
            settings.signaling_token = value;
        }
    }
}

/// POST /api/setup - point the relay at a MediaMTX/signaling pair; new sessions only
async fn setup(State(state): State<AppState>, Json(request): Json<SetupRequest>) -> Response {
    if state.setup_locked.load(Ordering::SeqCst) {
        return error_response(StatusCode::FORBIDDEN, "Setup is locked until restart");
    }

    let self_locking = request.self_locking;
    let mut settings = state.settings.write().await;
    let mut updated = settings.clone();
    request.apply(&mut updated);

    if let Err(e) = state.settings_manager.save(&updated) {
        log::warn!("Failed to persist setup: {e}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save settings");
    }

    let relay = state.token_overrides.relay_for(&updated);
    log::info!(
        "Relay reconfigured: MediaMTX {} (streaming port {}), signaling {}",
        relay.mediamtx,
        relay.streaming_port,
        relay.signaling.base()
    );
    *state.relay.write().await = relay;
    *settings = updated;

    if self_locking {
        state.setup_locked.store(true, Ordering::SeqCst);
        log::info!("Setup locked");
    }

    Json(json!({ "ok": true, "locked": self_locking })).into_response()
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Waits for Ctrl+C or SIGTERM, then removes every session's paths
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, removing session paths...");
    let removed = state.registry.shutdown().await;
    log::info!("Removed {removed} session(s), server shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment
    let data_dir = env::var("CAMRELAY_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let log_dir = env::var("CAMRELAY_LOG_DIR").unwrap_or_else(|_| format!("{data_dir}/logs"));
    let env_host = non_empty_env("CAMRELAY_HOST");
    let env_port: Option<u16> = env::var("CAMRELAY_PORT")
        .ok()
        .and_then(|value| value.parse().ok());
    let log_level = env::var("CAMRELAY_LOG_LEVEL")
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let data_dir_path = PathBuf::from(&data_dir);
    let log_dir_path = PathBuf::from(&log_dir);
    std::fs::create_dir_all(&data_dir_path)?;
    std::fs::create_dir_all(&log_dir_path)?;

    // Each run starts a fresh log file
    let rotated = rotate_log(&log_dir_path);
    init_logger(&log_dir_path, log_level)?;
    match rotated {
        Ok(Some(path)) => log::info!("Previous log moved to {}", path.display()),
        Ok(None) => {}
        Err(e) => log::warn!("{e}"),
    }

    let settings_manager = Arc::new(SettingsManager::new(data_dir_path));
    let settings = settings_manager.load().unwrap_or_else(|e| {
        log::warn!("Using default settings: {e}");
        RelaySettings::default()
    });

    match prune_logs(&log_dir_path, settings.log_retention_days) {
        Ok(0) => {}
        Ok(removed) => log::info!("Pruned {removed} rotated log file(s)"),
        Err(e) => log::warn!("Log pruning failed: {e}"),
    }

    let auth_token = non_empty_env("CAMRELAY_API_TOKEN").or_else(|| settings.backend_token());
    let token_overrides = TokenOverrides {
        mediamtx: non_empty_env("CAMRELAY_MEDIAMTX_TOKEN"),
        signaling: non_empty_env("CAMRELAY_SIGNALING_TOKEN"),
    };

    // Env vars take precedence over settings
    let host = env_host.unwrap_or_else(|| settings.backend_host.clone());
    let port = env_port.unwrap_or(settings.backend_port);

    let rate_limit = env::var("CAMRELAY_RATE_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE);
    let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(
        NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN),
    )));

    let relay = token_overrides.relay_for(&settings);
    log::info!(
        "MediaMTX API at {} (streaming port {}), signaling at {}",
        relay.mediamtx,
        relay.streaming_port,
        relay.signaling.base()
    );

    let state = AppState {
        registry: Arc::new(SessionRegistry::new()),
        settings_manager,
        settings: Arc::new(RwLock::new(settings)),
        relay: Arc::new(RwLock::new(relay)),
        token_overrides,
        setup_locked: Arc::new(AtomicBool::new(false)),
        auth_token,
        rate_limiter,
    };

    // Protected routes (require authentication)
    let protected_routes = Router::new()
        .route("/api/register", post(register))
        .route("/api/unregister", post(unregister))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:uid", get(get_session))
        .route("/api/setup", post(setup))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(health));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(build_cors_layer());

    let address = SocketAddr::new(parse_host(&host), port);
    log::info!("camrelay backend listening on http://{address}");
    if state.auth_token.is_some() {
        log::info!("  Authentication: enabled");
    } else {
        log::info!("  Authentication: disabled (no token configured)");
    }

    let listener = tokio::net::TcpListener::bind(address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}
