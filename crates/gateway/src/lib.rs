//! HTTP gateway for Parley.
//!
//! Exposes the chat endpoint (text or recorded speech), a transcription-only
//! endpoint, session issue and inspection, a health check and the embedded web page.
//!
//! Built on Axum.

pub mod api;
pub mod frontend;

use axum::extract::{DefaultBodyLimit, State};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use parley_config::GatewayConfig;
use parley_session::{SessionManager, SpeechPipeline};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Shared application state, built once at startup.
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    /// `None` when speech recognition is disabled.
    pub speech: Option<Arc<SpeechPipeline>>,
}

pub type SharedState = Arc<AppState>;

/// Build the router with every route and layer.
///
/// Layers applied:
/// - HTTP trace logging
/// - CORS from `gateway.allowed_origins` (`*` = any origin)
/// - Request body size limit
/// - Per-request timeout (504 on expiry)
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(api::chat_handler))
        .route("/transcribe", post(api::transcribe_handler))
        .route("/sessions", post(api::new_session_handler))
        .route("/sessions/{id}", get(api::session_handler))
        .with_state(state)
        .merge(frontend::frontend_router())
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(middleware::from_fn_with_state(timeout, timeout_middleware))
        .layer(cors_layer(&config.allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            HeaderName::from_static(api::SESSION_HEADER),
        ])
        .max_age(Duration::from_secs(24 * 60 * 60))
}

/// Abort requests that outlive the configured budget.
///
/// Dropping the handler future mid-call is safe: history is only appended
/// after the backend call returns.
async fn timeout_middleware(
    State(timeout): State<Duration>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(timeout, next.run(req)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            warn!(path = %path, timeout_secs = timeout.as_secs(), "Request timed out");
            Err(StatusCode::GATEWAY_TIMEOUT)
        }
    }
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: SharedState,
    config: &GatewayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Gateway stopped");
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
