//! HTTP application for hive-server
//!
//! Composes the health route and the JSON-RPC endpoint into one axum
//! [`Router`]. Cross-cutting behavior is an explicit layer stack, innermost
//! first: panic capture, JSON error mapping, request logging, tracing spans,
//! CORS.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{self, header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{ErrorDetail, ErrorResponse, Result};
use crate::health;
use crate::persistence::SessionProvider;
use crate::rpc::{self, RpcRegistry};
use crate::steemd::NodeClient;

// Upper bound when buffering an error body for rewriting.
const MAX_ERROR_BODY_SIZE: usize = 64 * 1024;

/// Everything a handler may touch. Cloned per request; all fields are `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<dyn SessionProvider>,
    pub node: Arc<dyn NodeClient>,
    pub rpc: Arc<RpcRegistry>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Arc<dyn SessionProvider>,
        node: Arc<dyn NodeClient>,
        rpc: RpcRegistry,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            node,
            rpc: Arc::new(rpc),
        }
    }

    /// Release the database pool. Call once, after the server loop ends.
    pub async fn close(&self) {
        self.db.close().await;
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware. Logs method, path, status and duration.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "api.request"
    );

    response
}

/// Render every 4xx/5xx response as an [`ErrorResponse`] JSON body,
/// including the empty or plain-text rejections produced by the framework.
/// In debug mode the failure's debug rendering is exposed as `detail`.
async fn error_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    let status = response.status();

    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let detail = parts.extensions.remove::<ErrorDetail>();
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    let bytes = to_bytes(body, MAX_ERROR_BODY_SIZE).await.unwrap_or_default();
    let text = String::from_utf8_lossy(&bytes).trim().to_string();

    let parsed = if is_json {
        serde_json::from_slice::<ErrorResponse>(&bytes).ok()
    } else {
        None
    };
    let mut error_body = parsed.unwrap_or_else(|| {
        let message = if text.is_empty() {
            status.canonical_reason().unwrap_or("Error").to_string()
        } else {
            text
        };
        ErrorResponse::new(status, message)
    });

    if status.is_server_error() {
        error!(
            status = status.as_u16(),
            error = %error_body.error,
            detail = ?detail.as_ref().map(|d| d.0.as_str()),
            "request failed"
        );
    }

    if state.config.server.debug {
        error_body.detail = detail.map(|d| d.0);
    }

    let payload = serde_json::to_vec(&error_body)
        .unwrap_or_else(|_| br#"{"error":"Internal Server Error","status_code":500}"#.to_vec());

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(payload))
}

/// Turn a handler panic into a plain 500; [`error_middleware`] formats it.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let mut response = (
        status,
        Json(ErrorResponse::new(status, "Internal Server Error")),
    )
        .into_response();
    response
        .extensions_mut()
        .insert(ErrorDetail(format!("handler panicked: {}", message)));
    response
}

async fn not_found() -> Response {
    let status = StatusCode::NOT_FOUND;
    (status, Json(ErrorResponse::new(status, "Not Found"))).into_response()
}

// ============================================================================
// API Server
// ============================================================================

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
}

/// Build the application router.
pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        // Non JSON-RPC routes
        .route("/health", get(health::health_check))
        // JSON-RPC route
        .route("/", post(rpc::handle_rpc))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(state.clone(), error_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Serve the application until Ctrl+C. Binding and serve errors are returned
/// to the caller; the caller owns pool shutdown.
pub async fn run_api_server(state: AppState) -> Result<()> {
    let host = state.config.server.host.as_str();
    let listener = tokio::net::TcpListener::bind((host, state.config.server.port)).await?;
    let addr = listener.local_addr()?;
    info!(
        %addr,
        namespace = %state.rpc.namespace(),
        methods = ?state.rpc.method_names(),
        debug = state.config.server.debug,
        "hive server listening"
    );

    let app = build_api_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("hive server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryDatabase;
    use crate::rpc::methods::default_registry;
    use crate::steemd::StaticNode;
    use axum_test::TestServer;
    use serde_json::Value;

    fn state(debug: bool) -> AppState {
        let mut config = Config::default();
        config.server.debug = debug;
        AppState::new(
            config,
            Arc::new(InMemoryDatabase::new(995)),
            Arc::new(StaticNode::new(1000)),
            default_registry(),
        )
    }

    async fn boom() -> &'static str {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let server = TestServer::new(build_api_router(state(false))).unwrap();
        let response = server.get("/nope").await;
        assert_eq!(response.status_code(), 404);
        let json: Value = response.json();
        assert_eq!(json["status_code"], 404);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn wrong_method_is_json_405() {
        let server = TestServer::new(build_api_router(state(false))).unwrap();
        let response = server.get("/").await;
        assert_eq!(response.status_code(), 405);
        let json: Value = response.json();
        assert_eq!(json["status_code"], 405);
    }

    #[tokio::test]
    async fn panics_become_json_500_with_debug_detail() {
        let state = state(true);
        let router = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(middleware::from_fn_with_state(state.clone(), error_middleware))
            .with_state(state);
        let server = TestServer::new(router).unwrap();

        let response = server.get("/boom").await;
        assert_eq!(response.status_code(), 500);
        let json: Value = response.json();
        assert_eq!(json["error"], "Internal Server Error");
        assert!(json["detail"].as_str().is_some_and(|d| d.contains("kaboom")));
    }
}
