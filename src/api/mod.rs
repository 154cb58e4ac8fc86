//! Local HTTP API for the UI host and the MCP binary.
//! Query submission, manual navigation and browser state.

pub mod ws;

use crate::agent::browser::validate_url;
use crate::agent::types::{PageState, Response as QueryResponse};
use crate::error::{AppError, Result, RunError};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

pub type ApiState = Arc<AppState>;

type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

/// API key authentication middleware.
/// Skips authentication for GET /api/health so the MCP binary can probe the server.
async fn api_key_auth(
    State(expected_key): State<String>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    if request.uri().path() == "/api/health" {
        return Ok(next.run(request).await);
    }
    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(k) if k == expected_key => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/query", post(send_query))
        .route("/api/browser/navigate", post(browser_navigate))
        .route("/api/browser/state", get(browser_state))
        .route("/api/events", get(ws::ws_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Deserialize)]
struct QueryReq {
    text: String,
    #[serde(default)]
    page_content: Option<String>,
    #[serde(default)]
    current_url: Option<String>,
}

async fn send_query(
    State(state): State<ApiState>,
    Json(req): Json<QueryReq>,
) -> (StatusCode, Json<QueryResponse>) {
    match state
        .bridge
        .submit_query(req.text, req.page_content, req.current_url)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(e @ RunError::Busy) => (StatusCode::TOO_MANY_REQUESTS, Json(e.into())),
        Err(e) => (StatusCode::OK, Json(e.into())),
    }
}

#[derive(serde::Deserialize)]
struct NavigateReq {
    url: String,
}

async fn browser_navigate(
    State(state): State<ApiState>,
    Json(req): Json<NavigateReq>,
) -> ApiResult<Json<PageState>> {
    validate_url(&req.url).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let page = state
        .bridge
        .navigate_browser(req.url)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e))?;
    Ok(Json(page))
}

async fn browser_state(State(state): State<ApiState>) -> Json<PageState> {
    Json(state.bridge.get_browser_state())
}

/// Build the full API app (router + optional API key auth + CORS).
/// Used by run_server and by integration tests to exercise API key middleware.
pub fn app(state: ApiState, api_key: Option<String>) -> Router {
    use tower::limit::ConcurrencyLimitLayer;
    let base_router = router(state);
    if let Some(key) = api_key {
        base_router.route_layer(middleware::from_fn_with_state(key, api_key_auth))
    } else {
        base_router
    }
    .layer(ConcurrencyLimitLayer::new(32))
    .layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-api-key"),
            ]),
    )
}

pub async fn run_server(state: ApiState, port: u16, api_key: Option<String>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .map_err(|e| AppError::Server(format!("Failed to bind API port {}: {}", port, e)))?;
    let app = app(state, api_key);
    tracing::info!("browsion-query API listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Server(e.to_string()))?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
