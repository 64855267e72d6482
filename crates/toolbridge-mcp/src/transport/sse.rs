//! HTTP server transport: POST /mcp with JSON or single-event SSE replies,
//! optional token auth, and /health.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::protocol::ProtocolHandler;
use crate::types::{error_codes, mcp_error_codes, McpError, McpResult};

use super::framing::{self, Framing, SSE_CONTENT_TYPE};

/// Shared server state passed to all handlers via axum State.
pub struct ServerState {
    pub token: Option<String>,
    pub handler: ProtocolHandler,
}

/// HTTP binding of the protocol for web and gateway clients.
pub struct SseServer {
    state: Arc<ServerState>,
}

impl SseServer {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self::with_token(handler, None)
    }

    /// Require `Authorization: Bearer <token>` or `x-api-key: <token>`.
    pub fn with_token(handler: ProtocolHandler, token: Option<String>) -> Self {
        Self {
            state: Arc::new(ServerState { token, handler }),
        }
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();

        Router::new()
            .route("/mcp", post(handle_request).get(handle_connect))
            .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
            .route("/health", get(handle_health))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(state)
    }

    /// Bind `addr` and serve until the task is dropped.
    pub async fn run(&self, addr: &str) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(McpError::Io)?;
        tracing::info!("HTTP transport listening on {addr}");
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: tokio::net::TcpListener) -> McpResult<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }
}

fn error_body(code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": { "code": code, "message": message }
    })
}

/// Auth middleware. Checks the token if one is configured.
/// /health is routed outside this layer.
async fn auth_layer(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.token {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        let authorized = bearer.or(api_key).is_some_and(|token| token == expected);

        if !authorized {
            tracing::warn!("rejecting unauthenticated request");
            return (
                StatusCode::UNAUTHORIZED,
                AxumJson(error_body(mcp_error_codes::UNAUTHORIZED, "Unauthorized")),
            )
                .into_response();
        }
    }

    next.run(request).await
}

/// True when the client's Accept header ranks SSE ahead of plain JSON.
fn prefers_sse(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let position = |mime: &str| accept.split(',').position(|part| part.trim().starts_with(mime));
    match (position(SSE_CONTENT_TYPE), position("application/json")) {
        (Some(sse), Some(json)) => sse < json,
        (Some(_), None) => true,
        _ => false,
    }
}

fn sse_response(value: &Value) -> Response {
    match framing::encode_value(value, Framing::Sse) {
        Ok(event) => (
            [
                (header::CONTENT_TYPE, SSE_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            event,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            AxumJson(error_body(error_codes::INTERNAL_ERROR, &e.to_string())),
        )
            .into_response(),
    }
}

/// One envelope in, at most one envelope out. Notifications get 202.
async fn handle_request(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let msg = match framing::parse_message(&body) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("Parse error: {e}");
            return (
                StatusCode::BAD_REQUEST,
                AxumJson(error_body(error_codes::PARSE_ERROR, "Parse error")),
            )
                .into_response();
        }
    };

    match state.handler.handle_message(msg).await {
        Some(reply) if prefers_sse(&headers) => sse_response(&reply),
        Some(reply) => AxumJson(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// GET /mcp: a single connection event, for clients that probe the stream.
async fn handle_connect() -> Response {
    sse_response(&json!({ "type": "connection", "status": "connected" }))
}

/// Health check endpoint, outside auth.
async fn handle_health(State(state): State<Arc<ServerState>>) -> AxumJson<Value> {
    AxumJson(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.handler.registry().len(),
        "readonly": state.handler.config().is_readonly(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_prefers_sse() {
        assert!(prefers_sse(&accept("text/event-stream")));
        assert!(prefers_sse(&accept("text/event-stream, application/json")));
        assert!(!prefers_sse(&accept("application/json, text/event-stream")));
        assert!(!prefers_sse(&accept("*/*")));
        assert!(!prefers_sse(&HeaderMap::new()));
    }
}
