//! Webhook listener.
//!
//! Exposes exactly one `POST` route. Each request body is parsed as one
//! update and pushed onto the [`UpdateQueue`]; the response is sent without
//! waiting for dispatch.
//!
//! | Request | Response |
//! |---------|----------|
//! | `POST {path}` with a valid update | `200 {"ok":true}` |
//! | `POST {path}` with a bad secret token | `401` |
//! | `POST {path}` with a malformed body | `500` |
//! | `POST {path}` after the queue closed | `503` |
//! | other method on `{path}` | `405` |
//! | any other path | `404` |
//!
//! The path is compared literally against the request path, so characters
//! such as `{`, `:` or `*` carry no routing meaning.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use nectar_core::{TransportError, TransportResult, Update, UpdateQueue};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Header carrying the secret token registered with `setWebhook`.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Webhook listener parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Listen address, e.g. `0.0.0.0:8443`.
    pub addr: String,
    /// Route path; a leading `/` is added if missing.
    pub path: String,
    /// When set, requests must carry it in [`SECRET_TOKEN_HEADER`].
    pub secret_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8443".to_string(),
            path: "/webhook".to_string(),
            secret_token: None,
        }
    }
}

/// Shared state for the webhook route.
struct WebhookState {
    path: String,
    queue: UpdateQueue,
    secret_token: Option<String>,
}

/// Builds and binds the webhook listener.
#[derive(Debug, Clone)]
pub struct WebhookServer {
    config: WebhookConfig,
}

impl WebhookServer {
    pub fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// The normalized route path.
    pub fn path(&self) -> String {
        normalize_path(&self.config.path)
    }

    /// The axum router, without binding a socket.
    pub fn router(&self, queue: UpdateQueue) -> Router {
        let state = Arc::new(WebhookState {
            path: self.path(),
            queue,
            secret_token: self.config.secret_token.clone(),
        });
        Router::new().fallback(route_request).with_state(state)
    }

    /// Binds the listener and serves until `cancel` fires.
    pub async fn bind(
        &self,
        queue: UpdateQueue,
        cancel: CancellationToken,
    ) -> TransportResult<WebhookHandle> {
        let router = self.router(queue);
        let listener = tokio::net::TcpListener::bind(&self.config.addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: self.config.addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, path = %self.path(), "Webhook server listening");

        let task = tokio::spawn(async move {
            let server =
                axum::serve(listener, router).with_graceful_shutdown(cancel.cancelled_owned());
            if let Err(e) = server.await {
                error!(error = %e, "Webhook server error");
            }
            info!("Webhook server stopped");
        });

        Ok(WebhookHandle { local_addr, task })
    }
}

/// A running webhook listener.
#[derive(Debug)]
pub struct WebhookHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl WebhookHandle {
    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the server task to end after cancellation.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Webhook server task failed");
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn reject(status: StatusCode, description: &str) -> Response {
    (status, Json(json!({ "ok": false, "description": description }))).into_response()
}

/// Matches the configured path literally, then hands POSTs to
/// [`receive_update`].
async fn route_request(
    State(state): State<Arc<WebhookState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if uri.path() != state.path {
        return StatusCode::NOT_FOUND.into_response();
    }
    if method != Method::POST {
        let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("POST"));
        return response;
    }
    receive_update(&state, &headers, body).await
}

async fn receive_update(state: &WebhookState, headers: &HeaderMap, body: Bytes) -> Response {
    if let Some(expected) = &state.secret_token {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            warn!("Rejected webhook request with a wrong secret token");
            return reject(StatusCode::UNAUTHORIZED, "invalid secret token");
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            error!(error = %e, len = body.len(), "Malformed webhook payload");
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "malformed update");
        }
    };

    let update_id = update.update_id;
    match state.queue.push(update).await {
        Ok(outcome) => {
            debug!(update_id, ?outcome, "Webhook update received");
            (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
        }
        Err(closed) => {
            warn!(update_id, "Webhook update refused: {closed}");
            reject(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
        }
    }
}
