//! HTTP / WebSocket surface
//!
//! `GET /` upgrades to a session socket. The remaining routes are read-only
//! views of the relay's state.

pub mod close_codes;
mod socket;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, info};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::pipeline::PipelineContext;
use crate::ratelimit::RateLimiter;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<PipelineContext>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(&ctx.config.rate_limit));
        Self { ctx, rate_limiter }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let web_root = state.ctx.config.web_root.clone();

    let mut router = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/close-codes/{code}", get(explain_close_code))
        .with_state(state);

    if let Some(root) = web_root {
        debug!("Serving static files from {:?}", root);
        router = router.fallback_service(ServeDir::new(root));
    }

    router.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    debug!("Upgrade request from {}", remote_addr);
    ws.on_upgrade(move |socket| socket::handle_socket(socket, remote_addr, state))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.ctx.registry.len(),
        "queue": {
            "enabled": state.ctx.queue.is_enabled(),
            "running": state.ctx.queue.running(),
            "waiting": state.ctx.queue.waiting(),
        },
    }))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let mut sessions = state.ctx.registry.list();
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(sessions)
}

async fn explain_close_code(Path(code): Path<u16>) -> impl IntoResponse {
    Json(json!({
        "code": code,
        "explanation": close_codes::explain(code),
    }))
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(state.ctx.config.bind.as_str()).await?;
    info!("Listening on {}", listener.local_addr()?);

    let purge = state.ctx.config.rate_limit.enabled.then(|| {
        let limiter = state.rate_limiter.clone();
        let period = state.ctx.config.rate_limit.window();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                limiter.purge_expired();
            }
        })
    });

    let app = router(state);
    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await;

    if let Some(purge) = purge {
        purge.abort();
    }
    info!("Server stopped");
    result
}
