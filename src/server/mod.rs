//! HTTP control surface
//!
//! `/health` and `/` are public; `/session`, `/send` and `/logout` sit behind
//! the bearer token.

mod auth;
mod routes;

use anyhow::{Context, Result};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{SecretString, ServerConfig};
use crate::whatsapp::Session;

#[derive(Clone)]
pub struct AppState {
    session: Arc<Session>,
    auth_token: Arc<SecretString>,
    restart_on_logout: bool,
}

impl AppState {
    pub fn new(session: Arc<Session>, auth_token: SecretString, restart_on_logout: bool) -> Self {
        Self {
            session,
            auth_token: Arc::new(auth_token),
            restart_on_logout,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/session", get(routes::session))
        .route("/send", post(routes::send))
        .route("/logout", post(routes::logout))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .route("/", get(routes::index))
        .merge(protected)
        .with_state(state)
}

/// Serve until `shutdown` fires; in-flight requests are allowed to finish.
pub async fn serve(config: &ServerConfig, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {addr}"))?;

    tracing::info!("HTTP on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")
}
