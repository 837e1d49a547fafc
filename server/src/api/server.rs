//! API server initialization

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::routes::{health, metrics, stats, topics};
use super::types::handle_404;
use super::ws;
use crate::broker::TopicRegistry;
use crate::core::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until the shutdown signal fires. Returns CoreApp so the
    /// caller can run the drain sequence.
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;

        let shutdown = app.shutdown.clone();
        let addr = app.config.server.bind_addr()?;
        let router = build_router(Arc::clone(&app.registry), shutdown.subscribe());

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}

/// Assemble the full route tree: control plane plus the WebSocket endpoint
pub fn build_router(registry: Arc<TopicRegistry>, shutdown: watch::Receiver<bool>) -> Router {
    Router::new()
        .merge(topics::routes(Arc::clone(&registry), shutdown.clone()))
        .merge(health::routes(Arc::clone(&registry)))
        .merge(stats::routes(Arc::clone(&registry)))
        .merge(metrics::routes(Arc::clone(&registry)))
        .merge(ws::routes(registry, shutdown))
        .fallback(handle_404)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
}
