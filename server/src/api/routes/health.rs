//! Health check endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::broker::TopicRegistry;

#[derive(Clone)]
pub struct HealthApiState {
    pub registry: Arc<TopicRegistry>,
}

pub fn routes(registry: Arc<TopicRegistry>) -> Router<()> {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthApiState { registry })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub topic_count: usize,
    pub active_subscriber_count: usize,
}

/// Health check endpoint
pub async fn health(State(state): State<HealthApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: state.registry.uptime_seconds(),
        topic_count: state.registry.topic_count(),
        active_subscriber_count: state.registry.total_subscribers(),
    })
}
