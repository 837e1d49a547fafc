//! Per-topic statistics endpoint

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::broker::{TopicRegistry, TopicStats};

#[derive(Clone)]
pub struct StatsApiState {
    pub registry: Arc<TopicRegistry>,
}

pub fn routes(registry: Arc<TopicRegistry>) -> Router<()> {
    Router::new()
        .route("/stats", get(stats))
        .with_state(StatsApiState { registry })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub topics: BTreeMap<String, TopicStats>,
}

/// Message and subscriber counts per topic
pub async fn stats(State(state): State<StatsApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        topics: state.registry.stats(),
    })
}
