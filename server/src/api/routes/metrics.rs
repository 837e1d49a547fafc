//! Metrics snapshot endpoint for the observability dashboard

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::broker::{MetricsSnapshot, TopicRegistry};

#[derive(Clone)]
pub struct MetricsApiState {
    pub registry: Arc<TopicRegistry>,
}

pub fn routes(registry: Arc<TopicRegistry>) -> Router<()> {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(MetricsApiState { registry })
}

/// Point-in-time snapshot of per-topic and global delivery metrics
pub async fn metrics(State(state): State<MetricsApiState>) -> Json<MetricsSnapshot> {
    Json(state.registry.metrics_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_shape() {
        let registry = Arc::new(TopicRegistry::default());
        registry.create("measured").unwrap();
        registry.publish("measured", json!({})).unwrap();
        let router = routes(Arc::clone(&registry));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        let topic = &body["topics"]["measured"];
        for key in [
            "queue_depth",
            "queue_max_size",
            "batch_size_avg",
            "messages_published",
            "messages_delivered",
            "messages_dropped",
            "subscriber_count",
        ] {
            assert!(topic.get(key).is_some(), "missing key {}", key);
        }
        assert!(topic["latency_ms"].get("p95").is_some());
        assert_eq!(body["global"]["total_published"], 1);
        assert_eq!(body["global"]["active_topics"], 1);
        registry.shutdown_all().await;
    }
}
