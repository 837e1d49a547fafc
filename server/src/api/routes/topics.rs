//! Topic management endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::api::types::ApiError;
use crate::broker::TopicRegistry;

/// Shared state for topic management endpoints
#[derive(Clone)]
pub struct TopicsApiState {
    pub registry: Arc<TopicRegistry>,
    pub shutdown: watch::Receiver<bool>,
}

/// Build topic management routes
pub fn routes(registry: Arc<TopicRegistry>, shutdown: watch::Receiver<bool>) -> Router<()> {
    let state = TopicsApiState { registry, shutdown };

    Router::new()
        .route("/topics", post(create_topic).get(list_topics))
        .route("/topics/{name}", delete(delete_topic))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateTopicRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateTopicResponse {
    pub name: String,
    pub created: bool,
}

/// Create a topic. Idempotent: an existing topic is reported as created
/// without resetting its counters or replay history.
pub async fn create_topic(
    State(state): State<TopicsApiState>,
    Json(req): Json<CreateTopicRequest>,
) -> Result<(StatusCode, Json<CreateTopicResponse>), ApiError> {
    if *state.shutdown.borrow() {
        return Err(ApiError::service_unavailable("Server is shutting down"));
    }

    state.registry.create(&req.name)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTopicResponse {
            name: req.name,
            created: true,
        }),
    ))
}

/// Delete a topic and close all of its subscribers
pub async fn delete_topic(
    State(state): State<TopicsApiState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if *state.shutdown.borrow() {
        return Err(ApiError::service_unavailable("Server is shutting down"));
    }

    state.registry.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List all topic names
pub async fn list_topics(State(state): State<TopicsApiState>) -> Json<Vec<String>> {
    Json(state.registry.list())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn make_router() -> (Router, Arc<TopicRegistry>, watch::Sender<bool>) {
        let registry = Arc::new(TopicRegistry::default());
        let (tx, rx) = watch::channel(false);
        (routes(Arc::clone(&registry), rx), registry, tx)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_topic_returns_201() {
        let (router, registry, _tx) = make_router();

        let response = router
            .oneshot(post_json("/topics", json!({"name": "news"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            body_json(response).await,
            json!({"name": "news", "created": true})
        );
        assert!(registry.exists("news"));
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_create_invalid_name_returns_400() {
        let (router, registry, _tx) = make_router();

        let response = router
            .oneshot(post_json("/topics", json!({"name": "bad name!"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_create_during_shutdown_returns_503() {
        let (router, _registry, tx) = make_router();
        tx.send(true).unwrap();

        let response = router
            .oneshot(post_json("/topics", json!({"name": "late"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_delete_topic() {
        let (router, registry, _tx) = make_router();
        registry.create("doomed").unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/topics/doomed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/topics/doomed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_topics() {
        let (router, registry, _tx) = make_router();
        registry.create("a").unwrap();
        registry.create("b").unwrap();

        let response = router
            .oneshot(Request::builder().uri("/topics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let mut names: Vec<String> =
            serde_json::from_value(body_json(response).await).unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        registry.shutdown_all().await;
    }
}
