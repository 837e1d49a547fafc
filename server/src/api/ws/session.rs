//! WebSocket session handling
//!
//! Each connection gets a unique client id, a reader loop that parses and
//! routes inbound frames, and a writer task that drains a bounded outbound
//! queue into the socket. Everything the server sends to the client (acks,
//! errors, replay prefixes, live events) goes through that one queue, so
//! frame order on the wire matches enqueue order. A stalled client fills
//! the queue, which back-pressures live delivery into the per-subscriber
//! send timeout; the broker then detaches the subscriber as slow.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::api::types::ApiError;
use crate::broker::{Envelope, EventSink, SinkError, TopicRegistry};
use crate::core::constants::WS_OUTBOUND_CAPACITY;

use super::frames::{InboundFrame, OutboundFrame};

/// Shared state for the WebSocket endpoint
#[derive(Clone)]
pub struct WsApiState {
    pub registry: Arc<TopicRegistry>,
    pub shutdown: watch::Receiver<bool>,
}

/// Build the WebSocket route
pub fn routes(registry: Arc<TopicRegistry>, shutdown: watch::Receiver<bool>) -> Router<()> {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(WsApiState { registry, shutdown })
}

/// Upgrade handler; refused while shutting down
pub async fn ws_upgrade(State(state): State<WsApiState>, ws: WebSocketUpgrade) -> Response {
    if *state.shutdown.borrow() {
        return ApiError::service_unavailable("Server is shutting down").into_response();
    }
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Broker-facing sink for one session: live batches are forwarded into the
/// session's outbound queue, awaiting capacity if the client is behind.
struct WsSink {
    tx: mpsc::Sender<OutboundFrame>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn send_batch(&self, batch: &[Arc<Envelope>]) -> Result<(), SinkError> {
        for envelope in batch {
            self.tx
                .send(OutboundFrame::event(envelope))
                .await
                .map_err(|_| SinkError::Closed)?;
        }
        Ok(())
    }
}

async fn handle_session(socket: WebSocket, state: WsApiState) {
    let client_id = Uuid::new_v4();
    tracing::info!(%client_id, "WebSocket connected");

    let (ws_tx, ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(WS_OUTBOUND_CAPACITY);
    let writer = tokio::spawn(write_loop(ws_tx, rx));

    let _ = tx
        .send(OutboundFrame::Info {
            message: format!("Connected with client_id: {}", client_id),
        })
        .await;

    receive_loop(&state, client_id, &tx, ws_rx).await;

    state.registry.cleanup_client(client_id);
    // Dropping the last sender ends the writer once subscriber handles are
    // gone too (cleanup_client above removed them from every topic).
    drop(tx);
    let _ = writer.await;
    tracing::info!(%client_id, "WebSocket disconnected");
}

/// Wait until the shutdown flag flips to `true`. Kept as its own async fn
/// (rather than inlined in a `select!` branch) so the `watch::Ref` borrowed
/// from `borrow()` is dropped before any `.await`, keeping the future `Send`.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Read frames until the client disconnects or the server shuts down.
async fn receive_loop(
    state: &WsApiState,
    client_id: Uuid,
    tx: &mpsc::Sender<OutboundFrame>,
    mut ws_rx: SplitStream<WebSocket>,
) {
    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    // A failure routing one frame must not tear down the
                    // session; the client gets an INTERNAL error instead.
                    let handled = std::panic::AssertUnwindSafe(
                        handle_frame(state, client_id, tx, text.as_str()),
                    )
                    .catch_unwind()
                    .await;
                    if handled.is_err() {
                        tracing::error!(%client_id, "Error handling frame");
                        let _ = tx
                            .send(OutboundFrame::error("INTERNAL", "Internal server error"))
                            .await;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let _ = tx
                        .send(OutboundFrame::error(
                            "INVALID_MESSAGE",
                            "Message must be text",
                        ))
                        .await;
                }
                // Protocol-level ping/pong is answered by the transport
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(%client_id, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    }
}

/// Parse and route one inbound text frame. Frame errors are answered with
/// an `error` frame and never terminate the session.
async fn handle_frame(
    state: &WsApiState,
    client_id: Uuid,
    tx: &mpsc::Sender<OutboundFrame>,
    raw: &str,
) {
    let frame = match InboundFrame::parse(raw) {
        Ok(frame) => frame,
        Err(err) => {
            let _ = tx.send(err.into()).await;
            return;
        }
    };

    match frame {
        InboundFrame::Subscribe { topic, last_n } => {
            handle_subscribe(state, client_id, tx, topic, last_n).await;
        }
        InboundFrame::Unsubscribe { topic } => {
            if state.registry.unsubscribe(&topic, client_id) {
                let _ = tx
                    .send(OutboundFrame::ack(
                        "unsubscribe",
                        &topic,
                        format!("Unsubscribed from topic '{}'", topic),
                    ))
                    .await;
            } else {
                let _ = tx
                    .send(OutboundFrame::error(
                        "NOT_SUBSCRIBED",
                        format!("Not subscribed to topic '{}'", topic),
                    ))
                    .await;
            }
        }
        InboundFrame::Publish { topic, data } => {
            match state.registry.publish(&topic, data) {
                Ok(subscriber_count) => {
                    let _ = tx
                        .send(OutboundFrame::ack(
                            "publish",
                            &topic,
                            format!("Published to {} subscriber(s)", subscriber_count),
                        ))
                        .await;
                }
                Err(_) => {
                    let _ = tx
                        .send(OutboundFrame::error(
                            "TOPIC_NOT_FOUND",
                            format!("Topic '{}' does not exist", topic),
                        ))
                        .await;
                }
            }
        }
        InboundFrame::Ping => {
            let _ = tx.send(OutboundFrame::Pong).await;
        }
    }
}

/// Attach to the topic, then queue the ack and replay prefix before
/// opening the delivery gate, so the wire order is always
/// ack → replay events → live events.
async fn handle_subscribe(
    state: &WsApiState,
    client_id: Uuid,
    tx: &mpsc::Sender<OutboundFrame>,
    topic: String,
    last_n: u32,
) {
    let sink = Arc::new(WsSink { tx: tx.clone() });
    match state
        .registry
        .subscribe(&topic, client_id, sink, last_n as usize)
    {
        Err(_) => {
            let _ = tx
                .send(OutboundFrame::error(
                    "TOPIC_NOT_FOUND",
                    format!("Topic '{}' does not exist", topic),
                ))
                .await;
        }
        Ok(outcome) => {
            let _ = tx
                .send(OutboundFrame::ack(
                    "subscribe",
                    &topic,
                    format!("Subscribed to topic '{}'", topic),
                ))
                .await;
            for envelope in &outcome.replay {
                let _ = tx.send(OutboundFrame::event(envelope)).await;
            }
            outcome.gate.open();
        }
    }
}

/// Drain the outbound queue into the socket.
async fn write_loop(
    mut socket: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = rx.recv().await {
        match serde_json::to_string(&frame) {
            Ok(text) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize outbound frame"),
        }
    }
    let _ = socket.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn make_state() -> WsApiState {
        // The sender may drop: the tests here never wait on the shutdown
        // signal, only the registry routing below it.
        let (_tx, shutdown) = watch::channel(false);
        WsApiState {
            registry: Arc::new(TopicRegistry::default()),
            shutdown,
        }
    }

    fn channel() -> (mpsc::Sender<OutboundFrame>, mpsc::Receiver<OutboundFrame>) {
        mpsc::channel(WS_OUTBOUND_CAPACITY)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<OutboundFrame>) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound channel closed");
        serde_json::to_value(&frame).unwrap()
    }

    fn drain_frames(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::to_value(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_subscribe_unknown_topic() {
        let state = make_state();
        let (tx, mut rx) = channel();

        handle_frame(
            &state,
            Uuid::new_v4(),
            &tx,
            r#"{"type":"subscribe","topic":"ghost"}"#,
        )
        .await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "TOPIC_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_subscribe_ack_then_replay_then_live() {
        let state = make_state();
        state.registry.create("hist").unwrap();
        for i in 0..30 {
            state.registry.publish("hist", json!({ "seq": i })).unwrap();
        }
        // Let the delivery worker drain the backlog
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (tx, mut rx) = channel();
        let client_id = Uuid::new_v4();
        handle_frame(
            &state,
            client_id,
            &tx,
            r#"{"type":"subscribe","topic":"hist","last_n":20}"#,
        )
        .await;

        let ack = next_frame(&mut rx).await;
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["request_type"], "subscribe");

        let mut replay_seqs = Vec::new();
        for _ in 0..20 {
            let event = next_frame(&mut rx).await;
            assert_eq!(event["type"], "event");
            replay_seqs.push(event["data"]["seq"].as_i64().unwrap());
        }
        assert_eq!(replay_seqs, (10..30).collect::<Vec<i64>>());

        // New publishes arrive as live events, disjoint from the replay
        for i in 30..40 {
            state.registry.publish("hist", json!({ "seq": i })).unwrap();
        }
        let mut live_seqs = Vec::new();
        for _ in 0..10 {
            let event = next_frame(&mut rx).await;
            assert_eq!(event["type"], "event");
            live_seqs.push(event["data"]["seq"].as_i64().unwrap());
        }
        assert_eq!(live_seqs, (30..40).collect::<Vec<i64>>());

        state.registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_publish_acks_with_subscriber_count() {
        let state = make_state();
        state.registry.create("t").unwrap();
        let (tx, mut rx) = channel();

        handle_frame(
            &state,
            Uuid::new_v4(),
            &tx,
            r#"{"type":"publish","topic":"t","data":{"x":1}}"#,
        )
        .await;

        let ack = next_frame(&mut rx).await;
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["request_type"], "publish");
        assert_eq!(ack["message"], "Published to 0 subscriber(s)");
        state.registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_publish_unknown_topic() {
        let state = make_state();
        let (tx, mut rx) = channel();

        handle_frame(
            &state,
            Uuid::new_v4(),
            &tx,
            r#"{"type":"publish","topic":"ghost","data":1}"#,
        )
        .await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["code"], "TOPIC_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unsubscribe_flows() {
        let state = make_state();
        state.registry.create("t").unwrap();
        let (tx, mut rx) = channel();
        let client_id = Uuid::new_v4();

        handle_frame(&state, client_id, &tx, r#"{"type":"unsubscribe","topic":"t"}"#).await;
        assert_eq!(next_frame(&mut rx).await["code"], "NOT_SUBSCRIBED");

        handle_frame(&state, client_id, &tx, r#"{"type":"subscribe","topic":"t"}"#).await;
        assert_eq!(next_frame(&mut rx).await["type"], "ack");

        handle_frame(&state, client_id, &tx, r#"{"type":"unsubscribe","topic":"t"}"#).await;
        let ack = next_frame(&mut rx).await;
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["request_type"], "unsubscribe");
        state.registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let state = make_state();
        let (tx, mut rx) = channel();

        handle_frame(&state, Uuid::new_v4(), &tx, r#"{"type":"ping"}"#).await;
        assert_eq!(next_frame(&mut rx).await, json!({"type": "pong"}));
    }

    #[tokio::test]
    async fn test_malformed_frames_answered_not_fatal() {
        let state = make_state();
        let (tx, mut rx) = channel();
        let client_id = Uuid::new_v4();

        handle_frame(&state, client_id, &tx, "garbage").await;
        assert_eq!(next_frame(&mut rx).await["code"], "INVALID_JSON");

        handle_frame(&state, client_id, &tx, r#"{"no_type":true}"#).await;
        assert_eq!(next_frame(&mut rx).await["code"], "INVALID_MESSAGE");

        handle_frame(&state, client_id, &tx, r#"{"type":"teleport"}"#).await;
        assert_eq!(next_frame(&mut rx).await["code"], "UNKNOWN_MESSAGE_TYPE");

        handle_frame(&state, client_id, &tx, r#"{"type":"subscribe"}"#).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["code"], "VALIDATION_ERROR");
        assert!(frame["details"]["errors"].is_array());

        // The session still works after every error
        handle_frame(&state, client_id, &tx, r#"{"type":"ping"}"#).await;
        assert_eq!(next_frame(&mut rx).await["type"], "pong");
    }

    #[tokio::test]
    async fn test_live_delivery_through_ws_sink() {
        let state = make_state();
        state.registry.create("live").unwrap();
        let (tx, mut rx) = channel();
        let client_id = Uuid::new_v4();

        handle_frame(&state, client_id, &tx, r#"{"type":"subscribe","topic":"live"}"#).await;
        assert_eq!(next_frame(&mut rx).await["type"], "ack");

        state.registry.publish("live", json!({"seq": 0})).unwrap();

        let event = next_frame(&mut rx).await;
        assert_eq!(event["type"], "event");
        assert_eq!(event["topic"], "live");
        assert_eq!(event["data"], json!({"seq": 0}));
        assert!(event["message_id"].is_string());
        state.registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_no_duplicates_across_replay_seam() {
        let state = make_state();
        state.registry.create("seam").unwrap();
        for i in 0..10 {
            state.registry.publish("seam", json!({ "seq": i })).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (tx, mut rx) = channel();
        handle_frame(
            &state,
            Uuid::new_v4(),
            &tx,
            r#"{"type":"subscribe","topic":"seam","last_n":10}"#,
        )
        .await;
        for i in 10..15 {
            state.registry.publish("seam", json!({ "seq": i })).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frames = drain_frames(&mut rx);
        let mut seen = std::collections::HashSet::new();
        let mut seqs = Vec::new();
        for frame in &frames {
            if frame["type"] == "event" {
                let id = frame["message_id"].as_str().unwrap().to_string();
                assert!(seen.insert(id), "duplicate event across replay seam");
                seqs.push(frame["data"]["seq"].as_i64().unwrap());
            }
        }
        assert_eq!(seqs, (0..15).collect::<Vec<i64>>());
        state.registry.shutdown_all().await;
    }
}
