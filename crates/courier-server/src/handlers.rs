//! Connection handlers for Courier server.
//!
//! This module serves the HTTP endpoints and the realtime WebSocket channel.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::notifier;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use courier_core::{ConnectionId, Hub, HubSnapshot, Lifecycle, MessageRouter, Notifier};
use courier_protocol::{codec, ClientEvent, Encoded, ServerEvent, WireFormat};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// Registry, message log and payment sessions.
    pub hub: Arc<Hub>,
    /// Connect, register and disconnect transitions.
    pub lifecycle: Lifecycle,
    /// Event routing.
    pub router: MessageRouter,
    /// Payment notifier surface.
    pub notifier: Arc<Notifier>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(Hub::with_config(config.hub_config()));

        Self {
            lifecycle: Lifecycle::new(hub.clone()),
            router: MessageRouter::new(hub.clone()),
            notifier: Arc::new(Notifier::new()),
            hub,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if a listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    if config.notifier.enabled {
        let transport = notifier::bind(&config).await?;
        tokio::spawn(notifier::serve(
            transport,
            state.notifier.clone(),
            config.limits.outbound_queue_capacity,
        ));
        notifier::spawn_poller(&config, state.notifier.clone());
    }

    tokio::spawn(run_janitor(
        state.clone(),
        Duration::from_millis(config.payment.sweep_interval_ms),
    ));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/users", get(users_handler))
        .route("/health", get(health_handler))
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .with_state(state)
}

/// Sweep expired payment sessions and refresh gauges.
async fn run_janitor(state: Arc<AppState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        state.router.sweep_expired();
        metrics::set_hub_stats(&state.hub.stats());
        metrics::set_notifier_pushes(state.notifier.pushes());
    }
}

/// Liveness text.
async fn index_handler() -> &'static str {
    "Courier relay is running"
}

/// Registered identities and the message log.
async fn users_handler(State(state): State<Arc<AppState>>) -> Json<HubSnapshot> {
    Json(state.hub.snapshot())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "registered": stats.registered,
        "sessions": stats.sessions,
        "loggedMessages": stats.logged_messages,
        "evictedMessages": stats.evicted_messages,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outbound) = state.lifecycle.open();
    let connection_id = handle.id().clone();
    let mut format = WireFormat::Json;

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Events routed to this connection
            Some(event) = outbound.recv() => {
                if send_event(&mut sender, &event, format).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => Encoded::Text(text),
                    Some(Ok(Message::Binary(data))) => Encoded::Binary(Bytes::from(data)),
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                };

                let start = Instant::now();
                metrics::record_event(frame.len(), "inbound");
                if let Some(received) = handle_frame(&state, &connection_id, &frame) {
                    format = received;
                }
                metrics::record_latency(start.elapsed().as_secs_f64());
            }
        }
    }

    state.lifecycle.disconnect(&connection_id);
    metrics::set_hub_stats(&state.hub.stats());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle one inbound frame.
///
/// Returns the frame's wire format if it decoded. Malformed frames are
/// logged and otherwise ignored.
fn handle_frame(state: &AppState, connection_id: &ConnectionId, frame: &Encoded) -> Option<WireFormat> {
    if frame.is_empty() {
        warn!(connection = %connection_id, "Empty frame");
        metrics::record_malformed("realtime");
        return None;
    }

    let event: ClientEvent = match codec::decode_encoded(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Malformed frame");
            metrics::record_malformed("realtime");
            return None;
        }
    };

    trace!(connection = %connection_id, event = event.name(), "Inbound event");

    match event {
        ClientEvent::Register(registration) => {
            state
                .lifecycle
                .register(connection_id, registration.into_identity());
        }
        event => {
            if let Err(e) = state.router.route(connection_id, event) {
                metrics::record_route_failure(e.kind());
            }
        }
    }

    metrics::set_hub_stats(&state.hub.stats());
    Some(frame.format())
}

/// Encode and send an event in the connection's wire format.
async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let encoded = codec::encode_as(event, format)?;
    metrics::record_event(encoded.len(), "outbound");
    let message = match encoded {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol::Identity;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    fn text(raw: &str) -> Encoded {
        Encoded::Text(raw.to_string())
    }

    #[tokio::test]
    async fn test_users_after_two_registrations_and_one_message() {
        let state = state();
        let (c1, _rx1) = state.lifecycle.open();
        let (c2, _rx2) = state.lifecycle.open();

        handle_frame(&state, c1.id(), &text(r#"{"event":"register","data":"u1"}"#));
        handle_frame(
            &state,
            c2.id(),
            &text(r#"{"event":"register","data":{"userId":"u2"}}"#),
        );
        handle_frame(
            &state,
            c1.id(),
            &text(r#"{"event":"sendPrivateMessage","data":{"to":"u2","message":"hi","from":"u1"}}"#),
        );

        let Json(snapshot) = users_handler(State(state)).await;
        assert_eq!(snapshot.connected_users, vec!["u1", "u2"]);
        assert_eq!(snapshot.message_log.len(), 1);
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            serde_json::json!({
                "connectedUsers": ["u1", "u2"],
                "messageLog": [{"from": "u1", "to": "u2", "message": "hi"}],
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_no_reply() {
        let state = state();
        let (c1, mut rx1) = state.lifecycle.open();

        assert!(handle_frame(&state, c1.id(), &text("{\"event\":")).is_none());
        assert!(handle_frame(&state, c1.id(), &text(r#"{"event":"dance","data":{}}"#)).is_none());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_frame_ignored() {
        let state = state();
        let (c1, mut rx1) = state.lifecycle.open();

        assert!(handle_frame(&state, c1.id(), &text("")).is_none());
        assert!(handle_frame(&state, c1.id(), &Encoded::Binary(Bytes::new())).is_none());
        assert!(rx1.try_recv().is_err());
        assert_eq!(state.hub.stats().registered, 0);
    }

    #[tokio::test]
    async fn test_binary_frame_switches_format() {
        let state = state();
        let (c1, mut rx1) = state.lifecycle.open();

        let register = ClientEvent::Register(courier_protocol::Registration::Bare("u1".into()));
        let frame = codec::encode_as(&register, WireFormat::MessagePack).unwrap();

        assert_eq!(
            handle_frame(&state, c1.id(), &frame),
            Some(WireFormat::MessagePack)
        );
        let users: Vec<Identity> = vec!["u1".into()];
        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::UserListUpdate(users));
    }

    #[tokio::test]
    async fn test_index_and_health() {
        assert_eq!(index_handler().await, "Courier relay is running");

        let state = state();
        let (_c1, _rx1) = state.lifecycle.open();
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    async fn next_event<S>(ws: &mut S) -> ServerEvent
    where
        S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => codec::decode(&text).unwrap(),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_private_message_over_websocket() {
        let state = state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app(state)).await });

        let url = format!("ws://{}/ws", addr);
        let (mut u1, _) = connect_async(url.as_str()).await.unwrap();
        let (mut u2, _) = connect_async(url.as_str()).await.unwrap();

        u1.send(WsMessage::Text(r#"{"event":"register","data":"u1"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut u1).await,
            ServerEvent::UserListUpdate(vec!["u1".into()])
        );

        u2.send(WsMessage::Text(r#"{"event":"register","data":"u2"}"#.into()))
            .await
            .unwrap();
        let both = ServerEvent::UserListUpdate(vec!["u1".into(), "u2".into()]);
        assert_eq!(next_event(&mut u2).await, both);
        assert_eq!(next_event(&mut u1).await, both);

        u1.send(WsMessage::Text(
            r#"{"event":"sendPrivateMessage","data":{"to":"u2","message":"hi","from":"u1"}}"#
                .into(),
        ))
        .await
        .unwrap();
        assert_eq!(
            next_event(&mut u2).await,
            ServerEvent::ReceivePrivateMessage {
                from: "u1".into(),
                message: "hi".into(),
            }
        );

        // Closing u2 removes it from everyone's list.
        u2.close(None).await.unwrap();
        assert_eq!(
            next_event(&mut u1).await,
            ServerEvent::UserListUpdate(vec!["u1".into()])
        );
    }
}
