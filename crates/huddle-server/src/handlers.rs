//! Connection handlers for the Huddle server.
//!
//! This module wires the HTTP routes, upgrades WebSocket connections and
//! pumps frames between each socket and its [`Session`].

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::session::Session;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use huddle_core::{EventRouter, HubConfig, LocalHub, TimeoutSink};
use huddle_protocol::{codec, error_codes, Frame, ProtocolError, Version, WireFormat, PROTOCOL_VERSION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Router type used by the server: events go to the local hub, bounded by
/// the configured delivery timeout.
pub type ServerRouter = EventRouter<TimeoutSink<Arc<LocalHub>>>;

/// Shared server state.
pub struct AppState {
    /// Routes room actions through presence to the hub.
    pub router: ServerRouter,
    /// Fans events out to subscribed connections.
    pub hub: Arc<LocalHub>,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
    next_connection_id: AtomicU64,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(LocalHub::with_config(HubConfig {
            topic_capacity: config.limits.topic_capacity,
            max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
        }));
        let sink = TimeoutSink::new(Arc::clone(&hub), config.delivery_timeout());

        Self {
            router: EventRouter::new(sink),
            hub,
            config,
            connections: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Reserve a connection slot, unless the server is full.
    fn try_reserve_connection(&self) -> bool {
        let limit = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_connection(&self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }

    fn connection_id(&self) -> String {
        format!(
            "conn_{}",
            self.next_connection_id.fetch_add(1, Ordering::Relaxed)
        )
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/presence/*room", get(presence_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.hub.close();
    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let hub = state.hub.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "rooms": state.router.stats().active_rooms,
        "topics": hub.topic_count,
        "connections": state.connections.load(Ordering::Relaxed),
    }))
}

/// Occupancy of a single room.
async fn presence_handler(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Json<Value> {
    Json(json!({
        "roomKey": room,
        "participantCount": state.router.occupancy(&room),
    }))
}

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
struct WsParams {
    /// Frame encoding for this connection.
    #[serde(default)]
    format: WireFormat,
    /// Protocol version the client speaks.
    version: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(requested) = &params.version {
        match requested.parse::<Version>() {
            Ok(version) if version.is_compatible_with(&PROTOCOL_VERSION) => {}
            Ok(version) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("Unsupported protocol version {version}, server speaks {PROTOCOL_VERSION}"),
                )
                    .into_response();
            }
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    if !state.try_reserve_connection() {
        warn!("Connection limit reached");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    }

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            handle_websocket(socket, Arc::clone(&state), params.format).await;
            state.release_connection();
        })
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, format: WireFormat) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = state.connection_id();
    debug!(connection = %connection_id, format = ?format, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let connected = Frame::connected(
        &connection_id,
        PROTOCOL_VERSION.major,
        state.config.advertised_heartbeat_ms(),
    );
    if send_frame(&mut sender, format, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected frame");
        return;
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let mut session = Session::new(connection_id, Arc::clone(&state), out_tx);

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Events from subscribed rooms
            Some(frame) = out_rx.recv() => {
                if send_frame(&mut sender, format, &frame).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                let frames = match msg {
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);
                        drain_binary(&mut read_buffer)
                    }
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_frame(text.len(), "inbound");
                        vec![codec::decode_json(&text)]
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %session.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %session.id(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %session.id(), "WebSocket stream ended");
                        break;
                    }
                };

                let mut closed = false;
                for decoded in frames {
                    let reply = match decoded {
                        Ok(frame) => session.handle_frame(frame).await,
                        Err(e) => {
                            warn!(connection = %session.id(), error = %e, "Undecodable frame");
                            metrics::record_error("decode");
                            Some(Frame::error(0, error_codes::INVALID_FRAME, e.to_string()))
                        }
                    };
                    if let Some(reply) = reply {
                        if send_frame(&mut sender, format, &reply).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                }
                if closed {
                    break;
                }
            }
        }
    }

    session.close().await;
    debug!("WebSocket disconnected");
}

/// Decode every complete frame in the buffer.
///
/// A decode error discards the buffer, since framing can no longer be
/// trusted.
fn drain_binary(buf: &mut BytesMut) -> Vec<Result<Frame, ProtocolError>> {
    let mut frames = Vec::new();
    loop {
        match codec::decode_from(buf) {
            Ok(Some(frame)) => frames.push(Ok(frame)),
            Ok(None) => break,
            Err(e) => {
                buf.clear();
                frames.push(Err(e));
                break;
            }
        }
    }
    frames
}

/// Encode a frame in the connection's format.
fn encode_message(format: WireFormat, frame: &Frame) -> Result<Message, ProtocolError> {
    Ok(match format {
        WireFormat::Msgpack => Message::Binary(codec::encode(frame)?.to_vec()),
        WireFormat::Json => Message::Text(codec::encode_json(frame)?),
    })
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    format: WireFormat,
    frame: &Frame,
) -> Result<()> {
    let message = encode_message(format, frame)?;
    let len = match &message {
        Message::Binary(data) => data.len(),
        Message::Text(text) => text.len(),
        _ => 0,
    };
    metrics::record_frame(len, "outbound");
    sender.send(message).await?;
    Ok(())
}
