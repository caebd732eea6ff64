//! Per-connection session.
//!
//! A session owns one client's room subscriptions and remembers the joins
//! it made, so the presence it added can be taken back when the client
//! drops without leaving.

use crate::handlers::AppState;
use crate::metrics;
use huddle_core::{topic_for, Action, RouterError};
use huddle_protocol::{error_codes, Frame};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// State of one client connection.
pub struct Session {
    id: String,
    state: Arc<AppState>,
    /// Frames queued for the client.
    outbound: mpsc::UnboundedSender<Frame>,
    /// Forwarding task per subscribed room.
    forwarders: HashMap<String, JoinHandle<()>>,
    /// Joins not yet matched by a leave, per (room, username).
    joined: HashMap<(String, String), usize>,
}

impl Session {
    /// Create a session whose outbound frames go to `outbound`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        state: Arc<AppState>,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            id: id.into(),
            state,
            outbound,
            forwarders: HashMap::new(),
            joined: HashMap::new(),
        }
    }

    /// Connection ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle one inbound frame.
    ///
    /// Returns the frame to answer with, if any.
    pub async fn handle_frame(&mut self, frame: Frame) -> Option<Frame> {
        match frame {
            Frame::Subscribe { id, room } => Some(self.subscribe(id, room)),

            Frame::Unsubscribe { id, room } => {
                debug!(connection = %self.id, room = %room, "Unsubscribe request");
                if let Some(handle) = self.forwarders.remove(&room) {
                    handle.abort();
                }

                Some(match self.state.hub.unsubscribe(&self.id, &topic_for(&room)) {
                    Ok(()) => Frame::ack(id),
                    Err(e) => Frame::error(id, error_codes::NOT_SUBSCRIBED, e.to_string()),
                })
            }

            Frame::Join { id, room, username } => {
                *self
                    .joined
                    .entry((room.clone(), username.clone()))
                    .or_default() += 1;
                self.route(id, Action::join(room, username)).await
            }

            Frame::Leave { id, room, username } => {
                let key = (room, username);
                if let Some(count) = self.joined.get_mut(&key) {
                    *count -= 1;
                    if *count == 0 {
                        self.joined.remove(&key);
                    }
                }
                let (room, username) = key;
                self.route(id, Action::leave(room, username)).await
            }

            Frame::Message {
                id,
                room,
                username,
                content,
            } => {
                let action = Action::Message {
                    room_key: room,
                    username,
                    content,
                };
                self.route(id, action).await
            }

            Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

            Frame::Pong { .. } => None,

            other => {
                warn!(connection = %self.id, frame_type = ?other.frame_type(), "Unexpected frame type");
                metrics::record_error("unexpected_frame");
                Some(Frame::error(
                    0,
                    error_codes::INVALID_FRAME,
                    format!("Unexpected frame type {:?}", other.frame_type()),
                ))
            }
        }
    }

    fn subscribe(&mut self, id: u64, room: String) -> Frame {
        debug!(connection = %self.id, room = %room, "Subscribe request");

        let topic = topic_for(&room);
        match self.state.hub.subscribe(&self.id, &topic) {
            Ok(rx) => {
                let handle = tokio::spawn(forward_events(
                    self.id.clone(),
                    topic,
                    rx,
                    self.outbound.clone(),
                ));
                self.forwarders.insert(room, handle);
                Frame::ack(id)
            }
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Subscribe failed");
                Frame::error(id, error_codes::SUBSCRIBE_FAILED, e.to_string())
            }
        }
    }

    /// Dispatch an action through the router and build the reply.
    async fn route(&self, id: Option<u64>, action: Action) -> Option<Frame> {
        let kind = action.kind();
        let start = Instant::now();
        let outcome = self.state.router.dispatch(action).await;

        metrics::record_action(kind, start.elapsed().as_secs_f64());
        metrics::set_active_rooms(self.state.router.stats().active_rooms);

        match outcome {
            Ok(_) => id.map(Frame::ack),
            Err(e) => {
                match &e {
                    RouterError::Delivery { .. } => metrics::record_delivery_failure(),
                    RouterError::Interrupted { .. } => metrics::record_error("interrupted"),
                }
                Some(Frame::error(
                    id.unwrap_or(0),
                    error_codes::DELIVERY_FAILED,
                    e.to_string(),
                ))
            }
        }
    }

    /// Tear the session down.
    ///
    /// Stops event forwarding, drops every subscription and, when enabled,
    /// leaves every room this session joined and never left.
    pub async fn close(mut self) {
        for (_, handle) in self.forwarders.drain() {
            handle.abort();
        }
        self.state.hub.unsubscribe_all(&self.id);

        if self.state.config.presence.leave_on_disconnect {
            for ((room, username), count) in std::mem::take(&mut self.joined) {
                for _ in 0..count {
                    debug!(connection = %self.id, room = %room, user = %username, "Leaving on disconnect");
                    if let Err(e) = self
                        .state
                        .router
                        .dispatch(Action::leave(room.clone(), username.clone()))
                        .await
                    {
                        metrics::record_delivery_failure();
                        warn!(connection = %self.id, error = %e, "Leave on disconnect not delivered");
                    }
                }
            }
            metrics::set_active_rooms(self.state.router.stats().active_rooms);
        }

        debug!(connection = %self.id, "Session closed");
    }
}

/// Copy events from a room subscription into the session's outbound queue.
async fn forward_events(
    connection_id: String,
    topic: String,
    mut rx: broadcast::Receiver<Arc<huddle_core::PresenceEvent>>,
    outbound: mpsc::UnboundedSender<Frame>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let frame = Frame::event(topic.clone(), (*event).clone());
                if outbound.send(frame).is_err() {
                    break; // Session gone
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(connection = %connection_id, topic = %topic, skipped, "Subscriber lagged");
                metrics::record_error("lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
