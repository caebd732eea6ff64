//! Event router.
//!
//! The router turns one inbound [`Action`] into exactly one
//! [`PresenceEvent`] and one broadcast. Per room, the registry update, the
//! event construction and the broadcast happen as one step, so subscribers
//! see a room's events in the order its occupancy changed.
//!
//! Each action runs on its own task. Once [`EventRouter::dispatch`] has been
//! called the action completes even if the caller stops waiting for it.

use crate::event::{topic_for, Action, EventClock};
use crate::registry::PresenceRegistry;
use crate::sink::{BroadcastSink, DeliveryError};
use dashmap::DashMap;
use huddle_protocol::PresenceEvent;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The sink could not publish the event. Presence was still updated.
    #[error("Failed to deliver event to {topic}: {source}")]
    Delivery {
        /// Topic the event was meant for.
        topic: String,
        #[source]
        source: DeliveryError,
    },

    /// The task applying the action was torn down before it finished,
    /// which only happens while the runtime shuts down.
    #[error("Dispatch for room {room_key} was interrupted")]
    Interrupted {
        /// Room the action was addressed to.
        room_key: String,
    },
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Rooms with at least one participant.
    pub active_rooms: usize,
    /// Rooms with an action currently in flight.
    pub busy_rooms: usize,
}

type Lanes = DashMap<String, Arc<Mutex<()>>>;

/// A claim on a room's lane.
///
/// Dropping the ticket removes the lane once nobody else holds or waits on
/// it.
struct LaneTicket<'a> {
    lanes: &'a Lanes,
    room_key: String,
    gate: Arc<Mutex<()>>,
}

impl<'a> LaneTicket<'a> {
    fn claim(lanes: &'a Lanes, room_key: &str) -> Self {
        // Cloned under the shard guard, which is what keeps the strong
        // count check in `drop` exact.
        let gate = lanes.entry(room_key.to_owned()).or_default().clone();
        Self {
            lanes,
            room_key: room_key.to_owned(),
            gate,
        }
    }
}

impl Drop for LaneTicket<'_> {
    fn drop(&mut self) {
        // Two handles left means the map's and ours.
        self.lanes.remove_if(self.room_key.as_str(), |_, gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2
        });
    }
}

/// State shared between the router handle and in-flight dispatch tasks.
struct Shared<S> {
    registry: PresenceRegistry,
    sink: S,
    clock: EventClock,
    lanes: Lanes,
}

impl<S: BroadcastSink> Shared<S> {
    /// Apply an action under its room's lane and broadcast the event.
    async fn apply(&self, action: Action) -> Result<PresenceEvent, RouterError> {
        let ticket = LaneTicket::claim(&self.lanes, action.room_key());
        let _turn = ticket.gate.lock().await;

        let event = self.build_event(action);
        let topic = topic_for(&event.room_key);

        match self.sink.broadcast(&topic, &event).await {
            Ok(()) => {
                debug!(
                    topic = %topic,
                    kind = %event.kind,
                    participants = event.participant_count,
                    "Event broadcast"
                );
                Ok(event)
            }
            Err(source) => {
                warn!(topic = %topic, kind = %event.kind, error = %source, "Broadcast failed");
                Err(RouterError::Delivery { topic, source })
            }
        }
    }

    /// Update presence for `action` and build its event.
    fn build_event(&self, action: Action) -> PresenceEvent {
        let kind = action.kind();
        let (room_key, username, content, participant_count) = match action {
            Action::Join { room_key, username } => {
                let count = self.registry.join(&room_key);
                let content = PresenceEvent::joined_notice(&username);
                (room_key, username, content, count)
            }
            Action::Leave { room_key, username } => {
                let count = self.registry.leave(&room_key);
                let content = PresenceEvent::left_notice(&username);
                (room_key, username, content, count)
            }
            Action::Message {
                room_key,
                username,
                content,
            } => {
                let count = self.registry.peek(&room_key);
                (room_key, username, content.unwrap_or_default(), count)
            }
        };

        PresenceEvent {
            kind,
            room_key,
            username,
            content,
            timestamp: self.clock.now_millis(),
            participant_count,
        }
    }
}

/// Routes room actions through presence tracking to a broadcast sink.
pub struct EventRouter<S> {
    shared: Arc<Shared<S>>,
}

impl<S: BroadcastSink + 'static> EventRouter<S> {
    /// Create a router with an empty registry publishing to `sink`.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self::with_clock(sink, EventClock::new())
    }

    /// Create a router with a custom event clock.
    #[must_use]
    pub fn with_clock(sink: S, clock: EventClock) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: PresenceRegistry::new(),
                sink,
                clock,
                lanes: DashMap::new(),
            }),
        }
    }

    /// Apply an action and broadcast the resulting event.
    ///
    /// Returns the event that was published. The action runs on a spawned
    /// task: dropping the returned future stops the wait, not the action,
    /// so every applied change still gets its one broadcast.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Delivery`] if the sink fails. The registry
    /// change made for a join or leave is kept regardless.
    pub async fn dispatch(&self, action: Action) -> Result<PresenceEvent, RouterError> {
        let room_key = action.room_key().to_owned();
        let shared = Arc::clone(&self.shared);

        match tokio::spawn(async move { shared.apply(action).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {
                error!(room = %room_key, "Dispatch task cancelled");
                Err(RouterError::Interrupted { room_key })
            }
        }
    }

    /// Current occupancy of a room.
    #[must_use]
    pub fn occupancy(&self, room_key: &str) -> usize {
        self.shared.registry.peek(room_key)
    }

    /// The presence registry this router updates.
    #[must_use]
    pub fn registry(&self) -> &PresenceRegistry {
        &self.shared.registry
    }

    /// The sink events are published to.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            active_rooms: self.shared.registry.room_count(),
            busy_rooms: self.shared.lanes.len(),
        }
    }
}
