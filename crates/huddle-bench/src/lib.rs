//! Shared fixtures for the Huddle benchmarks.

use async_trait::async_trait;
use huddle_core::{BroadcastSink, DeliveryError, PresenceEvent};

/// Sink that accepts every event and drops it.
///
/// Isolates router cost from fan-out cost.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl BroadcastSink for NullSink {
    async fn broadcast(&self, _topic: &str, _event: &PresenceEvent) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Room keys `room-0` .. `room-{n-1}`.
#[must_use]
pub fn room_keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("room-{i}")).collect()
}
