//! Broadcast sinks.
//!
//! A sink delivers a presence event to every current subscriber of a topic.
//! The router depends only on [`BroadcastSink`], so any pub/sub transport
//! that keeps per-topic order can stand behind it.

use async_trait::async_trait;
use huddle_protocol::PresenceEvent;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors a sink reports when it cannot publish an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The sink has been shut down.
    #[error("Broadcast sink is closed")]
    Closed,

    /// Publishing did not finish in time.
    #[error("Broadcast timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Publishes presence events to topic subscribers.
///
/// Delivery is best-effort: publishing to a topic without subscribers is
/// not an error, and subscribers that attach later see nothing of it.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Publish `event` to all current subscribers of `topic`.
    async fn broadcast(&self, topic: &str, event: &PresenceEvent) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<S: BroadcastSink + ?Sized> BroadcastSink for Arc<S> {
    async fn broadcast(&self, topic: &str, event: &PresenceEvent) -> Result<(), DeliveryError> {
        (**self).broadcast(topic, event).await
    }
}

/// Sink decorator that bounds how long a broadcast may take.
#[derive(Debug, Clone)]
pub struct TimeoutSink<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutSink<S> {
    /// Wrap `inner`, failing broadcasts that exceed `timeout`.
    #[must_use]
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The wrapped sink.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: BroadcastSink> BroadcastSink for TimeoutSink<S> {
    async fn broadcast(&self, topic: &str, event: &PresenceEvent) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.timeout, self.inner.broadcast(topic, event))
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
    }
}
