//! In-process fan-out hub.
//!
//! The hub keeps one broadcast channel per topic and tracks which
//! connections are subscribed where. It is the [`BroadcastSink`] the server
//! hands to the event router.

use crate::sink::{BroadcastSink, DeliveryError};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use huddle_protocol::PresenceEvent;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Default per-topic broadcast capacity.
const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Hub subscription errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Not subscribed to topic.
    #[error("Not subscribed to topic: {0}")]
    NotSubscribed(String),

    /// Already subscribed to topic.
    #[error("Already subscribed to topic: {0}")]
    AlreadySubscribed(String),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// The hub has been closed.
    #[error("Hub is closed")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-topic broadcast capacity. Subscribers lagging further behind
    /// skip the oldest events. Zero is treated as one.
    pub topic_capacity: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
            max_subscriptions_per_connection: 100,
        }
    }
}

/// A topic and its subscribers.
#[derive(Debug)]
struct Topic {
    sender: broadcast::Sender<Arc<PresenceEvent>>,
    subscribers: HashSet<String>,
}

impl Topic {
    fn with_capacity(capacity: usize) -> Self {
        // A zero-capacity broadcast channel panics on creation
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscribers: HashSet::new(),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Topics with at least one subscriber.
    pub topic_count: usize,
    /// Connections holding at least one subscription.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

/// In-process pub/sub for presence events.
///
/// Events published on a topic reach subscribers in publish order.
pub struct LocalHub {
    /// Topics indexed by name.
    topics: DashMap<String, Topic>,
    /// Connection subscriptions (connection_id -> set of topics).
    subscriptions: DashMap<String, DashSet<String>>,
    config: HubConfig,
    closed: AtomicBool,
}

impl LocalHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe a connection to a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is already subscribed, has reached
    /// its subscription limit, or the hub is closed.
    pub fn subscribe(
        &self,
        connection_id: &str,
        topic: &str,
    ) -> Result<broadcast::Receiver<Arc<PresenceEvent>>, HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        let conn_subs = self
            .subscriptions
            .entry(connection_id.to_string())
            .or_default();

        if conn_subs.contains(topic) {
            return Err(HubError::AlreadySubscribed(topic.to_string()));
        }

        if conn_subs.len() >= self.config.max_subscriptions_per_connection {
            return Err(HubError::MaxSubscriptionsReached);
        }

        let mut entry = self.topics.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic = %topic, "Creating topic");
            Topic::with_capacity(self.config.topic_capacity)
        });

        entry.subscribers.insert(connection_id.to_string());
        let receiver = entry.sender.subscribe();
        conn_subs.insert(topic.to_string());

        debug!(
            topic = %topic,
            connection = %connection_id,
            subscribers = entry.subscribers.len(),
            "Subscribed"
        );

        Ok(receiver)
    }

    /// Unsubscribe a connection from a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not subscribed to the topic.
    pub fn unsubscribe(&self, connection_id: &str, topic: &str) -> Result<(), HubError> {
        let removed = self
            .subscriptions
            .get(connection_id)
            .and_then(|conn_subs| conn_subs.remove(topic))
            .is_some();
        if !removed {
            return Err(HubError::NotSubscribed(topic.to_string()));
        }

        self.subscriptions
            .remove_if(connection_id, |_, conn_subs| conn_subs.is_empty());
        self.detach(connection_id, topic);

        debug!(topic = %topic, connection = %connection_id, "Unsubscribed");
        Ok(())
    }

    /// Unsubscribe a connection from every topic.
    pub fn unsubscribe_all(&self, connection_id: &str) {
        if let Some((_, topics)) = self.subscriptions.remove(connection_id) {
            for topic in topics.iter() {
                self.detach(connection_id, topic.key());
            }
        }

        debug!(connection = %connection_id, "Unsubscribed from all topics");
    }

    /// Drop a connection from a topic, deleting the topic once empty.
    fn detach(&self, connection_id: &str, topic: &str) {
        // Emptiness is checked and acted on under one guard so a concurrent
        // subscribe cannot land on a topic that is about to disappear.
        let deleted = self.topics.remove_if_mut(topic, |_, entry| {
            entry.subscribers.remove(connection_id);
            entry.subscribers.is_empty()
        });

        if deleted.is_some() {
            debug!(topic = %topic, "Deleted empty topic");
        }
    }

    /// Publish an event to a topic.
    ///
    /// Returns the number of receivers the event was handed to.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] once the hub has been closed.
    pub fn publish(&self, topic: &str, event: PresenceEvent) -> Result<usize, DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        let recipients = match self.topics.get(topic) {
            // A send error only means nobody is listening right now.
            Some(entry) => entry.sender.send(Arc::new(event)).unwrap_or_default(),
            None => 0,
        };

        trace!(topic = %topic, recipients, "Published event");
        Ok(recipients)
    }

    /// Number of subscribers on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Check if a topic exists.
    #[must_use]
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Topics a connection is subscribed to.
    #[must_use]
    pub fn connection_topics(&self, connection_id: &str) -> Vec<String> {
        self.subscriptions
            .get(connection_id)
            .map(|subs| subs.iter().map(|t| t.clone()).collect())
            .unwrap_or_default()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            topic_count: self.topics.len(),
            connection_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
        }
    }

    /// Close the hub.
    ///
    /// Further publishes fail with [`DeliveryError::Closed`] and every
    /// subscriber's receiver ends once it has drained buffered events.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.topics.clear();
            self.subscriptions.clear();
            info!("Hub closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastSink for LocalHub {
    async fn broadcast(&self, topic: &str, event: &PresenceEvent) -> Result<(), DeliveryError> {
        self.publish(topic, event.clone()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::EventKind;

    fn event(count: usize) -> PresenceEvent {
        PresenceEvent {
            kind: EventKind::Message,
            room_key: "room".into(),
            username: "alice".into(),
            content: format!("#{count}"),
            timestamp: 0,
            participant_count: count,
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let hub = LocalHub::new();

        let rx = hub.subscribe("conn-1", "/topic/room/a").unwrap();
        assert!(hub.topic_exists("/topic/room/a"));
        assert_eq!(hub.subscriber_count("/topic/room/a"), 1);
        drop(rx);

        hub.unsubscribe("conn-1", "/topic/room/a").unwrap();
        assert!(!hub.topic_exists("/topic/room/a"));
        assert_eq!(hub.stats().connection_count, 0);

        assert!(matches!(
            hub.unsubscribe("conn-1", "/topic/room/a"),
            Err(HubError::NotSubscribed(_))
        ));
    }

    #[test]
    fn test_already_subscribed() {
        let hub = LocalHub::new();

        let _rx = hub.subscribe("conn-1", "t").unwrap();
        assert!(matches!(
            hub.subscribe("conn-1", "t"),
            Err(HubError::AlreadySubscribed(_))
        ));
    }

    #[test]
    fn test_subscription_limit() {
        let hub = LocalHub::with_config(HubConfig {
            max_subscriptions_per_connection: 2,
            ..HubConfig::default()
        });

        let _a = hub.subscribe("conn-1", "a").unwrap();
        let _b = hub.subscribe("conn-1", "b").unwrap();
        assert!(matches!(
            hub.subscribe("conn-1", "c"),
            Err(HubError::MaxSubscriptionsReached)
        ));
        // Other connections are unaffected
        assert!(hub.subscribe("conn-2", "c").is_ok());
    }

    #[test]
    fn test_publish_fans_out_in_order() {
        let hub = LocalHub::new();
        let mut rx1 = hub.subscribe("conn-1", "t").unwrap();
        let mut rx2 = hub.subscribe("conn-2", "t").unwrap();

        for i in 1..=3 {
            assert_eq!(hub.publish("t", event(i)).unwrap(), 2);
        }

        for rx in [&mut rx1, &mut rx2] {
            let counts: Vec<usize> = (0..3)
                .map(|_| rx.try_recv().unwrap().participant_count)
                .collect();
            assert_eq!(counts, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_zero_topic_capacity_still_delivers() {
        let hub = LocalHub::with_config(HubConfig {
            topic_capacity: 0,
            ..HubConfig::default()
        });
        let mut rx = hub.subscribe("conn-1", "t").unwrap();

        assert_eq!(hub.publish("t", event(1)).unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().participant_count, 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = LocalHub::new();
        assert_eq!(hub.publish("nobody-here", event(1)).unwrap(), 0);
    }

    #[test]
    fn test_late_subscriber_gets_no_replay() {
        let hub = LocalHub::new();
        let _early = hub.subscribe("conn-1", "t").unwrap();
        hub.publish("t", event(1)).unwrap();

        let mut late = hub.subscribe("conn-2", "t").unwrap();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_all() {
        let hub = LocalHub::new();
        let _a = hub.subscribe("conn-1", "a").unwrap();
        let _b = hub.subscribe("conn-1", "b").unwrap();
        let _c = hub.subscribe("conn-2", "a").unwrap();

        let stats = hub.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.total_subscriptions, 3);

        hub.unsubscribe_all("conn-1");

        assert!(hub.topic_exists("a"));
        assert!(!hub.topic_exists("b"));
        assert!(hub.connection_topics("conn-1").is_empty());
        assert_eq!(hub.connection_topics("conn-2"), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_hub_rejects_publish() {
        let hub = LocalHub::new();
        let mut rx = hub.subscribe("conn-1", "t").unwrap();

        hub.close();

        assert_eq!(
            hub.broadcast("t", &event(1)).await,
            Err(DeliveryError::Closed)
        );
        assert!(matches!(hub.subscribe("conn-1", "t"), Err(HubError::Closed)));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
