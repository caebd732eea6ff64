//! # huddle-core
//!
//! Presence tracking and room event routing for Huddle.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Live occupancy count per room
//! - **Router** - Turns room actions into presence events and broadcasts them
//! - **Sink** - The broadcast capability the router publishes through
//! - **Hub** - In-process fan-out of events to topic subscribers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Action    │────▶│   Router    │────▶│    Sink     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Registry   │
//!                     └─────────────┘
//! ```

pub mod event;
pub mod hub;
pub mod registry;
pub mod router;
pub mod sink;

pub use event::{topic_for, Action, EventClock, TOPIC_PREFIX};
pub use huddle_protocol::{EventKind, PresenceEvent};
pub use hub::{HubConfig, HubError, HubStats, LocalHub};
pub use registry::PresenceRegistry;
pub use router::{EventRouter, RouterError, RouterStats};
pub use sink::{BroadcastSink, DeliveryError, TimeoutSink};
