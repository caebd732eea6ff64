//! Presence registry.
//!
//! The registry is the single source of truth for how many participants are
//! in each room. Entries are created by the first join and removed by the
//! leave that drops occupancy to zero, so the map only ever holds live rooms.

use dashmap::DashMap;
use tracing::{debug, trace};

/// Room occupancy counts, safe to share between any number of tasks.
///
/// Every operation on a room runs under that room's shard guard and never
/// suspends, so operations on one room are linearizable and operations on
/// other rooms are never held up by a slow caller.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: DashMap<String, usize>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a participant entering `room_key`.
    ///
    /// Returns the occupancy after the increment.
    pub fn join(&self, room_key: &str) -> usize {
        if let Some(mut count) = self.rooms.get_mut(room_key) {
            *count += 1;
            trace!(room = %room_key, participants = *count, "Presence: join");
            return *count;
        }

        // Create-if-absent and increment under one guard; a concurrent
        // joiner that got here first is counted, not overwritten.
        let mut count = self.rooms.entry(room_key.to_owned()).or_insert_with(|| {
            debug!(room = %room_key, "Presence: room created");
            0
        });
        *count += 1;
        *count
    }

    /// Record a participant leaving `room_key`.
    ///
    /// Returns the occupancy after the decrement. The entry is removed when
    /// it reaches zero. Leaving a room with no entry is a no-op returning 0.
    pub fn leave(&self, room_key: &str) -> usize {
        let mut remaining = 0;
        let removed = self.rooms.remove_if_mut(room_key, |_, count| {
            *count = count.saturating_sub(1);
            remaining = *count;
            remaining == 0
        });

        if removed.is_some() {
            debug!(room = %room_key, "Presence: room emptied");
        } else {
            trace!(room = %room_key, participants = remaining, "Presence: leave");
        }
        remaining
    }

    /// Current occupancy of `room_key`, 0 if the room has no entry.
    #[must_use]
    pub fn peek(&self, room_key: &str) -> usize {
        self.rooms.get(room_key).map(|count| *count).unwrap_or(0)
    }

    /// Number of rooms with at least one participant.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room currently has participants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Point-in-time copy of every live room and its occupancy.
    ///
    /// Rooms are read shard by shard, so the copy is not a consistent cut
    /// across rooms while writers are active.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_join_leave_peek() {
        let registry = PresenceRegistry::new();

        assert_eq!(registry.join("room-1"), 1);
        assert_eq!(registry.join("room-1"), 2);
        assert_eq!(registry.peek("room-1"), 2);

        assert_eq!(registry.leave("room-1"), 1);
        assert_eq!(registry.leave("room-1"), 0);
        assert_eq!(registry.peek("room-1"), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_leave_unknown_room() {
        let registry = PresenceRegistry::new();

        assert_eq!(registry.leave("room-x"), 0);
        assert_eq!(registry.leave("room-x"), 0);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_over_leaving_floors_at_zero() {
        let registry = PresenceRegistry::new();

        registry.join("room");
        assert_eq!(registry.leave("room"), 0);
        assert_eq!(registry.leave("room"), 0);

        // A fresh join starts from zero again
        assert_eq!(registry.join("room"), 1);
    }

    #[test]
    fn test_keys_are_exact() {
        let registry = PresenceRegistry::new();

        registry.join("Room");
        registry.join(" room");
        registry.join("");
        registry.join("комната 🚪");

        assert_eq!(registry.peek("room"), 0);
        assert_eq!(registry.peek("Room"), 1);
        assert_eq!(registry.peek(""), 1);
        assert_eq!(registry.peek("комната 🚪"), 1);
        assert_eq!(registry.room_count(), 4);
    }

    #[test]
    fn test_sequence_matches_floored_count() {
        let registry = PresenceRegistry::new();
        let ops = [true, true, false, false, false, true, false, true, true];

        let mut expected = 0usize;
        for join in ops {
            let got = if join {
                expected += 1;
                registry.join("r")
            } else {
                expected = expected.saturating_sub(1);
                registry.leave("r")
            };
            assert_eq!(got, expected);
            assert_eq!(registry.peek("r"), expected);
        }
    }

    #[test]
    fn test_concurrent_joins_are_consecutive() {
        let registry = Arc::new(PresenceRegistry::new());
        registry.join("busy");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || (0..100).map(|_| registry.join("busy")).collect::<Vec<_>>())
            })
            .collect();

        let mut seen: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();

        let expected: Vec<usize> = (2..=1601).collect();
        assert_eq!(seen, expected);
        assert_eq!(registry.peek("busy"), 1601);
    }

    #[test]
    fn test_concurrent_churn_leaves_no_entries() {
        let registry = Arc::new(PresenceRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..500 {
                        let room = format!("room-{}", (t + i) % 4);
                        registry.join(&room);
                        registry.leave(&room);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(registry.is_empty());
        for room in 0..4 {
            assert_eq!(registry.peek(&format!("room-{room}")), 0);
        }
    }

    #[test]
    fn test_joins_survive_concurrent_room_teardown() {
        const STAYERS: usize = 4;
        const STAYS_EACH: usize = 200;

        let registry = Arc::new(PresenceRegistry::new());
        let barrier = Arc::new(std::sync::Barrier::new(STAYERS + 4));

        // Churners keep taking the room to zero and back, so stayer joins
        // keep racing the removal of an emptied entry.
        let churners: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..2_000 {
                        registry.join("edge");
                        registry.leave("edge");
                    }
                })
            })
            .collect();

        let stayers: Vec<_> = (0..STAYERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..STAYS_EACH {
                        registry.join("edge");
                        thread::yield_now();
                    }
                })
            })
            .collect();

        for handle in churners.into_iter().chain(stayers) {
            handle.join().unwrap();
        }

        assert_eq!(registry.peek("edge"), STAYERS * STAYS_EACH);
    }

    #[test]
    fn test_many_rooms_do_not_accumulate() {
        let registry = PresenceRegistry::new();

        for i in 0..10_000 {
            let room = format!("ephemeral-{i}");
            registry.join(&room);
            registry.leave(&room);
        }

        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_snapshot() {
        let registry = PresenceRegistry::new();
        registry.join("a");
        registry.join("a");
        registry.join("b");

        let mut snapshot = registry.snapshot();
        snapshot.sort();
        assert_eq!(snapshot, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }
}
