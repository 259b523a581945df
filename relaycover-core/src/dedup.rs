//! Latest-event tracking per (identity, kind)
//!
//! Relays return overlapping and out-of-order results. Only a strictly newer
//! `created_at` replaces the retained event; ties keep the first one seen.

use std::collections::HashMap;

use crate::{Event, Identity};

/// Retains the newest event for every (author, kind) pair
#[derive(Debug, Default)]
pub struct LatestEventTracker {
    latest: HashMap<(Identity, u32), Event>,
}

impl LatestEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate. Returns true if it became the new best.
    pub fn offer(&mut self, event: &Event) -> bool {
        let key = (event.author.clone(), event.kind);
        match self.latest.get(&key) {
            Some(existing) if event.created_at <= existing.created_at => false,
            _ => {
                self.latest.insert(key, event.clone());
                true
            }
        }
    }

    pub fn latest(&self, author: &Identity, kind: u32) -> Option<&Event> {
        self.latest.get(&(author.clone(), kind))
    }

    /// Number of distinct (author, kind) pairs seen
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Take the single newest event of `kind` across all authors
    pub fn into_best(self, kind: u32) -> Option<Event> {
        self.latest
            .into_iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, event)| event)
            .max_by_key(|event| event.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind;

    fn alice() -> Identity {
        Identity::from_hex(&"a".repeat(64)).unwrap()
    }

    fn bob() -> Identity {
        Identity::from_hex(&"b".repeat(64)).unwrap()
    }

    #[test]
    fn test_first_event_is_new_best() {
        let mut tracker = LatestEventTracker::new();
        assert!(tracker.offer(&Event::new(alice(), kind::RELAY_LIST, 10)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_notifications_strictly_increase() {
        let mut tracker = LatestEventTracker::new();
        let arrivals = [5u64, 3, 7, 7, 6, 12, 1, 12, 13];
        let notified: Vec<u64> = arrivals
            .iter()
            .filter(|&&ts| tracker.offer(&Event::new(alice(), kind::RELAY_LIST, ts)))
            .copied()
            .collect();
        assert_eq!(notified, vec![5, 7, 12, 13]);
        assert!(notified.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let mut tracker = LatestEventTracker::new();
        let first = Event::new(alice(), kind::METADATA, 9).with_content("first");
        let second = Event::new(alice(), kind::METADATA, 9).with_content("second");
        assert!(tracker.offer(&first));
        assert!(!tracker.offer(&second));
        assert_eq!(tracker.latest(&alice(), kind::METADATA).unwrap().content, "first");
    }

    #[test]
    fn test_pairs_are_independent() {
        let mut tracker = LatestEventTracker::new();
        assert!(tracker.offer(&Event::new(alice(), kind::RELAY_LIST, 10)));
        assert!(tracker.offer(&Event::new(alice(), kind::CONTACT_LIST, 1)));
        assert!(tracker.offer(&Event::new(bob(), kind::RELAY_LIST, 2)));
        assert_eq!(tracker.len(), 3);

        let best = tracker.into_best(kind::RELAY_LIST).unwrap();
        assert_eq!(best.author, alice());
    }
}
