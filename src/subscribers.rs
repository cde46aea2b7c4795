//! Per-eventgroup subscriber bookkeeping for a server-side service instance.
//!
//! Each subscriber is identified by (eventgroup_id, endpoint); a later
//! `add` for an equal subscriber refreshes its timestamp instead of
//! duplicating the entry. Subscribers carry the ttl granted to them at
//! subscribe time, in seconds, with `0xFFFFFF` meaning "never expires".

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::sd::EventgroupId;

/// Sentinel ttl meaning a subscription never expires.
pub const TTL_FOREVER: u32 = 0xFFFFFF;

/// A single subscriber to one eventgroup.
///
/// Equality (and thus de-duplication in [`SubscriberRegistry`]) only
/// considers `eventgroup_id` and `endpoint`; `ttl` and `last_seen` are not
/// part of a subscriber's identity.
#[derive(Debug, Clone)]
pub struct EventGroupSubscriber {
    pub eventgroup_id: EventgroupId,
    pub endpoint: SocketAddr,
    pub ttl_secs: u32,
    last_seen: Instant,
}

impl EventGroupSubscriber {
    /// Create a subscriber with last_seen set to now.
    pub fn new(eventgroup_id: EventgroupId, endpoint: SocketAddr, ttl_secs: u32) -> Self {
        Self {
            eventgroup_id,
            endpoint,
            ttl_secs,
            last_seen: Instant::now(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        if self.ttl_secs == TTL_FOREVER {
            return false;
        }
        now.duration_since(self.last_seen) >= Duration::from_secs(self.ttl_secs as u64)
    }

    fn same_identity(&self, other: &EventGroupSubscriber) -> bool {
        self.eventgroup_id == other.eventgroup_id && self.endpoint == other.endpoint
    }
}

/// A server-side registry of subscribers across all eventgroups of one
/// service instance.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<EventGroupSubscriber>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Add a subscriber, refreshing an existing equal one's timestamp and
    /// ttl rather than inserting a duplicate.
    pub fn add(&mut self, eventgroup_id: EventgroupId, endpoint: SocketAddr, ttl_secs: u32) {
        let incoming = EventGroupSubscriber::new(eventgroup_id, endpoint, ttl_secs);
        if let Some(existing) = self
            .subscribers
            .iter_mut()
            .find(|s| s.same_identity(&incoming))
        {
            existing.ttl_secs = ttl_secs;
            existing.last_seen = incoming.last_seen;
        } else {
            self.subscribers.push(incoming);
        }
    }

    /// Remove the subscriber for (eventgroup_id, endpoint) if present.
    pub fn remove(&mut self, eventgroup_id: EventgroupId, endpoint: SocketAddr) {
        self.subscribers
            .retain(|s| !(s.eventgroup_id == eventgroup_id && s.endpoint == endpoint));
    }

    /// Drop every subscriber whose ttl has elapsed since its last refresh.
    /// Should be called periodically (e.g. alongside the offer timer).
    pub fn expire(&mut self) {
        let now = Instant::now();
        self.subscribers.retain(|s| !s.is_expired(now));
    }

    /// Every currently live endpoint subscribed to `eventgroup_id`, after
    /// lazily expiring stale entries.
    pub fn endpoints_for(&mut self, eventgroup_id: EventgroupId) -> Vec<SocketAddr> {
        self.expire();
        self.subscribers
            .iter()
            .filter(|s| s.eventgroup_id == eventgroup_id)
            .map(|s| s.endpoint)
            .collect()
    }

    /// True if any subscriber remains for `eventgroup_id`.
    pub fn has_subscribers(&mut self, eventgroup_id: EventgroupId) -> bool {
        !self.endpoints_for(eventgroup_id).is_empty()
    }

    /// Total number of live subscribers across all eventgroups.
    pub fn len(&mut self) -> usize {
        self.expire();
        self.subscribers.len()
    }

    /// True if there are no live subscribers.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn add_then_remove() {
        let mut reg = SubscriberRegistry::new();
        reg.add(EventgroupId(1), addr(4000), TTL_FOREVER);
        assert_eq!(reg.endpoints_for(EventgroupId(1)), vec![addr(4000)]);

        reg.remove(EventgroupId(1), addr(4000));
        assert!(reg.endpoints_for(EventgroupId(1)).is_empty());
    }

    #[test]
    fn re_add_refreshes_instead_of_duplicating() {
        let mut reg = SubscriberRegistry::new();
        reg.add(EventgroupId(1), addr(4000), 10);
        reg.add(EventgroupId(1), addr(4000), 20);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn distinct_eventgroups_are_independent() {
        let mut reg = SubscriberRegistry::new();
        reg.add(EventgroupId(1), addr(4000), TTL_FOREVER);
        reg.add(EventgroupId(2), addr(4000), TTL_FOREVER);
        assert_eq!(reg.endpoints_for(EventgroupId(1)), vec![addr(4000)]);
        assert_eq!(reg.endpoints_for(EventgroupId(2)), vec![addr(4000)]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let mut reg = SubscriberRegistry::new();
        reg.add(EventgroupId(1), addr(4000), 0);
        assert!(reg.endpoints_for(EventgroupId(1)).is_empty());
    }

    #[test]
    fn forever_ttl_never_expires() {
        let mut reg = SubscriberRegistry::new();
        reg.add(EventgroupId(1), addr(4000), TTL_FOREVER);
        reg.expire();
        assert!(reg.has_subscribers(EventgroupId(1)));
    }
}
