//! Change Notification Relay: in-process publish/subscribe of invalidation
//! signals.
//!
//! Architecture:
//!   engine mutation → NotificationRelay::publish(event) → bounded queue per session
//!   session → Subscription::drain() → re-query the stores
//!
//! Events are advisory: they tell a session to refresh, never what the new
//! state is. Publishing never blocks and never fails the mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{DEFAULT_RELAY_QUEUE_CAPACITY, MAX_RELAY_QUEUE_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Listing,
    Message,
    Disclosure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub listing_id: String,
    pub thread_id: Option<String>,
    /// Organizations with a direct stake: listing owner/reserver, thread
    /// participants, grant parties.
    pub audience: Vec<String>,
    /// Set when the open marketplace itself changed (listing created or
    /// reserved), which affects every session's marketplace view.
    pub marketplace: bool,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn listing(listing_id: &str, audience: Vec<String>, marketplace: bool) -> Self {
        Self {
            kind: EntityKind::Listing,
            listing_id: listing_id.to_string(),
            thread_id: None,
            audience,
            marketplace,
            at: Utc::now(),
        }
    }

    pub fn message(listing_id: &str, thread_id: &str, audience: Vec<String>) -> Self {
        Self {
            kind: EntityKind::Message,
            listing_id: listing_id.to_string(),
            thread_id: Some(thread_id.to_string()),
            audience,
            marketplace: false,
            at: Utc::now(),
        }
    }

    pub fn disclosure(listing_id: &str, thread_id: &str, audience: Vec<String>) -> Self {
        Self {
            kind: EntityKind::Disclosure,
            listing_id: listing_id.to_string(),
            thread_id: Some(thread_id.to_string()),
            audience,
            marketplace: false,
            at: Utc::now(),
        }
    }

    pub fn concerns(&self, org_id: &str) -> bool {
        self.marketplace || self.audience.iter().any(|o| o == org_id)
    }
}

struct Subscriber {
    id: u64,
    org_id: String,
    tx: SyncSender<ChangeEvent>,
}

/// Live counters, readable without taking the subscriber lock.
#[derive(Default)]
pub struct RelayStats {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

/// One subscription channel per organization session, multiplexing every
/// entity kind.
pub struct NotificationRelay {
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
    next_id: AtomicU64,
    stats: RelayStats,
}

impl Default for NotificationRelay {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_QUEUE_CAPACITY)
    }
}

impl NotificationRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.clamp(1, MAX_RELAY_QUEUE_CAPACITY),
            next_id: AtomicU64::new(1),
            stats: RelayStats::default(),
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    /// Opens a live session for `org_id`. Dropping the subscription
    /// unsubscribes it on the next publish.
    pub fn subscribe(&self, org_id: &str) -> Subscription {
        let (tx, rx) = sync_channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(Subscriber {
            id,
            org_id: org_id.to_string(),
            tx,
        });
        tracing::debug!(subscription = id, org_id = %org_id, "Relay subscription opened");
        Subscription {
            id,
            org_id: org_id.to_string(),
            rx,
        }
    }

    /// Fans `event` out to every concerned session. Never blocks.
    pub fn publish(&self, event: ChangeEvent) {
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());

        subs.retain(|sub| {
            if !event.concerns(&sub.org_id) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    true
                }
                // A full queue already holds a pending refresh signal
                Err(TrySendError::Full(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subscription = sub.id, org_id = %sub.org_id, "Relay queue full, event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!(subscription = sub.id, "Relay subscription closed");
                    false
                }
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            published: self.stats.published.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Receiving end of one organization session.
pub struct Subscription {
    id: u64,
    org_id: String,
    rx: Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn try_next(&self) -> Option<ChangeEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Empties the queue. True if anything arrived, i.e. the session
    /// should re-query its views.
    pub fn drain(&self) -> bool {
        let mut any = false;
        while self.try_next().is_some() {
            any = true;
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_scoping() {
        let relay = NotificationRelay::new(8);
        let a = relay.subscribe("org-a");
        let b = relay.subscribe("org-b");
        let c = relay.subscribe("org-c");

        relay.publish(ChangeEvent::message("l1", "t1", vec!["org-a".into(), "org-b".into()]));

        assert_eq!(a.try_next().unwrap().thread_id.as_deref(), Some("t1"));
        assert!(b.try_next().is_some());
        assert!(c.try_next().is_none());
    }

    #[test]
    fn test_marketplace_events_reach_everyone() {
        let relay = NotificationRelay::new(8);
        let a = relay.subscribe("org-a");
        let b = relay.subscribe("org-b");

        relay.publish(ChangeEvent::listing("l1", vec!["org-a".into()], true));
        assert!(a.drain());
        assert!(b.drain());
        assert!(!b.drain());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let relay = NotificationRelay::new(2);
        let a = relay.subscribe("org-a");
        for i in 0..5 {
            relay.publish(ChangeEvent::listing(&format!("l{}", i), vec!["org-a".into()], false));
        }
        let stats = relay.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 3);
        assert!(a.drain());
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let relay = NotificationRelay::new(4);
        let a = relay.subscribe("org-a");
        {
            let _b = relay.subscribe("org-a");
        }
        assert_eq!(relay.subscriber_count(), 2);
        relay.publish(ChangeEvent::listing("l1", vec!["org-a".into()], false));
        assert_eq!(relay.subscriber_count(), 1);
        assert!(a.try_next().is_some());
    }

    #[test]
    fn test_publish_from_many_threads() {
        let relay = NotificationRelay::shared(1024);
        let sub = relay.subscribe("org-a");
        std::thread::scope(|s| {
            for t in 0..4 {
                let relay = relay.clone();
                s.spawn(move || {
                    for i in 0..25 {
                        relay.publish(ChangeEvent::listing(&format!("l{}-{}", t, i), vec!["org-a".into()], false));
                    }
                });
            }
        });
        let mut count = 0;
        while sub.try_next().is_some() {
            count += 1;
        }
        assert_eq!(count, 100);
    }
}
