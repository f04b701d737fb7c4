//! The typed event bus itself (spec.md §4.L).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use helm_core::Priority;
use helm_errors::HelmError;
use tracing::warn;

use crate::inbox::{DeliveryOutcome, Inbox};

/// Default bound for a non-critical subscriber's inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;
/// Default deadline a CRITICAL publish waits for inbox space per subscriber.
pub const DEFAULT_CRITICAL_DEADLINE: Duration = Duration::from_millis(500);

/// Opaque handle identifying one subscriber's inbox within a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A typed, priority-aware pub/sub bus. `E` is the event payload type;
/// callers typically define one enum per domain (MCP lifecycle events,
/// pipeline events, ...) and run one bus per enum.
pub struct EventBus<E> {
    subscribers: DashMap<SubscriberId, Arc<Inbox<E>>>,
    next_id: AtomicU64,
    inbox_capacity: usize,
    critical_deadline: Duration,
}

/// Result of a publish call: how many subscribers received the event and,
/// for CRITICAL events, which (if any) missed their deadline.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    /// Subscribers the event was successfully enqueued to.
    pub delivered: usize,
    /// Subscribers that missed the CRITICAL delivery deadline. Always empty
    /// for non-critical publishes, which never fail to enqueue.
    pub missed_deadline: Vec<SubscriberId>,
}

impl<E> EventBus<E> {
    /// Create a bus with the default inbox capacity and critical deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_INBOX_CAPACITY, DEFAULT_CRITICAL_DEADLINE)
    }

    /// Create a bus with explicit per-subscriber inbox capacity and the
    /// deadline CRITICAL publishes will wait for space.
    #[must_use]
    pub fn with_config(inbox_capacity: usize, critical_deadline: Duration) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            inbox_capacity,
            critical_deadline,
        }
    }

    /// Register a new subscriber, returning its id and inbox.
    pub fn subscribe(&self) -> (SubscriberId, Arc<Inbox<E>>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let inbox = Arc::new(Inbox::new(self.inbox_capacity));
        self.subscribers.insert(id, inbox.clone());
        (id, inbox)
    }

    /// Remove a subscriber; it stops receiving further publishes.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Publish an event at the given priority.
    ///
    /// `Priority::Critical` is delivered synchronously: the call awaits
    /// every subscriber's inbox having space, up to the bus's configured
    /// deadline. If any subscriber still hasn't freed up room by then, the
    /// call fails with `HelmError::Backpressure` after recording which
    /// subscribers did and didn't make it in the returned report. Every
    /// other priority is fire-and-forget: the event is enqueued
    /// immediately, evicting the oldest queued event if a subscriber's
    /// inbox is full, and the call never awaits subscriber consumption (and
    /// so can never fail).
    pub async fn publish(&self, event: E, priority: Priority) -> Result<PublishReport, HelmError>
    where
        E: Send + Sync,
    {
        let event = Arc::new(event);
        let mut report = PublishReport::default();

        if priority == Priority::Critical {
            for entry in self.subscribers.iter() {
                let (id, inbox) = (*entry.key(), entry.value().clone());
                match inbox
                    .push_with_deadline(event.clone(), self.critical_deadline)
                    .await
                {
                    DeliveryOutcome::Delivered => report.delivered += 1,
                    DeliveryOutcome::DeadlineExceeded => {
                        warn!(?id, "critical event missed delivery deadline");
                        report.missed_deadline.push(id);
                    }
                }
            }
            if !report.missed_deadline.is_empty() {
                return Err(HelmError::Backpressure);
            }
        } else {
            for entry in self.subscribers.iter() {
                let (id, inbox) = (*entry.key(), entry.value());
                if inbox.push_drop_oldest(event.clone()).is_some() {
                    warn!(?id, "subscriber inbox full, dropped oldest event");
                }
                report.delivered += 1;
            }
        }

        Ok(report)
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Ping(u32);

    #[tokio::test]
    async fn non_critical_publish_never_blocks() {
        let bus: EventBus<Ping> = EventBus::with_config(1, Duration::from_millis(50));
        let (_id, inbox) = bus.subscribe();
        bus.publish(Ping(1), Priority::Low).await.unwrap();
        let report = bus.publish(Ping(2), Priority::Low).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(inbox.len(), 1);
        assert_eq!(*inbox.recv().await, Ping(2));
    }

    #[tokio::test]
    async fn critical_publish_fails_backpressure_on_missed_deadline() {
        let bus: EventBus<Ping> = EventBus::with_config(1, Duration::from_millis(20));
        let (_id, _inbox) = bus.subscribe();
        bus.publish(Ping(1), Priority::Low).await.unwrap();
        let error = bus.publish(Ping(2), Priority::Critical).await.unwrap_err();
        assert!(matches!(error, HelmError::Backpressure));
    }

    #[tokio::test]
    async fn critical_publish_delivers_when_space_frees() {
        let bus: Arc<EventBus<Ping>> = Arc::new(EventBus::with_config(1, Duration::from_millis(500)));
        let (_id, inbox) = bus.subscribe();
        bus.publish(Ping(1), Priority::Low).await.unwrap();

        let inbox2 = inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inbox2.try_pop();
        });

        let report = bus.publish(Ping(2), Priority::Critical).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(report.missed_deadline.is_empty());
    }

    #[tokio::test]
    async fn unsubscribed_subscriber_receives_nothing() {
        let bus: EventBus<Ping> = EventBus::new();
        let (id, _inbox) = bus.subscribe();
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
        let report = bus.publish(Ping(1), Priority::Normal).await.unwrap();
        assert_eq!(report.delivered, 0);
    }
}
