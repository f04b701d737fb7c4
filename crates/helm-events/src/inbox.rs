//! A bounded, drop-oldest-on-overflow subscriber inbox.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A single subscriber's bounded event queue. Non-critical publishes evict
/// the oldest entry on overflow (with a logged warning); critical publishes
/// wait for space up to a deadline instead of evicting (spec.md §4.L).
pub struct Inbox<E> {
    queue: Mutex<VecDeque<Arc<E>>>,
    capacity: usize,
    item_available: Notify,
    space_available: Notify,
}

/// Outcome of delivering a single critical event to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The event was enqueued.
    Delivered,
    /// No space freed up before the deadline elapsed.
    DeadlineExceeded,
}

impl<E> Inbox<E> {
    /// Create an inbox with the given bounded capacity (must be at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            item_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    /// Push an event, evicting the oldest entry if the inbox is full.
    /// Returns the evicted event, if any (the caller logs a warning).
    pub fn push_drop_oldest(&self, event: Arc<E>) -> Option<Arc<E>> {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(event);
            evicted
        };
        self.item_available.notify_one();
        evicted
    }

    /// Push an event, waiting up to `deadline` for space to free up instead
    /// of evicting. Used for CRITICAL events, which must not be silently
    /// dropped.
    pub async fn push_with_deadline(&self, event: Arc<E>, deadline: Duration) -> DeliveryOutcome {
        let start = tokio::time::Instant::now();
        loop {
            {
                let mut queue = self.queue.lock();
                if queue.len() < self.capacity {
                    queue.push_back(event);
                    drop(queue);
                    self.item_available.notify_one();
                    return DeliveryOutcome::Delivered;
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return DeliveryOutcome::DeadlineExceeded;
            }
            let remaining = deadline - elapsed;
            if tokio::time::timeout(remaining, self.space_available.notified())
                .await
                .is_err()
            {
                return DeliveryOutcome::DeadlineExceeded;
            }
        }
    }

    /// Pop the oldest event, waiting for one to arrive.
    pub async fn recv(&self) -> Arc<E> {
        loop {
            if let Some(event) = self.try_pop() {
                return event;
            }
            self.item_available.notified().await;
        }
    }

    /// Pop the oldest event without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<Arc<E>> {
        let mut queue = self.queue.lock();
        let event = queue.pop_front();
        if event.is_some() {
            drop(queue);
            self.space_available.notify_waiters();
        }
        event
    }

    /// Number of events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the inbox currently holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_evicts_when_full() {
        let inbox: Inbox<u32> = Inbox::new(2);
        assert!(inbox.push_drop_oldest(Arc::new(1)).is_none());
        assert!(inbox.push_drop_oldest(Arc::new(2)).is_none());
        let evicted = inbox.push_drop_oldest(Arc::new(3));
        assert_eq!(evicted, Some(Arc::new(1)));
        assert_eq!(inbox.len(), 2);
    }

    #[tokio::test]
    async fn deadline_exceeded_when_never_drained() {
        let inbox: Inbox<u32> = Inbox::new(1);
        inbox.push_drop_oldest(Arc::new(1));
        let outcome = inbox
            .push_with_deadline(Arc::new(2), Duration::from_millis(20))
            .await;
        assert_eq!(outcome, DeliveryOutcome::DeadlineExceeded);
    }

    #[tokio::test]
    async fn critical_push_succeeds_once_space_frees() {
        let inbox: Arc<Inbox<u32>> = Arc::new(Inbox::new(1));
        inbox.push_drop_oldest(Arc::new(1));
        let inbox2 = inbox.clone();
        let drainer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inbox2.try_pop();
        });
        let outcome = inbox
            .push_with_deadline(Arc::new(2), Duration::from_millis(500))
            .await;
        drainer.await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }
}
