//! Bounded, priority-aware async command queue with token-bucket rate
//! limiting, CRITICAL preemption, and event-driven drain (spec.md §4.I).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use helm_core::{CommandTicket, Priority, Sequence, SequenceCounter};
use helm_errors::HelmError;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::parser::ParsedCommand;
use crate::processor::{CommandOutput, CommandProcessor, ExecutionContext};

/// Token-bucket rate limiter: holds up to `burst` tokens, refills at `rate`
/// tokens per second.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    rate_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(burst: u32, rate_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(burst).max(1.0),
            tokens: f64::from(burst).max(1.0),
            rate_per_sec: rate_per_sec.max(0.001),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate_per_sec)
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of waiting (not yet dispatched) commands.
    pub max_queue_size: usize,
    /// Number of commands that may run concurrently.
    pub concurrency: usize,
    /// Token-bucket burst capacity.
    pub burst: u32,
    /// Token-bucket refill rate, in tokens per second.
    pub rate_per_sec: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 256,
            concurrency: 4,
            burst: 10,
            rate_per_sec: 5.0,
        }
    }
}

#[derive(Clone, Copy)]
struct HeapItem {
    priority: Priority,
    sequence: Sequence,
    ticket: CommandTicket,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest priority first; within a priority, earliest sequence
        // (smallest) first — so reverse the sequence comparison.
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueuedEntry {
    parsed: ParsedCommand,
    ctx: ExecutionContext,
}

struct Inner {
    processor: Arc<CommandProcessor>,
    config: QueueConfig,
    waiting: Mutex<BinaryHeap<HeapItem>>,
    entries: DashMap<CommandTicket, QueuedEntry>,
    running: DashMap<CommandTicket, CancellationToken>,
    results: DashMap<CommandTicket, Result<CommandOutput, HelmError>>,
    running_count: AtomicUsize,
    processed_count: AtomicU64,
    sequence: SequenceCounter,
    token_bucket: Mutex<TokenBucket>,
    semaphore: Arc<Semaphore>,
    dispatch_notify: Notify,
    completion_notify: Notify,
}

/// The queue handle. Cheap to clone; every clone shares the same state and
/// background dispatcher.
#[derive(Clone)]
pub struct CommandQueue(Arc<Inner>);

impl CommandQueue {
    /// Build a queue and start its background dispatcher. Must be called
    /// from within a running Tokio runtime.
    #[must_use]
    pub fn new(processor: Arc<CommandProcessor>, config: QueueConfig) -> Self {
        let inner = Arc::new(Inner {
            token_bucket: Mutex::new(TokenBucket::new(config.burst, config.rate_per_sec)),
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            processor,
            waiting: Mutex::new(BinaryHeap::new()),
            entries: DashMap::new(),
            running: DashMap::new(),
            results: DashMap::new(),
            running_count: AtomicUsize::new(0),
            processed_count: AtomicU64::new(0),
            sequence: SequenceCounter::new(),
            dispatch_notify: Notify::new(),
            completion_notify: Notify::new(),
            config,
        });
        let queue = Self(inner);
        let dispatcher = queue.clone();
        tokio::spawn(async move { dispatcher.run_dispatcher().await });
        queue
    }

    /// Enqueue a command at the given priority. Fails `QueueFull` if the
    /// queue is at capacity, unless `priority` is `Critical`, in which case
    /// the oldest non-critical waiter is evicted with `Preempted`.
    pub fn enqueue(&self, parsed: ParsedCommand, ctx: ExecutionContext, priority: Priority) -> Result<CommandTicket, HelmError> {
        let mut waiting = self.0.waiting.lock();
        if waiting.len() >= self.0.config.max_queue_size {
            if priority == Priority::Critical {
                let evicted = evict_oldest_non_critical(&mut waiting).ok_or(HelmError::QueueFull {
                    max_size: self.0.config.max_queue_size,
                })?;
                self.0.entries.remove(&evicted.ticket);
                self.0.results.insert(evicted.ticket, Err(HelmError::Preempted));
                self.0.completion_notify.notify_waiters();
            } else {
                return Err(HelmError::QueueFull {
                    max_size: self.0.config.max_queue_size,
                });
            }
        }

        let ticket = CommandTicket::new();
        let sequence = self.0.sequence.next();
        self.0.entries.insert(ticket, QueuedEntry { parsed, ctx });
        waiting.push(HeapItem { priority, sequence, ticket });
        drop(waiting);
        self.0.dispatch_notify.notify_one();
        Ok(ticket)
    }

    /// Cancel a command. A still-waiting command is removed with a
    /// `Cancelled` result; a running command is signaled via its
    /// cancellation token (cooperative — the processor must observe it).
    pub fn cancel(&self, ticket: CommandTicket) -> Result<(), HelmError> {
        {
            let mut waiting = self.0.waiting.lock();
            let items: Vec<HeapItem> = waiting.drain().collect();
            let mut found = false;
            for item in items {
                if item.ticket == ticket {
                    found = true;
                } else {
                    waiting.push(item);
                }
            }
            if found {
                drop(waiting);
                self.0.entries.remove(&ticket);
                self.0.results.insert(ticket, Err(HelmError::Cancelled));
                self.0.completion_notify.notify_waiters();
                return Ok(());
            }
        }
        if let Some(token) = self.0.running.get(&ticket) {
            token.cancel();
            return Ok(());
        }
        Err(HelmError::Internal(format!("unknown command ticket {ticket}")))
    }

    /// Wait for the result of a previously enqueued command. Consumes the
    /// stored result; call once per ticket.
    pub async fn await_result(&self, ticket: CommandTicket) -> Result<CommandOutput, HelmError> {
        loop {
            let notified = self.0.completion_notify.notified();
            if let Some((_, result)) = self.0.results.remove(&ticket) {
                return result;
            }
            notified.await;
        }
    }

    /// Resolve once the queue is empty and nothing is running.
    pub async fn drain(&self) {
        loop {
            let notified = self.0.completion_notify.notified();
            if self.0.waiting.lock().is_empty() && self.0.running_count.load(AtomicOrdering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of commands waiting to be dispatched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.waiting.lock().len()
    }

    /// Whether the queue has no waiting commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of commands currently running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.0.running_count.load(AtomicOrdering::SeqCst)
    }

    /// Total number of commands dispatched to completion (any outcome).
    #[must_use]
    pub fn processed_count(&self) -> u64 {
        self.0.processed_count.load(AtomicOrdering::SeqCst)
    }

    async fn run_dispatcher(self) {
        loop {
            let notified = self.0.dispatch_notify.notified();
            let has_item = !self.0.waiting.lock().is_empty();
            if !has_item {
                notified.await;
                continue;
            }

            let permit = match self.0.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    notified.await;
                    continue;
                }
            };

            self.wait_for_token().await;

            let item = self.0.waiting.lock().pop();
            let Some(item) = item else {
                continue;
            };
            let Some((_, entry)) = self.0.entries.remove(&item.ticket) else {
                continue;
            };

            let token = CancellationToken::new();
            self.0.running.insert(item.ticket, token.clone());
            self.0.running_count.fetch_add(1, AtomicOrdering::SeqCst);
            debug!(ticket = %item.ticket, "dispatching command");

            let this = self.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    res = this.0.processor.execute(&entry.parsed, &entry.ctx) => res,
                    () = token.cancelled() => Err(HelmError::Cancelled),
                };
                this.0.results.insert(item.ticket, result);
                this.0.running.remove(&item.ticket);
                this.0.running_count.fetch_sub(1, AtomicOrdering::SeqCst);
                this.0.processed_count.fetch_add(1, AtomicOrdering::SeqCst);
                drop(permit);
                this.0.completion_notify.notify_waiters();
                this.0.dispatch_notify.notify_one();
            });
        }
    }

    async fn wait_for_token(&self) {
        loop {
            let wait = {
                let mut bucket = self.0.token_bucket.lock();
                if bucket.try_take() {
                    return;
                }
                bucket.time_until_next()
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

fn evict_oldest_non_critical(waiting: &mut BinaryHeap<HeapItem>) -> Option<HeapItem> {
    let mut items: Vec<HeapItem> = waiting.drain().collect();
    let idx = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.priority != Priority::Critical)
        .min_by_key(|(_, item)| item.sequence.0)
        .map(|(i, _)| i);
    let evicted = idx.map(|i| items.remove(i));
    for item in items {
        waiting.push(item);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::BuiltinCommand;
    use async_trait::async_trait;

    fn cmd(name: &str) -> ParsedCommand {
        ParsedCommand {
            command: name.to_string(),
            args: Vec::new(),
        }
    }

    struct RecordOrder {
        label: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BuiltinCommand for RecordOrder {
        fn name(&self) -> &str {
            &self.label
        }

        async fn run(&self, _args: &[String], _ctx: &ExecutionContext) -> Result<CommandOutput, HelmError> {
            self.log.lock().push(self.label.clone());
            Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn dispatches_highest_priority_first() {
        let processor = Arc::new(CommandProcessor::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        processor.register_builtin(Arc::new(RecordOrder {
            label: "low".to_string(),
            log: log.clone(),
        }));
        processor.register_builtin(Arc::new(RecordOrder {
            label: "high".to_string(),
            log: log.clone(),
        }));
        // Concurrency 0 holds both commands waiting until both are enqueued,
        // then a single slot opens so dispatch order is observable.
        let queue = CommandQueue::new(
            processor,
            QueueConfig {
                max_queue_size: 16,
                concurrency: 0,
                burst: 100,
                rate_per_sec: 1000.0,
            },
        );
        let low = queue.enqueue(cmd("low"), ExecutionContext::new(), Priority::Low).unwrap();
        let high = queue.enqueue(cmd("high"), ExecutionContext::new(), Priority::High).unwrap();
        queue.0.semaphore.add_permits(1);

        queue.drain().await;
        assert!(queue.await_result(high).await.is_ok());
        assert!(queue.await_result(low).await.is_ok());
        assert_eq!(*log.lock(), vec!["high".to_string(), "low".to_string()]);
    }

    #[tokio::test]
    async fn queue_full_rejects_unless_critical() {
        let processor = Arc::new(CommandProcessor::new());
        let queue = CommandQueue::new(
            processor,
            QueueConfig {
                max_queue_size: 1,
                concurrency: 0,
                burst: 1,
                rate_per_sec: 0.001,
            },
        );
        let _first = queue.enqueue(cmd("true"), ExecutionContext::new(), Priority::Normal).unwrap();
        let rejected = queue.enqueue(cmd("true"), ExecutionContext::new(), Priority::Normal);
        assert!(matches!(rejected, Err(HelmError::QueueFull { .. })));

        let critical = queue.enqueue(cmd("true"), ExecutionContext::new(), Priority::Critical);
        assert!(critical.is_ok());
    }

    #[tokio::test]
    async fn cancel_waiting_command_reports_cancelled() {
        let processor = Arc::new(CommandProcessor::new());
        let queue = CommandQueue::new(
            processor,
            QueueConfig {
                concurrency: 0,
                ..QueueConfig::default()
            },
        );
        let ticket = queue.enqueue(cmd("true"), ExecutionContext::new(), Priority::Normal).unwrap();
        queue.cancel(ticket).unwrap();
        let result = queue.await_result(ticket).await;
        assert!(matches!(result, Err(HelmError::Cancelled)));
    }

    #[tokio::test]
    async fn drain_waits_for_empty_and_idle() {
        let processor = Arc::new(CommandProcessor::new());
        let queue = CommandQueue::new(processor, QueueConfig::default());
        let _ = queue.enqueue(cmd("true"), ExecutionContext::new(), Priority::Normal).unwrap();
        queue.drain().await;
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.running_count(), 0);
    }
}
