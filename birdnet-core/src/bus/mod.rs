//! Single-process publish/subscribe event bus (SPEC_FULL §4.7).
//!
//! Structurally grounded on the broadcast-fan-out shape of
//! `apps/orchestrator/src/services/event_bus.rs` in the retrieved pack (one
//! publish call reaching every interested subscriber), but built on
//! per-subscriber bounded queues instead of `tokio::sync::broadcast` so each
//! subscriber can carry its own capacity and overflow policy (`broadcast`
//! only offers a single global lag-drop policy shared by every receiver,
//! which can't express `drop_newest` or `block_with_timeout`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::model::BusEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropOldest,
    DropNewest,
    BlockWithTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    All,
    Exact(String),
}

impl TopicFilter {
    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Exact(t) => t == topic,
        }
    }
}

struct Mailbox {
    queue: Mutex<VecDeque<BusEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

struct SubscriberState {
    name: String,
    topic_filter: TopicFilter,
    policy: OverflowPolicy,
    mailbox: Arc<Mailbox>,
    dropped: AtomicU64,
    timeouts: AtomicU64,
}

/// Handle returned from [`EventBus::subscribe`]. Dropping it does not
/// unsubscribe — callers with an explicit disconnect moment (the SSE
/// firehose closing a client connection) call [`EventBus::unsubscribe`].
pub struct BusReceiver {
    mailbox: Arc<Mailbox>,
}

impl BusReceiver {
    /// Waits for the next event, or `None` once the bus has drained and
    /// closed this subscriber's queue.
    pub async fn recv(&self) -> Option<BusEvent> {
        loop {
            {
                let mut q = self.mailbox.queue.lock();
                if let Some(event) = q.pop_front() {
                    return Some(event);
                }
                if self.mailbox.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.mailbox.notify.notified().await;
        }
    }
}

#[derive(Default)]
pub struct SubscriberStats {
    pub events_dropped: u64,
    pub publish_timeouts: u64,
}

struct EventBusInner {
    subscribers: DashMap<u64, Arc<SubscriberState>>,
    next_id: AtomicU64,
    draining: AtomicBool,
}

/// Cheaply cloneable handle to the bus; every pipeline stage holds a clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// `name` identifies this subscriber on the `{subscriber,topic}`-labeled
    /// `events_dropped`/`publish_timeout` metrics (SPEC_FULL §4.7/§6) — e.g.
    /// `"persistence"`, `"mqtt"`, `"sse"`.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        topic_filter: TopicFilter,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (u64, BusReceiver) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let state = Arc::new(SubscriberState {
            name: name.into(),
            topic_filter,
            policy,
            mailbox: mailbox.clone(),
            dropped: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        });
        self.inner.subscribers.insert(id, state);
        (id, BusReceiver { mailbox })
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Some((_, state)) = self.inner.subscribers.remove(&id) {
            state.mailbox.closed.store(true, Ordering::Release);
            state.mailbox.notify.notify_waiters();
        }
    }

    pub fn stats(&self, id: u64) -> Option<SubscriberStats> {
        self.inner.subscribers.get(&id).map(|s| SubscriberStats {
            events_dropped: s.dropped.load(Ordering::Relaxed),
            publish_timeouts: s.timeouts.load(Ordering::Relaxed),
        })
    }

    /// Publishes `event` to every subscriber whose topic filter matches
    /// `event.topic()`. Non-blocking for `drop_oldest`/`drop_newest`
    /// subscribers; awaits up to its configured timeout for
    /// `block_with_timeout` subscribers.
    pub async fn publish(&self, event: BusEvent) {
        if self.inner.draining.load(Ordering::Acquire) {
            return;
        }
        let topic = event.topic();
        let matching: Vec<Arc<SubscriberState>> = self
            .inner
            .subscribers
            .iter()
            .filter(|entry| entry.value().topic_filter.matches(topic))
            .map(|entry| entry.value().clone())
            .collect();

        for sub in matching {
            deliver_one(&sub, topic, event.clone()).await;
        }
    }

    /// Stops accepting new publishes, waits up to `deadline` for all
    /// mailboxes to drain, then closes every subscriber queue (SPEC_FULL
    /// §4.7 "Shutdown").
    pub async fn drain(&self, deadline: Duration) {
        self.inner.draining.store(true, Ordering::Release);
        let started = Instant::now();
        loop {
            let all_empty = self
                .inner
                .subscribers
                .iter()
                .all(|e| e.value().mailbox.queue.lock().is_empty());
            if all_empty || started.elapsed() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for entry in self.inner.subscribers.iter() {
            entry.value().mailbox.closed.store(true, Ordering::Release);
            entry.value().mailbox.notify.notify_waiters();
        }
        debug!("event bus drained");
    }
}

async fn deliver_one(sub: &Arc<SubscriberState>, topic: &str, event: BusEvent) {
    match sub.policy {
        OverflowPolicy::DropOldest => {
            let mut q = sub.mailbox.queue.lock();
            if q.len() >= sub.mailbox.capacity {
                q.pop_front();
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                record_dropped(sub, topic);
            }
            q.push_back(event);
            drop(q);
            sub.mailbox.notify.notify_one();
        }
        OverflowPolicy::DropNewest => {
            let mut q = sub.mailbox.queue.lock();
            if q.len() >= sub.mailbox.capacity {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                record_dropped(sub, topic);
            } else {
                q.push_back(event);
                drop(q);
                sub.mailbox.notify.notify_one();
            }
        }
        OverflowPolicy::BlockWithTimeout(timeout) => {
            let deadline = Instant::now() + timeout;
            loop {
                {
                    let mut q = sub.mailbox.queue.lock();
                    if q.len() < sub.mailbox.capacity {
                        q.push_back(event);
                        drop(q);
                        sub.mailbox.notify.notify_one();
                        return;
                    }
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    sub.timeouts.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(
                        crate::sinks::prometheus::metric_names::PUBLISH_TIMEOUT_TOTAL,
                        "subscriber" => sub.name.clone(),
                        "topic" => topic.to_string(),
                    )
                    .increment(1);
                    warn!(subscriber = %sub.name, topic, "publish_timeout: subscriber queue still full after deadline");
                    return;
                }
                let _ = tokio::time::timeout(remaining, sub.mailbox.notify.notified()).await;
            }
        }
    }
}

fn record_dropped(sub: &Arc<SubscriberState>, topic: &str) {
    metrics::counter!(
        crate::sinks::prometheus::metric_names::EVENTS_DROPPED_TOTAL,
        "subscriber" => sub.name.clone(),
        "topic" => topic.to_string(),
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LifecycleKind, SystemEvent};

    fn lifecycle_event(component: &str) -> BusEvent {
        BusEvent::System(Box::new(SystemEvent::Lifecycle {
            kind: LifecycleKind::Start,
            component: component.into(),
            cause: None,
            timestamp: chrono::Utc::now(),
        }))
    }

    #[tokio::test]
    async fn subscriber_receives_matching_topic_only() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe("test", TopicFilter::Exact("lifecycle".into()), 4, OverflowPolicy::DropOldest);

        bus.publish(lifecycle_event("watchdog")).await;
        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.topic(), "lifecycle");
    }

    #[tokio::test]
    async fn drop_oldest_keeps_the_newest_events() {
        let bus = EventBus::new();
        let (id, rx) = bus.subscribe("test", TopicFilter::All, 2, OverflowPolicy::DropOldest);

        bus.publish(lifecycle_event("a")).await;
        bus.publish(lifecycle_event("b")).await;
        bus.publish(lifecycle_event("c")).await;

        let stats = bus.stats(id).unwrap();
        assert_eq!(stats.events_dropped, 1);

        let first = rx.recv().await.unwrap();
        match first {
            BusEvent::System(e) => match *e {
                SystemEvent::Lifecycle { component, .. } => assert_eq!(component, "b"),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn drop_newest_discards_the_incoming_event() {
        let bus = EventBus::new();
        let (id, rx) = bus.subscribe("test", TopicFilter::All, 1, OverflowPolicy::DropNewest);

        bus.publish(lifecycle_event("a")).await;
        bus.publish(lifecycle_event("b")).await;

        let stats = bus.stats(id).unwrap();
        assert_eq!(stats.events_dropped, 1);
        let first = rx.recv().await.unwrap();
        match first {
            BusEvent::System(e) => match *e {
                SystemEvent::Lifecycle { component, .. } => assert_eq!(component, "a"),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn drain_closes_subscriber_queues() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe("test", TopicFilter::All, 4, OverflowPolicy::DropOldest);
        bus.drain(Duration::from_millis(50)).await;
        assert!(rx.recv().await.is_none());
    }
}
