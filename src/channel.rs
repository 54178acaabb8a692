use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Notify;

use crate::error::PipelineError;

pub const DEFAULT_CAPACITY: usize = 64;

/// Byte-size probe used for channel byte accounting. Types with no natural
/// size contribute 0.
pub trait ByteSized {
    fn size_bytes(&self) -> usize;
}

impl ByteSized for i64 {
    fn size_bytes(&self) -> usize {
        std::mem::size_of::<i64>()
    }
}

impl ByteSized for String {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

fn wall_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

struct SubscriberShared<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    detached: AtomicBool,
    /// Items dropped from this subscriber's buffer under capacity pressure.
    lag: AtomicU64,
    /// Items actually handed to the consumer.
    msg_count: AtomicU64,
    byte_count: AtomicU64,
}

impl<T> SubscriberShared<T> {
    fn new() -> Self {
        SubscriberShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            detached: AtomicBool::new(false),
            lag: AtomicU64::new(0),
            msg_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
        }
    }
}

struct ChannelState<T> {
    subscribers: HashMap<String, Arc<SubscriberShared<T>>>,
    closed: bool,
    msg_count: u64,
    byte_count: u64,
    last_send_time: f64,
}

/// One-producer, many-subscriber broadcast with a bounded buffer per
/// subscriber.
///
/// A full buffer never blocks the producer: the oldest buffered item is
/// dropped and the subscriber's `lag` counter incremented. Per-subscriber
/// delivery is FIFO modulo those drops; nothing is synchronized across
/// subscribers.
pub struct Channel<T> {
    name: String,
    capacity: usize,
    state: Mutex<ChannelState<T>>,
}

impl<T: ByteSized + Clone> Channel<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Channel {
            name: name.into(),
            capacity: capacity.max(1),
            state: Mutex::new(ChannelState {
                subscribers: HashMap::new(),
                closed: false,
                msg_count: 0,
                byte_count: 0,
                last_send_time: 0.0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attach a subscriber. The returned handle is the only way to consume;
    /// the subscriber sees every item published from this moment on.
    pub fn subscribe(&self, subscriber_id: &str) -> Result<Subscription<T>, PipelineError> {
        let mut state = self.state.lock().unwrap();
        if state.subscribers.contains_key(subscriber_id) {
            return Err(PipelineError::AlreadySubscribed(subscriber_id.to_string()));
        }
        let shared = Arc::new(SubscriberShared::new());
        if state.closed {
            shared.detached.store(true, Ordering::Release);
        }
        state
            .subscribers
            .insert(subscriber_id.to_string(), shared.clone());
        Ok(Subscription { shared })
    }

    /// Detach a subscriber and discard its buffer. Unknown ids are a no-op.
    pub fn unsubscribe(&self, subscriber_id: &str) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.subscribers.remove(subscriber_id)
        };
        if let Some(shared) = removed {
            shared.detached.store(true, Ordering::Release);
            shared.queue.lock().unwrap().clear();
            shared.notify.notify_one();
        }
    }

    /// Push `item` into every subscriber's buffer, dropping the oldest entry
    /// of any buffer already at capacity. Never blocks on a slow consumer.
    /// After `close` this is a no-op.
    pub fn publish(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        let size = item.size_bytes() as u64;
        // Channel-level counters move even with zero subscribers, so an
        // unwired producer is still visible in the metrics stream.
        state.msg_count += 1;
        state.byte_count += size;
        state.last_send_time = wall_seconds();

        for shared in state.subscribers.values() {
            {
                let mut queue = shared.queue.lock().unwrap();
                if queue.len() >= self.capacity {
                    queue.pop_front();
                    shared.lag.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(item.clone());
            }
            shared.notify.notify_one();
        }
    }

    /// Wake every receiver; subsequent publishes are dropped. Subscriber
    /// state (and whatever sits in the buffers) is kept for inspection.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        for shared in state.subscribers.values() {
            shared.detached.store(true, Ordering::Release);
            shared.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    /// Point-in-time counters for the metrics engine. Holds the channel lock
    /// only long enough to copy numbers out.
    pub fn stats(&self) -> ChannelStats {
        let state = self.state.lock().unwrap();
        let subscribers = state
            .subscribers
            .iter()
            .map(|(id, shared)| {
                (
                    id.clone(),
                    SubscriberStats {
                        lag: shared.lag.load(Ordering::Relaxed),
                        msg_count: shared.msg_count.load(Ordering::Relaxed),
                        byte_count: shared.byte_count.load(Ordering::Relaxed),
                        depth: shared.queue.lock().unwrap().len(),
                    },
                )
            })
            .collect();
        ChannelStats {
            name: self.name.clone(),
            msg_count: state.msg_count,
            byte_count: state.byte_count,
            last_send_time: state.last_send_time,
            subscribers,
        }
    }
}

/// Consuming end of one subscriber's buffer.
///
/// Dropping the handle does *not* unsubscribe: the buffer stays attached (and
/// keeps accounting drops) until `unsubscribe` or channel teardown, so a dead
/// consumer remains visible as growing lag.
pub struct Subscription<T> {
    shared: Arc<SubscriberShared<T>>,
}

impl<T: ByteSized> Subscription<T> {
    /// Next item for this subscriber, or `None` once the channel is closed or
    /// the subscriber was detached. Closure wins over buffered items: what is
    /// left in the buffer stays there for inspection.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);

            if self.shared.detached.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = self.pop() {
                return Some(item);
            }
            notified.as_mut().await;
        }
    }

    fn pop(&self) -> Option<T> {
        let item = self.shared.queue.lock().unwrap().pop_front();
        if let Some(item) = &item {
            self.shared.msg_count.fetch_add(1, Ordering::Relaxed);
            self.shared
                .byte_count
                .fetch_add(item.size_bytes() as u64, Ordering::Relaxed);
        }
        item
    }

    pub fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::Acquire)
    }
}

/// Counters copied out of a channel for one metrics sample.
#[derive(Debug, Clone)]
pub struct ChannelStats {
    pub name: String,
    pub msg_count: u64,
    pub byte_count: u64,
    pub last_send_time: f64,
    pub subscribers: HashMap<String, SubscriberStats>,
}

impl ChannelStats {
    /// Max queue depth across subscribers.
    pub fn buffer_depth(&self) -> usize {
        self.subscribers.values().map(|s| s.depth).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct SubscriberStats {
    pub lag: u64,
    pub msg_count: u64,
    pub byte_count: u64,
    pub depth: usize,
}
