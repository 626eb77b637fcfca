//! Synchronous fan-out for engine events.
//!
//! Listeners are passive observers (log sinks, UI feeds, test recorders)
//! with a non-blocking `on_event`; delivery walks them in subscription
//! order under a read lock, so publishing never suspends. A consumer that
//! needs to do real work belongs behind its own channel, not on the bus.

use crate::domain::events::{ActivityLevel, EventListener, TradingEvent, now_ms};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it receives every event published afterwards.
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.inner
            .listeners
            .write()
            .expect("event bus lock poisoned")
            .push(listener);
    }

    /// Deliver `event` to all current listeners, in subscription order.
    pub fn publish(&self, event: TradingEvent) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let listeners = self
            .inner
            .listeners
            .read()
            .expect("event bus lock poisoned");
        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }

    /// Stamp and publish an activity-feed entry.
    pub fn activity(&self, level: ActivityLevel, message: impl Into<String>) {
        self.publish(TradingEvent::Activity {
            level,
            message: message.into(),
            timestamp: now_ms(),
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .expect("event bus lock poisoned")
            .len()
    }

    /// Total events published since construction.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}
