//! Event Bus
//!
//! Fan-out of `TransportEvent`s to registered observers.
//!
//! # Architecture
//!
//! Two delivery paths share one `emit`:
//! - synchronous handlers registered with `subscribe`, called in registration
//!   order on the emitting task; a panicking handler is logged and skipped
//! - a tokio broadcast channel for async consumers via `receiver`
//!
//! Handlers must not block. Slow consumers should use `receiver` instead.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::application::events::{EventKind, TransportEvent};

/// Default capacity of the async broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

type Handler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

struct BusInner {
    handlers: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<TransportEvent>,
}

/// Observer bus for transport events.
///
/// # Example
///
/// ```rust
/// use quote_transport::application::events::{EventKind, TransportEvent};
/// use quote_transport::infrastructure::broadcast::EventBus;
///
/// let bus = EventBus::new();
/// let subscription = bus.subscribe(EventKind::Stopped, |event| {
///     assert_eq!(event, &TransportEvent::Stopped);
/// });
///
/// bus.emit(TransportEvent::Stopped);
/// subscription.unsubscribe();
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("receivers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus whose async channel buffers `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                tx: broadcast::channel(capacity.max(1)).0,
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The handler stays registered until `Subscription::unsubscribe` is called;
    /// dropping the handle does not detach it.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.write().push(Registration {
            id,
            kind,
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// New async receiver; sees only events emitted after this call.
    #[must_use]
    pub fn receiver(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.tx.subscribe()
    }

    /// Publish an event to every matching handler, then to async receivers.
    pub fn emit(&self, event: TransportEvent) {
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .iter()
            .filter(|r| r.kind.matches(&event))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::error!(kind = ?event.kind(), "Event handler panicked");
            }
        }

        // No receivers is not an error.
        let _ = self.inner.tx.send(event);
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }
}

/// Handle to a registered event handler.
#[must_use = "dropping a Subscription leaves the handler registered; keep it to unsubscribe"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Detach the handler. Returns `false` if it was already gone.
    #[allow(clippy::must_use_candidate)]
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut handlers = bus.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != self.id);
        handlers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = Arc::clone(&seen);
            let _sub = bus.subscribe(EventKind::All, move |_| seen.lock().push(n));
        }

        bus.emit(TransportEvent::StreamConnected);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let _sub = bus.subscribe(EventKind::Stopped, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(TransportEvent::StreamConnected);
        bus.emit(TransportEvent::Stopped);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicU64::new(0));

        let _bad = bus.subscribe(EventKind::All, |_| panic!("handler failure"));
        let d = Arc::clone(&delivered);
        let _good = bus.subscribe(EventKind::All, move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(TransportEvent::Stopped);
        bus.emit(TransportEvent::Stopped);

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_detaches_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let sub = bus.subscribe(EventKind::All, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(TransportEvent::Stopped);
        assert!(sub.unsubscribe());
        bus.emit(TransportEvent::Stopped);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn unsubscribe_after_bus_dropped() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::All, |_| {});
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[tokio::test]
    async fn receiver_gets_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();

        bus.emit(TransportEvent::StreamConnected);

        assert_eq!(rx.recv().await.unwrap(), TransportEvent::StreamConnected);
    }
}
