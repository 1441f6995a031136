use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<E>)>,
    journal: Vec<E>,
    journal_capacity: usize,
}

/// Typed observable with an optional bounded journal.
///
/// Listeners run synchronously on the emitting task, in subscription order.
/// The internal lock is released before listeners run, so a listener may
/// query (or emit on) the component that owns the bus.
pub struct EventBus<E> {
    inner: Mutex<Inner<E>>,
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("listeners", &inner.listeners.len())
            .field("journal_len", &inner.journal.len())
            .field("journal_capacity", &inner.journal_capacity)
            .finish()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventBus<E> {
    /// Journal disabled; events only reach listeners.
    pub fn new() -> Self {
        Self::with_journal_capacity(0)
    }

    /// Keeps the most recent `capacity` events for later inspection.
    pub fn with_journal_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                listeners: Vec::new(),
                journal: Vec::new(),
                journal_capacity: capacity,
            }),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(sid, _)| *sid != id);
        inner.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn emit(&self, event: E) {
        let listeners: Vec<Listener<E>> = {
            let mut inner = self.inner.lock();
            if inner.journal_capacity > 0 {
                if inner.journal.len() == inner.journal_capacity {
                    inner.journal.remove(0);
                }
                inner.journal.push(event.clone());
            }
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn events(&self) -> Vec<E> {
        self.inner.lock().journal.clone()
    }

    pub fn drain(&self) -> Vec<E> {
        std::mem::take(&mut self.inner.lock().journal)
    }
}

#[cfg(test)]
mod tests {
    use super::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn listeners_receive_events_in_order() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |e| sink.lock().push(*e));
        bus.emit(1);
        bus.emit(2);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus: EventBus<&'static str> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("a");
        assert!(bus.unsubscribe(id));
        bus.emit("b");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn journal_is_bounded_and_drainable() {
        let bus: EventBus<u32> = EventBus::with_journal_capacity(2);
        bus.emit(1);
        bus.emit(2);
        bus.emit(3);
        assert_eq!(bus.events(), vec![2, 3]);
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(bus.events().is_empty());
    }
}
