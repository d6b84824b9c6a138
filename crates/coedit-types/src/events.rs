//! Typed event registry for shared data types
//!
//! Callbacks register per event kind (or for everything) and receive the
//! event by reference. No string-keyed dispatch.

use coedit_protocol::{DocumentValue, Operation};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub enum Event {
    /// Granular mutation events carry the applied operation.
    Insert(Operation),
    Delete(Operation),
    Replace(Operation),
    Move(Operation),
    Set(Operation),
    Batch(Operation),
    /// Whole-value transition, also fired for snapshot restores.
    Change {
        new: DocumentValue,
        old: DocumentValue,
    },
    /// Every applied operation, granular or not.
    Operation(Operation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Delete,
    Replace,
    Move,
    Set,
    Batch,
    Change,
    Operation,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Insert(_) => EventKind::Insert,
            Event::Delete(_) => EventKind::Delete,
            Event::Replace(_) => EventKind::Replace,
            Event::Move(_) => EventKind::Move,
            Event::Set(_) => EventKind::Set,
            Event::Batch(_) => EventKind::Batch,
            Event::Change { .. } => EventKind::Change,
            Event::Operation(_) => EventKind::Operation,
        }
    }
}

/// Handle for unsubscribing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

struct Registration {
    id: SubscriptionId,
    /// None listens to every kind.
    filter: Option<EventKind>,
    listener: Listener,
}

#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), Box::new(listener))
    }

    /// Register a listener for every event.
    pub fn on_any<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Box::new(listener))
    }

    fn register(&self, filter: Option<EventKind>, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Registration {
            id,
            filter,
            listener,
        });
        id
    }

    /// Drop a listener. Unknown ids are ignored.
    pub fn off(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|r| r.id != id);
    }

    pub fn emit(&self, event: &Event) {
        let listeners = self.listeners.lock();
        for registration in listeners.iter() {
            match registration.filter {
                Some(kind) if kind != event.kind() => {}
                _ => (registration.listener)(event),
            }
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_common::{ClientId, OperationId};
    use coedit_protocol::OperationKind;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn sample_op() -> Operation {
        Operation::new(
            OperationId::new_unchecked("op"),
            ClientId::new_unchecked("c1"),
            0,
            1,
            OperationKind::Noop,
        )
    }

    #[test]
    fn filtered_listeners_only_see_their_kind() {
        let emitter = EventEmitter::new();
        let inserts = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let counter = inserts.clone();
        emitter.on(EventKind::Insert, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let counter = all.clone();
        emitter.on_any(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        emitter.emit(&Event::Insert(sample_op()));
        emitter.emit(&Event::Operation(sample_op()));

        assert_eq!(inserts.load(Ordering::Relaxed), 1);
        assert_eq!(all.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn off_unregisters() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = emitter.on_any(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        emitter.emit(&Event::Operation(sample_op()));
        emitter.off(id);
        emitter.emit(&Event::Operation(sample_op()));

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
