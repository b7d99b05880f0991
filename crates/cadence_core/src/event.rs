//! Signals, connections, and event-source adapters
//!
//! [`Signal`] is the in-process event primitive: `connect` registers a sink
//! and returns an RAII [`Connection`] that disconnects on drop; `fire`
//! delivers one event to every sink connected at fire time.
//!
//! [`EventSource`] is the closed capability every event producer exposes to
//! the hook layer: a stable identity for change detection plus an attach
//! operation. Foreign producers plug in through [`SubscribeFn`], which is
//! resolved once at construction rather than re-probed on every use.

use slotmap::{new_key_type, SlotMap};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an event source, used by `use_event` to detect when
/// the source passed at a call site has changed between frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

new_key_type! {
    /// Key of one connected sink inside a signal
    pub(crate) struct SinkKey;
}

type Sink<E> = Rc<RefCell<Box<dyn FnMut(E)>>>;

struct SignalInner<E> {
    sinks: SlotMap<SinkKey, Sink<E>>,
}

/// A multicast event signal.
///
/// Cloning shares the subscriber list; all clones fire to the same sinks and
/// report the same [`SourceId`].
pub struct Signal<E> {
    inner: Rc<RefCell<SignalInner<E>>>,
    id: SourceId,
}

impl<E> Clone for Signal<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            id: self.id,
        }
    }
}

impl<E: 'static> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Signal<E> {
    /// Create a signal with no subscribers
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SignalInner {
                sinks: SlotMap::with_key(),
            })),
            id: SourceId::next(),
        }
    }

    /// Connect a sink; dropping the returned connection disconnects it
    pub fn connect(&self, sink: impl FnMut(E) + 'static) -> Connection {
        self.attach_boxed(Box::new(sink))
    }

    fn attach_boxed(&self, sink: Box<dyn FnMut(E)>) -> Connection {
        let key = self
            .inner
            .borrow_mut()
            .sinks
            .insert(Rc::new(RefCell::new(sink)));
        let weak = Rc::downgrade(&self.inner);
        let target: Weak<dyn Detach> = weak;
        Connection::sink(target, key)
    }

    /// Deliver an event to every sink connected at fire time.
    ///
    /// The subscriber list is snapshotted first, so sinks may disconnect
    /// themselves or connect new sinks re-entrantly; sinks connected during
    /// the fire are not invoked for it, and sinks disconnected mid-fire are
    /// skipped.
    pub fn fire(&self, event: E)
    where
        E: Clone,
    {
        let snapshot: Vec<(SinkKey, Sink<E>)> = self
            .inner
            .borrow()
            .sinks
            .iter()
            .map(|(key, sink)| (key, Rc::clone(sink)))
            .collect();

        for (key, sink) in snapshot {
            let live = self.inner.borrow().sinks.contains_key(key);
            if live {
                (sink.borrow_mut())(event.clone());
            }
        }
    }

    /// Number of currently connected sinks
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().sinks.len()
    }
}

/// Type-erased detach capability, implemented by every signal's inner table
pub(crate) trait Detach {
    fn detach(&self, key: SinkKey);
    fn is_attached(&self, key: SinkKey) -> bool;
}

impl<E: 'static> Detach for RefCell<SignalInner<E>> {
    fn detach(&self, key: SinkKey) {
        self.borrow_mut().sinks.remove(key);
    }

    fn is_attached(&self, key: SinkKey) -> bool {
        self.borrow().sinks.contains_key(key)
    }
}

enum ConnectionInner {
    /// Attached to a signal's sink table
    Sink {
        target: Weak<dyn Detach>,
        key: SinkKey,
    },
    /// Foreign subscription torn down by a closure
    Teardown(Box<dyn FnOnce()>),
    /// Already disconnected (or forgotten)
    Done,
}

/// RAII handle to one subscription.
///
/// Dropping the connection tears the subscription down; `forget` leaks it
/// intentionally for subscriptions meant to live as long as the producer.
pub struct Connection {
    inner: ConnectionInner,
}

impl Connection {
    pub(crate) fn sink(target: Weak<dyn Detach>, key: SinkKey) -> Self {
        Self {
            inner: ConnectionInner::Sink { target, key },
        }
    }

    /// Wrap a foreign subscription whose teardown is a closure
    pub fn from_teardown(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            inner: ConnectionInner::Teardown(Box::new(teardown)),
        }
    }

    /// Tear the subscription down now; later calls are no-ops
    pub fn disconnect(&mut self) {
        match std::mem::replace(&mut self.inner, ConnectionInner::Done) {
            ConnectionInner::Sink { target, key } => {
                if let Some(target) = target.upgrade() {
                    target.detach(key);
                }
            }
            ConnectionInner::Teardown(teardown) => teardown(),
            ConnectionInner::Done => {}
        }
    }

    /// Check whether the subscription is still live
    pub fn is_connected(&self) -> bool {
        match &self.inner {
            ConnectionInner::Sink { target, key } => target
                .upgrade()
                .is_some_and(|target| target.is_attached(*key)),
            ConnectionInner::Teardown(_) => true,
            ConnectionInner::Done => false,
        }
    }

    /// Intentionally leak the subscription: it will never be torn down
    pub fn forget(mut self) {
        self.inner = ConnectionInner::Done;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Closed capability an event producer exposes to the hook layer
pub trait EventSource<E> {
    /// Stable identity used for source-change detection
    fn source_id(&self) -> SourceId;

    /// Subscribe a sink, returning its teardown handle
    fn attach(&self, sink: Box<dyn FnMut(E)>) -> Connection;
}

impl<E: 'static> EventSource<E> for Signal<E> {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn attach(&self, sink: Box<dyn FnMut(E)>) -> Connection {
        self.attach_boxed(sink)
    }
}

type SubscribeImpl<E> = Rc<dyn Fn(Box<dyn FnMut(E)>) -> Connection>;

/// Adapter wrapping a subscribe closure of a foreign event producer.
///
/// The closure receives the sink and must return a [`Connection`]
/// (typically via [`Connection::from_teardown`] around the producer's own
/// unsubscribe handle). Identity is assigned once at construction.
pub struct SubscribeFn<E> {
    id: SourceId,
    subscribe: SubscribeImpl<E>,
}

impl<E> Clone for SubscribeFn<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            subscribe: Rc::clone(&self.subscribe),
        }
    }
}

impl<E> SubscribeFn<E> {
    /// Wrap a subscribe closure
    pub fn new(subscribe: impl Fn(Box<dyn FnMut(E)>) -> Connection + 'static) -> Self {
        Self {
            id: SourceId::next(),
            subscribe: Rc::new(subscribe),
        }
    }
}

impl<E: 'static> EventSource<E> for SubscribeFn<E> {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn attach(&self, sink: Box<dyn FnMut(E)>) -> Connection {
        (self.subscribe)(sink)
    }
}
