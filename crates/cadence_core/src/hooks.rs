//! Built-in hooks
//!
//! - `use_event` — bridges an event source into a per-frame iterator, buffering
//!   firings between ticks in a FIFO queue
//! - `use_throttle` / `use_throttle_keyed` — time-gated boolean with a
//!   cooldown that survives skipped frames until it expires
//! - `use_delta_time`, `current_system` — frame-context conveniences
//!
//! All of these are plain functions over the hook-state store; user code can
//! build its own hooks the same way (mark the wrapper `#[track_caller]` so
//! the state resolves to the *user's* call site).

use crate::context::{self, SystemToken};
use crate::event::{Connection, EventSource, SourceId};
use crate::queue::Queue;
use crate::state::{use_hook_state, use_hook_state_with, Discriminator};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Iterator over events buffered since the last drain.
///
/// Yields `(index, event)` in firing order with a 1-based running index,
/// then `None` once the buffer is exhausted for this tick.
pub struct EventIter<E> {
    queue: Rc<RefCell<Queue<E>>>,
    index: u32,
}

impl<E> Iterator for EventIter<E> {
    type Item = (u32, E);

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.queue.borrow_mut().pop()?;
        self.index += 1;
        Some((self.index, event))
    }
}

struct EventHookState<E> {
    source: Option<SourceId>,
    connection: Option<Connection>,
    queue: Rc<RefCell<Queue<E>>>,
}

impl<E> Default for EventHookState<E> {
    fn default() -> Self {
        Self {
            source: None,
            connection: None,
            queue: Rc::new(RefCell::new(Queue::new())),
        }
    }
}

/// Buffer a source's events and drain them once per tick.
///
/// The first call at a call site connects to `source` and starts pushing
/// every firing into a private FIFO queue; each subsequent call returns an
/// iterator draining what accumulated since the last one. When the source
/// differs from the stored one (by [`SourceId`]), or the stored connection
/// has died, the old subscription is dropped, the buffer cleared, and a
/// fresh connection made. Sweeping the call site drops the connection and
/// the buffered events with it.
///
/// # Panics
///
/// Panics when called outside an active execution context.
#[track_caller]
pub fn use_event<E, S>(source: &S) -> EventIter<E>
where
    E: 'static,
    S: EventSource<E>,
{
    let handle = use_hook_state::<EventHookState<E>>();
    let queue = handle.with_mut(|state| {
        let current = source.source_id();
        let live = state
            .connection
            .as_ref()
            .is_some_and(|conn| conn.is_connected());
        if state.source != Some(current) || !live {
            // Dropping the old connection unsubscribes before we resubscribe.
            state.connection = None;
            state.queue.borrow_mut().clear();
            let queue = Rc::clone(&state.queue);
            state.connection =
                Some(source.attach(Box::new(move |event| queue.borrow_mut().push(event))));
            state.source = Some(current);
        }
        Rc::clone(&state.queue)
    });

    EventIter { queue, index: 0 }
}

#[derive(Default)]
struct ThrottleState {
    last_fire: Option<Instant>,
    expiry: Option<Instant>,
}

/// Time-gated boolean: `true` on first evaluation at a call site, then
/// `false` until `period` has elapsed since the last `true`.
///
/// The cooldown state vetoes its own sweep while unexpired, so skipping the
/// call site for a few frames does not reset the gate; once the period has
/// passed without reuse the slot is reclaimed.
///
/// # Panics
///
/// Panics when called outside an active execution context.
#[track_caller]
pub fn use_throttle(period: Duration) -> bool {
    throttle(period, None)
}

/// [`use_throttle`] with an explicit discriminator, for throttles inside
/// loops or branches.
///
/// # Panics
///
/// Panics when called outside an active execution context.
#[track_caller]
pub fn use_throttle_keyed(period: Duration, key: impl Into<Discriminator>) -> bool {
    throttle(period, Some(key.into()))
}

#[track_caller]
fn throttle(period: Duration, key: Option<Discriminator>) -> bool {
    let now = context::frame_now();
    let handle = use_hook_state_with::<ThrottleState, _>(key, |state, sweep_now| {
        state.expiry.is_some_and(|expiry| sweep_now < expiry)
    });

    handle.with_mut(|state| {
        let fire = state
            .last_fire
            .map_or(true, |last| now.duration_since(last) >= period);
        if fire {
            state.last_fire = Some(now);
            state.expiry = Some(now + period);
        }
        fire
    })
}

/// The current frame's delta time.
///
/// # Panics
///
/// Panics when the innermost context carries no frame timing (or no context
/// is active), i.e. when called from anywhere but a scheduler-driven tick.
pub fn use_delta_time() -> Duration {
    match context::current_frame_state() {
        Some(frame) => frame.delta,
        None => panic!(
            "use_delta_time called outside a frame context. \
             Delta time is only available inside a scheduler-driven tick."
        ),
    }
}

/// Token of the system whose context is innermost, if any
pub fn current_system() -> Option<SystemToken> {
    context::current_system_token()
}
