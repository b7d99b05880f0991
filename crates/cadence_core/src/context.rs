//! Execution contexts and call-site-keyed storage
//!
//! An execution context is entered once per system per tick. While it is
//! active, hook-state accesses record which storage slots they touched; when
//! the context exits, every slot that was *not* touched is reclaimed, subject
//! to a per-slot cleanup veto. This is the generational garbage-collection
//! half of the hook-state scheme; the access half lives in [`crate::state`].
//!
//! Contexts live on a thread-local stack and may nest. A hook invoked while
//! another context is active always operates against the innermost entry, so
//! hooks composed of other hooks work without extra plumbing.
//!
//! # Example
//!
//! ```
//! use cadence_core::{enter, use_hook_state, ContextNode, StorageRoot};
//!
//! let storage = StorageRoot::new();
//! for _ in 0..3 {
//!     enter(ContextNode::new(storage.clone()), || {
//!         let count = use_hook_state::<u32>();
//!         count.update(|c| c + 1);
//!     });
//! }
//! // The same call site re-finds the same slot every entry.
//! assert_eq!(storage.slot_count(), 1);
//! ```

use crate::state::Discriminator;
use rustc_hash::{FxHashMap, FxHashSet};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::panic::Location;
use std::rc::Rc;
use std::time::{Duration, Instant};

thread_local! {
    /// Stack of active execution contexts for this thread
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Opaque identity of the system whose context is currently entered.
///
/// Bridges the scheduler's slotmap key into the core crate without a
/// dependency edge; reconstruct the key with `from_raw` on the other side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SystemToken(u64);

impl SystemToken {
    /// Wrap a raw id produced by the scheduler
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id for lookup on the scheduler side
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

/// Per-tick timing carried by a scheduler-driven context
#[derive(Clone, Copy, Debug)]
pub struct FrameState {
    /// Time elapsed since the previous tick
    pub delta: Duration,
    /// The clock reading this tick was driven at
    pub now: Instant,
}

impl FrameState {
    /// Create frame timing for one tick
    pub fn new(delta: Duration, now: Instant) -> Self {
        Self { delta, now }
    }
}

/// Identity of one hook-state call site: source location plus stored type.
///
/// Captured via `#[track_caller]`, so the same source line re-derives the
/// same key every frame with no registration step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CallSiteKey {
    file: &'static str,
    line: u32,
    column: u32,
    type_id: TypeId,
}

impl CallSiteKey {
    pub(crate) fn new<T: 'static>(site: &'static Location<'static>) -> Self {
        Self {
            file: site.file(),
            line: site.line(),
            column: site.column(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Key of one slot within a call site
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SlotKey {
    /// The n-th undiscriminated access during the current entry
    Auto(u32),
    /// Caller-supplied discriminator, stable across entries
    Keyed(Discriminator),
}

/// One persistent storage slot: a type-erased `Rc<RefCell<T>>` plus an
/// optional cleanup fixed at creation time.
pub(crate) struct Slot {
    pub(crate) value: Rc<dyn Any>,
    /// Returns `true` to veto reclamation; rechecked on every sweep.
    pub(crate) cleanup: Option<Box<dyn Fn(Instant) -> bool>>,
}

/// Shared handle to one system's private hook-state table.
///
/// Cloning shares the underlying table; the scheduler hands the same root to
/// every tick of a system so its slots persist across frames.
#[derive(Clone, Default)]
pub struct StorageRoot {
    slots: Rc<RefCell<FxHashMap<CallSiteKey, FxHashMap<SlotKey, Slot>>>>,
}

impl StorageRoot {
    /// Create an empty storage root
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of call sites currently holding slots
    pub fn site_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Total number of live slots across all call sites
    pub fn slot_count(&self) -> usize {
        self.slots.borrow().values().map(|site| site.len()).sum()
    }

    /// Check whether the root holds no slots
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    pub(crate) fn with_slots<R>(
        &self,
        f: impl FnOnce(&mut FxHashMap<CallSiteKey, FxHashMap<SlotKey, Slot>>) -> R,
    ) -> R {
        f(&mut self.slots.borrow_mut())
    }
}

/// What one context entry runs against: a storage root, optional frame
/// timing, and the identity of the running system (if any).
#[derive(Clone)]
pub struct ContextNode {
    storage: StorageRoot,
    frame: Option<FrameState>,
    system: Option<SystemToken>,
}

impl ContextNode {
    /// A bare node with storage only (no frame timing, no system identity)
    pub fn new(storage: StorageRoot) -> Self {
        Self {
            storage,
            frame: None,
            system: None,
        }
    }

    /// A node carrying per-tick timing
    pub fn with_frame(storage: StorageRoot, frame: FrameState) -> Self {
        Self {
            storage,
            frame: Some(frame),
            system: None,
        }
    }

    /// Attach the identity of the system this context belongs to
    pub fn with_system(mut self, system: SystemToken) -> Self {
        self.system = Some(system);
        self
    }
}

/// One entry on the context stack
struct Frame {
    node: ContextNode,
    /// Slots touched during this entry; everything else is swept on exit
    accessed: FxHashMap<CallSiteKey, FxHashSet<SlotKey>>,
    /// Per-site auto-key counters, restarting at 0 each entry
    auto: FxHashMap<CallSiteKey, u32>,
}

impl Frame {
    fn new(node: ContextNode) -> Self {
        Self {
            node,
            accessed: FxHashMap::default(),
            auto: FxHashMap::default(),
        }
    }
}

/// Run `body` inside an execution context over `node`.
///
/// The context is pushed before `body` runs and popped afterwards; the exit
/// sweep runs unconditionally, including when `body` panics and the panic
/// propagates. Entries nest: an inner `enter` never marks slots of the outer
/// entry as accessed.
pub fn enter<R>(node: ContextNode, body: impl FnOnce() -> R) -> R {
    STACK.with(|stack| stack.borrow_mut().push(Frame::new(node)));
    let _guard = ExitGuard;
    body()
}

/// Pops the frame and sweeps its storage on drop, so the sweep also runs
/// while unwinding out of a panicking body.
struct ExitGuard;

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let frame = STACK.with(|stack| stack.borrow_mut().pop());
        if let Some(frame) = frame {
            sweep(frame);
        }
    }
}

/// Reclaim every slot the just-exited entry did not touch.
///
/// Each slot is visited exactly once. Unaccessed slots with no cleanup are
/// dropped; unaccessed slots with a cleanup are dropped unless the cleanup
/// returns `true`, in which case they survive and are rechecked on the next
/// exit. Cleanups run after the frame is popped, outside any context, and
/// without the storage table borrowed (a slot's `Drop` may reach back into
/// other shared structures, e.g. to tear down an event subscription).
fn sweep(frame: Frame) {
    let now = frame
        .node
        .frame
        .map(|f| f.now)
        .unwrap_or_else(Instant::now);
    let accessed = frame.accessed;
    let storage = frame.node.storage;

    let mut doomed: Vec<Slot> = Vec::new();
    let mut pending: Vec<(CallSiteKey, SlotKey, Slot)> = Vec::new();

    storage.with_slots(|slots| {
        for (site, site_slots) in slots.iter_mut() {
            let touched = accessed.get(site);
            let stale: Vec<SlotKey> = site_slots
                .keys()
                .filter(|key| !touched.is_some_and(|set| set.contains(*key)))
                .cloned()
                .collect();
            for key in stale {
                if let Some(slot) = site_slots.remove(&key) {
                    if slot.cleanup.is_some() {
                        pending.push((*site, key, slot));
                    } else {
                        doomed.push(slot);
                    }
                }
            }
        }
    });

    let removed = doomed.len();
    drop(doomed);

    // Evaluate cleanup vetoes, then reinstate survivors.
    let mut kept: Vec<(CallSiteKey, SlotKey, Slot)> = Vec::new();
    let mut reclaimed = 0usize;
    for (site, key, slot) in pending {
        let veto = match &slot.cleanup {
            Some(cleanup) => cleanup(now),
            None => false,
        };
        if veto {
            kept.push((site, key, slot));
        } else {
            reclaimed += 1;
        }
    }

    storage.with_slots(|slots| {
        for (site, key, slot) in kept {
            slots.entry(site).or_default().insert(key, slot);
        }
        slots.retain(|_, site_slots| !site_slots.is_empty());
    });

    if removed + reclaimed > 0 {
        tracing::trace!(removed = removed + reclaimed, "swept stale hook slots");
    }
}

/// Record an access in the innermost frame and resolve the slot key.
///
/// Returns `None` when no context is active (a caller error the hook layer
/// turns into a panic with an actionable message).
pub(crate) fn mark_access(
    site: CallSiteKey,
    key: Option<Discriminator>,
) -> Option<(StorageRoot, SlotKey)> {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let frame = stack.last_mut()?;
        let slot_key = match key {
            Some(disc) => SlotKey::Keyed(disc),
            None => {
                let counter = frame.auto.entry(site).or_insert(0);
                let slot_key = SlotKey::Auto(*counter);
                *counter += 1;
                slot_key
            }
        };
        frame
            .accessed
            .entry(site)
            .or_default()
            .insert(slot_key.clone());
        Some((frame.node.storage.clone(), slot_key))
    })
}

/// Frame timing of the innermost context, if it carries any
pub(crate) fn current_frame_state() -> Option<FrameState> {
    STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.node.frame))
}

/// System token of the innermost context, if it carries one
pub(crate) fn current_system_token() -> Option<SystemToken> {
    STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.node.system))
}

/// The innermost frame's clock reading, falling back to `Instant::now()`
/// for frame-less contexts
pub(crate) fn frame_now() -> Instant {
    current_frame_state()
        .map(|frame| frame.now)
        .unwrap_or_else(Instant::now)
}
