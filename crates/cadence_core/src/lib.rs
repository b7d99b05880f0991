//! Cadence Core Runtime
//!
//! Foundational primitives for the cadence frame runtime:
//!
//! - **Execution Contexts**: a thread-local stack of entries, one per system
//!   per tick, with a generational sweep of untouched state on exit
//! - **Hook State**: call-site-keyed storage that persists across frames with
//!   no registration step (`use_hook_state` and friends)
//! - **Events**: `Signal` multicast with RAII `Connection` teardown, plus the
//!   `EventSource` capability for foreign producers
//! - **Built-in Hooks**: `use_event`, `use_throttle`, `use_delta_time`
//!
//! The frame scheduler that drives contexts lives in `cadence_loop`; this
//! crate is usable on its own wherever per-entry persistent state is needed.
//!
//! # Example
//!
//! ```rust
//! use cadence_core::{enter, use_hook_state, ContextNode, StorageRoot};
//!
//! let storage = StorageRoot::new();
//!
//! // The same call site finds the same slot on every entry.
//! for _ in 0..3 {
//!     enter(ContextNode::new(storage.clone()), || {
//!         let ticks = use_hook_state::<u32>();
//!         ticks.update(|t| t + 1);
//!     });
//! }
//! assert_eq!(storage.slot_count(), 1);
//! ```

pub mod context;
pub mod event;
pub mod hooks;
pub mod queue;
pub mod state;

pub use context::{enter, ContextNode, FrameState, StorageRoot, SystemToken};
pub use event::{Connection, EventSource, Signal, SourceId, SubscribeFn};
pub use hooks::{
    current_system, use_delta_time, use_event, use_throttle, use_throttle_keyed, EventIter,
};
pub use queue::Queue;
pub use state::{
    use_hook_state, use_hook_state_keyed, use_hook_state_with, Discriminator, StateHandle,
};
