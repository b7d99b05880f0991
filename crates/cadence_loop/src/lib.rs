//! Cadence Frame Scheduler
//!
//! Drives an ordered list of systems once per external tick:
//!
//! - **Systems**: named per-tick closures over shared loop arguments,
//!   registered with [`Loop::schedule`] and hot-swappable via
//!   [`Loop::replace`] without losing their hook state
//! - **Isolation**: a panicking system never aborts the tick, skips its
//!   storage sweep, or affects other systems
//! - **Diagnostics**: deduplicated failure reporting, optional bounded error
//!   history, optional profiling sample rings
//! - **Clocks**: delta time from an injectable [`Clock`], with
//!   [`ManualClock`] for deterministic tests
//!
//! The hook surface of `cadence_core` is re-exported, so downstream code
//! only imports this crate.
//!
//! # Example
//!
//! ```rust
//! use cadence_loop::{use_hook_state, Loop, Signal, System};
//!
//! let trigger = Signal::new();
//! let lp = Loop::new(Vec::<String>::new());
//!
//! let _id = lp.schedule(System::new("greeter", |log: &mut Vec<String>| {
//!     let ticks = use_hook_state::<u32>();
//!     ticks.update(|t| t + 1);
//!     log.push(format!("tick {}", ticks.get()));
//! }));
//!
//! let _conn = lp.begin(&trigger);
//! trigger.fire(());
//! trigger.fire(());
//! assert_eq!(lp.system_count(), 1);
//! ```

pub mod diagnostics;
pub mod error;
pub mod scheduler;
pub mod system;
pub mod time;

pub use diagnostics::ErrorRecord;
pub use error::{LoopError, Result};
pub use scheduler::{ErrorSink, Loop};
pub use system::{System, SystemId};
pub use time::{Clock, ManualClock, MonotonicClock};

// Re-export the cadence_core hook surface so downstream code imports one
// crate.
pub use cadence_core::{
    current_system, enter, use_delta_time, use_event, use_hook_state, use_hook_state_keyed,
    use_hook_state_with, use_throttle, use_throttle_keyed, Connection, ContextNode, Discriminator,
    EventIter, EventSource, FrameState, Signal, SourceId, StateHandle, StorageRoot, SubscribeFn,
    SystemToken,
};
