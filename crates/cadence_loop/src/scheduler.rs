//! Frame scheduler
//!
//! [`Loop`] owns the ordered list of systems and drives one execution
//! context per system per tick. Each tick it computes delta time from its
//! injected clock, runs every non-skipped system in insertion order under
//! `catch_unwind` (a panicking system never prevents its storage sweep, the
//! remaining systems, or future ticks), and reports failures through a
//! deduplicated error sink.
//!
//! Systems can be hot-swapped with [`Loop::replace`]: the entry keeps its
//! id, run-order position, skip flag, and — critically — its hook-state
//! storage root, so state survives the swap.
//!
//! The loop does not tick itself; [`Loop::begin`] attaches a step closure to
//! an external trigger (any `EventSource<()>`, e.g. a vsync signal) and
//! returns the RAII connection detaching it.

use crate::diagnostics::{ErrorDedup, ErrorLog, ErrorRecord, SampleRing};
use crate::error::{LoopError, Result};
use crate::system::{AfterHints, System, SystemBody, SystemId};
use crate::time::{Clock, MonotonicClock};
use cadence_core::{enter, Connection, ContextNode, EventSource, FrameState, StorageRoot};
use slotmap::SlotMap;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Pluggable destination for failure reports
pub type ErrorSink = Rc<dyn Fn(&str)>;

struct SystemEntry<A> {
    name: String,
    /// Taken out while the body runs, so admin calls made from inside the
    /// body (including self-evict and self-replace) see a consistent entry
    body: Option<SystemBody<A>>,
    after: AfterHints,
    storage: StorageRoot,
    skipped: bool,
    errors: ErrorLog,
    samples: SampleRing,
}

struct LoopShared<A> {
    entries: RefCell<SlotMap<SystemId, SystemEntry<A>>>,
    /// Run order: insertion order, mutated only by schedule/evict
    order: RefCell<Vec<SystemId>>,
    /// Shared arguments forwarded to every system each tick. Borrowed
    /// mutably for the whole tick, so re-firing the loop's own trigger from
    /// inside a system fails fast instead of recursing.
    args: RefCell<A>,
    clock: Box<dyn Clock>,
    last_tick: Cell<Instant>,
    track_errors: Cell<bool>,
    profiling: Cell<bool>,
    dedup: RefCell<ErrorDedup>,
    sink: RefCell<Option<ErrorSink>>,
}

/// The frame scheduler.
///
/// Cheaply clonable shared handle; all methods take `&self`. Single-threaded
/// by design: systems run sequentially within one tick and hold the only
/// access to their storage root while running.
pub struct Loop<A> {
    shared: Rc<LoopShared<A>>,
}

impl<A> Clone for Loop<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<A: 'static> Loop<A> {
    /// Create a scheduler over the given shared arguments, driven by the
    /// real monotonic clock
    pub fn new(args: A) -> Self {
        Self::with_clock(args, MonotonicClock)
    }

    /// Create a scheduler with an injected time source
    pub fn with_clock(args: A, clock: impl Clock + 'static) -> Self {
        let now = clock.now();
        Self {
            shared: Rc::new(LoopShared {
                entries: RefCell::new(SlotMap::with_key()),
                order: RefCell::new(Vec::new()),
                args: RefCell::new(args),
                clock: Box::new(clock),
                last_tick: Cell::new(now),
                track_errors: Cell::new(false),
                profiling: Cell::new(false),
                dedup: RefCell::new(ErrorDedup::default()),
                sink: RefCell::new(None),
            }),
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Append a system to the run order, allocating its private storage root.
    ///
    /// Every call creates an independent entry; scheduling two systems with
    /// the same body is permitted and they do not share state.
    pub fn schedule(&self, system: System<A>) -> SystemId {
        let (name, body, after) = system.into_parts();
        tracing::debug!(system = %name, "scheduling system");
        let id = self.shared.entries.borrow_mut().insert(SystemEntry {
            name,
            body: Some(body),
            after,
            storage: StorageRoot::new(),
            skipped: false,
            errors: ErrorLog::default(),
            samples: SampleRing::default(),
        });
        self.shared.order.borrow_mut().push(id);
        id
    }

    /// Schedule several systems, preserving iteration order
    pub fn schedule_systems(&self, systems: impl IntoIterator<Item = System<A>>) -> Vec<SystemId> {
        systems.into_iter().map(|s| self.schedule(s)).collect()
    }

    /// Remove a system and finalize its storage.
    ///
    /// Finalization enters a context over the root with an empty body, so
    /// every slot is unaccessed: cleanups run with their veto, and vetoing
    /// slots die with the root when it is dropped afterwards.
    pub fn evict(&self, id: SystemId) -> Result<()> {
        let entry = self
            .shared
            .entries
            .borrow_mut()
            .remove(id)
            .ok_or(LoopError::UnknownSystem(id))?;
        self.shared.order.borrow_mut().retain(|other| *other != id);
        tracing::debug!(system = %entry.name, "evicting system");

        let node = ContextNode::with_frame(
            entry.storage.clone(),
            FrameState::new(Duration::ZERO, self.shared.clock.now()),
        );
        enter(node, || {});
        Ok(())
    }

    /// Hot-swap a system definition in place.
    ///
    /// Name, body, and ordering hints are replaced; the entry keeps its id,
    /// its run-order position, its skip flag, and its storage root, so all
    /// hook state created by the old body is readable by the new one.
    pub fn replace(&self, id: SystemId, system: System<A>) -> Result<()> {
        let (name, body, after) = system.into_parts();
        let mut entries = self.shared.entries.borrow_mut();
        let entry = entries.get_mut(id).ok_or(LoopError::UnknownSystem(id))?;
        tracing::debug!(old = %entry.name, new = %name, "replacing system");
        entry.name = name;
        entry.body = Some(body);
        entry.after = after;
        Ok(())
    }

    /// Administratively pause or resume a system.
    ///
    /// A skipped system is not invoked and its context is not entered (so
    /// its storage is not swept while skipped); entering skip clears its
    /// profiling samples.
    pub fn set_skipped(&self, id: SystemId, skipped: bool) -> Result<()> {
        let mut entries = self.shared.entries.borrow_mut();
        let entry = entries.get_mut(id).ok_or(LoopError::UnknownSystem(id))?;
        entry.skipped = skipped;
        if skipped {
            entry.samples.clear();
        }
        Ok(())
    }

    /// Check a system's skip flag
    pub fn is_skipped(&self, id: SystemId) -> Result<bool> {
        self.with_entry(id, |entry| entry.skipped)
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Attach the loop to an external trigger.
    ///
    /// Records the tick baseline, then subscribes a step closure; every
    /// trigger firing runs one tick. Dropping the returned connection
    /// detaches the loop.
    pub fn begin(&self, trigger: &impl EventSource<()>) -> Connection {
        self.shared.last_tick.set(self.shared.clock.now());
        tracing::debug!("attaching loop to trigger");
        let driver = self.clone();
        trigger.attach(Box::new(move |()| driver.step()))
    }

    fn step(&self) {
        let now = self.shared.clock.now();
        let delta = now - self.shared.last_tick.get();
        self.shared.last_tick.set(now);

        // Snapshot so systems scheduled mid-tick run next tick and evicted
        // ones are skipped by the entry lookup below.
        let order: Vec<SystemId> = self.shared.order.borrow().clone();
        let mut args = self.shared.args.borrow_mut();

        for id in order {
            let (mut body, storage) = {
                let mut entries = self.shared.entries.borrow_mut();
                let Some(entry) = entries.get_mut(id) else {
                    continue; // evicted mid-tick
                };
                if entry.skipped {
                    entry.samples.clear();
                    continue;
                }
                let Some(body) = entry.body.take() else {
                    continue;
                };
                (body, entry.storage.clone())
            };

            let node = ContextNode::with_frame(storage, FrameState::new(delta, now))
                .with_system(id.token());
            let started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| enter(node, || body(&mut *args))));
            let elapsed = started.elapsed();

            {
                let mut entries = self.shared.entries.borrow_mut();
                if let Some(entry) = entries.get_mut(id) {
                    // A mid-run replace already installed the new body.
                    if entry.body.is_none() {
                        entry.body = Some(body);
                    }
                    if self.shared.profiling.get() && !entry.skipped {
                        entry.samples.push(elapsed);
                    }
                }
            }

            if let Err(payload) = result {
                self.report_failure(id, panic_message(payload), now);
            }
        }
    }

    fn report_failure(&self, id: SystemId, message: String, now: Instant) {
        let report = {
            let mut entries = self.shared.entries.borrow_mut();
            match entries.get_mut(id) {
                Some(entry) => {
                    let report = format!("{}: {}", entry.name, message);
                    if self.shared.track_errors.get() {
                        entry.errors.push(&report, now);
                    }
                    report
                }
                // Self-evicted before the panic surfaced.
                None => format!("<evicted system>: {message}"),
            }
        };

        if self.shared.dedup.borrow_mut().note(&report, now) {
            let sink = self.shared.sink.borrow().clone();
            match sink {
                Some(sink) => sink(&report),
                None => tracing::error!("{report}"),
            }
            tracing::warn!("identical system errors suppressed for the next 10s");
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Enable or disable per-system error history accumulation
    pub fn set_track_errors(&self, enabled: bool) {
        self.shared.track_errors.set(enabled);
    }

    /// Enable or disable per-system wall-time profiling (off by default)
    pub fn set_profiling(&self, enabled: bool) {
        self.shared.profiling.set(enabled);
    }

    /// Route failure reports somewhere other than `tracing::error!`
    pub fn set_error_sink(&self, sink: impl Fn(&str) + 'static) {
        *self.shared.sink.borrow_mut() = Some(Rc::new(sink));
    }

    // =========================================================================
    // Admin reads
    // =========================================================================

    /// Currently scheduled systems in run order
    pub fn scheduled(&self) -> Vec<SystemId> {
        self.shared.order.borrow().clone()
    }

    /// Number of scheduled systems
    pub fn system_count(&self) -> usize {
        self.shared.order.borrow().len()
    }

    /// Check whether a system is currently scheduled
    pub fn contains(&self, id: SystemId) -> bool {
        self.shared.entries.borrow().contains_key(id)
    }

    /// A scheduled system's display name
    pub fn system_name(&self, id: SystemId) -> Result<String> {
        self.with_entry(id, |entry| entry.name.clone())
    }

    /// A scheduled system's declared ordering hints
    pub fn after_hints(&self, id: SystemId) -> Result<Vec<SystemId>> {
        self.with_entry(id, |entry| entry.after.to_vec())
    }

    /// A system's accumulated error history (empty unless tracking is on)
    pub fn error_history(&self, id: SystemId) -> Result<Vec<ErrorRecord>> {
        self.with_entry(id, |entry| entry.errors.records())
    }

    /// A system's most recent profiling samples, oldest first
    pub fn profile_samples(&self, id: SystemId) -> Result<Vec<Duration>> {
        self.with_entry(id, |entry| entry.samples.samples())
    }

    fn with_entry<R>(&self, id: SystemId, f: impl FnOnce(&SystemEntry<A>) -> R) -> Result<R> {
        let entries = self.shared.entries.borrow();
        entries
            .get(id)
            .map(f)
            .ok_or(LoopError::UnknownSystem(id))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use cadence_core::{
        use_delta_time, use_hook_state, use_hook_state_with, Signal, StateHandle,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn rig() -> (Loop<Log>, Signal<()>, ManualClock, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let clock = ManualClock::new();
        let lp = Loop::with_clock(log.clone(), clock.clone());
        let trigger = Signal::new();
        (lp, trigger, clock, log)
    }

    fn named(name: &'static str) -> System<Log> {
        System::new(name, move |log: &mut Log| {
            log.borrow_mut().push(name.to_string())
        })
    }

    #[test]
    fn test_systems_run_in_scheduling_order() {
        let (lp, trigger, _clock, log) = rig();
        let a = lp.schedule(named("a"));
        let b = lp.schedule(named("b"));
        let c = lp.schedule(named("c"));
        assert_eq!(lp.scheduled(), vec![a, b, c]);

        let _conn = lp.begin(&trigger);
        trigger.fire(());
        assert_eq!(&*log.borrow(), &["a", "b", "c"]);

        lp.evict(b).unwrap();
        log.borrow_mut().clear();
        trigger.fire(());
        assert_eq!(&*log.borrow(), &["a", "c"]);
        assert_eq!(lp.scheduled(), vec![a, c]);
    }

    #[test]
    fn test_evict_unknown_system_fails() {
        let (lp, _trigger, _clock, _log) = rig();
        let id = lp.schedule(named("a"));
        lp.evict(id).unwrap();

        assert!(matches!(lp.evict(id), Err(LoopError::UnknownSystem(_))));
        assert!(matches!(
            lp.replace(id, named("b")),
            Err(LoopError::UnknownSystem(_))
        ));
        assert!(!lp.contains(id));
    }

    #[test]
    fn test_skip_pauses_without_sweeping_state() {
        let (lp, trigger, _clock, log) = rig();

        fn tick_count() -> StateHandle<u32> {
            use_hook_state()
        }

        let id = lp.schedule(System::new("counter", |log: &mut Log| {
            let count = tick_count();
            count.update(|c| c + 1);
            log.borrow_mut().push(format!("tick {}", count.get()));
        }));
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        lp.set_skipped(id, true).unwrap();
        assert!(lp.is_skipped(id).unwrap());
        trigger.fire(());
        trigger.fire(());
        lp.set_skipped(id, false).unwrap();
        trigger.fire(());

        // Skipped ticks neither ran the body nor swept the counter slot.
        assert_eq!(&*log.borrow(), &["tick 1", "tick 2"]);
    }

    #[test]
    fn test_replace_preserves_storage_and_position() {
        let (lp, trigger, _clock, log) = rig();

        fn tick_count() -> StateHandle<u32> {
            use_hook_state()
        }

        let first = lp.schedule(named("first"));
        let target = lp.schedule(System::new("old", |_log: &mut Log| {
            tick_count().update(|c| c + 1);
        }));
        let last = lp.schedule(named("last"));
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        trigger.fire(());

        lp.replace(
            target,
            System::new("new", |log: &mut Log| {
                log.borrow_mut().push(format!("carried {}", tick_count().get()));
            }),
        )
        .unwrap();
        assert_eq!(lp.system_name(target).unwrap(), "new");
        assert_eq!(lp.scheduled(), vec![first, target, last]);

        log.borrow_mut().clear();
        trigger.fire(());
        // The new body reads the slots the old body wrote, at its position.
        assert_eq!(&*log.borrow(), &["first", "carried 2", "last"]);
    }

    #[test]
    fn test_evict_finalizes_storage() {
        let (lp, trigger, _clock, _log) = rig();
        let cleaned = Rc::new(std::cell::Cell::new(false));

        let flag = cleaned.clone();
        let id = lp.schedule(System::new("holder", move |_log: &mut Log| {
            let flag = flag.clone();
            let _slot: StateHandle<u32> =
                use_hook_state_with(None, move |_, _| {
                    flag.set(true);
                    false
                });
        }));
        let _conn = lp.begin(&trigger);
        trigger.fire(());
        assert!(!cleaned.get());

        lp.evict(id).unwrap();
        assert!(cleaned.get());
    }

    #[test]
    fn test_delta_time_from_injected_clock() {
        let (lp, trigger, clock, log) = rig();
        lp.schedule(System::new("dt", |log: &mut Log| {
            log.borrow_mut().push(format!("{:?}", use_delta_time()));
        }));
        let _conn = lp.begin(&trigger);

        clock.advance(Duration::from_millis(16));
        trigger.fire(());
        clock.advance(Duration::from_millis(32));
        trigger.fire(());

        assert_eq!(&*log.borrow(), &["16ms", "32ms"]);
    }

    #[test]
    fn test_panic_is_isolated_per_system() {
        let (lp, trigger, _clock, log) = rig();
        lp.set_error_sink(|_| {});
        lp.schedule(System::new("faulty", |_log: &mut Log| {
            panic!("boom");
        }));
        lp.schedule(named("healthy"));
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        trigger.fire(());

        // The healthy system ran every tick despite the panics before it.
        assert_eq!(&*log.borrow(), &["healthy", "healthy"]);
    }

    #[test]
    fn test_error_dedup_window() {
        let (lp, trigger, clock, _log) = rig();
        let reports: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        lp.set_error_sink(move |report| sink.borrow_mut().push(report.to_string()));

        lp.schedule(System::new("faulty", |_log: &mut Log| {
            panic!("boom");
        }));
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        clock.advance(Duration::from_secs(1));
        trigger.fire(());
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(reports.borrow()[0], "faulty: boom");

        // Past the 10s window the same message reports again.
        clock.advance(Duration::from_secs(10));
        trigger.fire(());
        assert_eq!(reports.borrow().len(), 2);
    }

    #[test]
    fn test_error_history_tracking() {
        let (lp, trigger, clock, _log) = rig();
        lp.set_error_sink(|_| {});
        lp.set_track_errors(true);

        let id = lp.schedule(System::new("faulty", |_log: &mut Log| {
            panic!("boom");
        }));
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        clock.advance(Duration::from_secs(1));
        trigger.fire(());

        // Consecutive identical failures coalesce into one record.
        let history = lp.error_history(id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "faulty: boom");
    }

    #[test]
    fn test_profiling_ring_caps_and_clears_on_skip() {
        let (lp, trigger, _clock, _log) = rig();
        lp.set_profiling(true);
        let id = lp.schedule(named("worker"));
        let _conn = lp.begin(&trigger);

        for _ in 0..70 {
            trigger.fire(());
        }
        assert_eq!(lp.profile_samples(id).unwrap().len(), 60);

        lp.set_skipped(id, true).unwrap();
        assert!(lp.profile_samples(id).unwrap().is_empty());
    }

    #[test]
    fn test_profiling_off_by_default() {
        let (lp, trigger, _clock, _log) = rig();
        let id = lp.schedule(named("worker"));
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        assert!(lp.profile_samples(id).unwrap().is_empty());
    }

    #[test]
    fn test_admin_calls_from_inside_a_system() {
        let (lp, trigger, _clock, log) = rig();

        let admin = lp.clone();
        let own_id: Rc<RefCell<Option<SystemId>>> = Rc::new(RefCell::new(None));
        let own = own_id.clone();
        let id = lp.schedule(System::new("once", move |log: &mut Log| {
            log.borrow_mut().push("ran".to_string());
            let id = own.borrow().expect("id set before first tick");
            admin.evict(id).unwrap();
            admin.schedule(named("late"));
        }));
        *own_id.borrow_mut() = Some(id);
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        assert_eq!(&*log.borrow(), &["ran"]);
        assert!(!lp.contains(id));

        // The system scheduled mid-tick runs from the next tick on.
        log.borrow_mut().clear();
        trigger.fire(());
        assert_eq!(&*log.borrow(), &["late"]);
    }

    #[test]
    fn test_current_system_matches_id() {
        let (lp, trigger, _clock, _log) = rig();
        let seen: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let id = lp.schedule(System::new("who", move |_log: &mut Log| {
            *sink.borrow_mut() =
                cadence_core::current_system().map(|token| token.to_raw());
        }));
        let _conn = lp.begin(&trigger);
        trigger.fire(());

        assert_eq!(*seen.borrow(), Some(id.token().to_raw()));
    }

    #[test]
    fn test_dropping_connection_detaches_loop() {
        let (lp, trigger, _clock, log) = rig();
        lp.schedule(named("a"));

        let conn = lp.begin(&trigger);
        trigger.fire(());
        drop(conn);
        trigger.fire(());

        assert_eq!(&*log.borrow(), &["a"]);
    }

    #[test]
    fn test_independent_storage_per_entry() {
        let (lp, trigger, _clock, log) = rig();

        fn tick_count() -> StateHandle<u32> {
            use_hook_state()
        }

        fn counting(name: &'static str) -> System<Log> {
            System::new(name, move |log: &mut Log| {
                let count = tick_count();
                count.update(|c| c + 1);
                log.borrow_mut().push(format!("{name} {}", count.get()));
            })
        }

        // Same body shape, same hook call site, two entries: private roots.
        lp.schedule_systems([counting("left"), counting("right")]);
        let _conn = lp.begin(&trigger);

        trigger.fire(());
        trigger.fire(());
        assert_eq!(
            &*log.borrow(),
            &["left 1", "right 1", "left 2", "right 2"]
        );
    }
}
