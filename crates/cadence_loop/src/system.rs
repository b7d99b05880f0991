//! System definitions
//!
//! A system is one named unit of per-tick work: a closure over the loop's
//! shared arguments, re-invoked every tick while scheduled. Ordering hints
//! (`.after`) are advisory metadata for external tooling; the scheduler
//! itself always runs systems in insertion order.

use cadence_core::SystemToken;
use slotmap::new_key_type;
use smallvec::SmallVec;

new_key_type! {
    /// Handle to a scheduled system
    pub struct SystemId;
}

impl SystemId {
    /// Convert to a raw u64 for crossing the cadence_core boundary
    pub fn to_raw(self) -> u64 {
        self.0.as_ffi()
    }

    /// Reconstruct from a raw u64 produced by `to_raw()`
    pub fn from_raw(raw: u64) -> Self {
        SystemId::from(slotmap::KeyData::from_ffi(raw))
    }

    /// The token carried by this system's execution contexts
    pub fn token(self) -> SystemToken {
        SystemToken::from_raw(self.to_raw())
    }
}

pub(crate) type SystemBody<A> = Box<dyn FnMut(&mut A)>;
pub(crate) type AfterHints = SmallVec<[SystemId; 4]>;

/// A system definition, built once and handed to [`crate::Loop::schedule`].
///
/// # Example
///
/// ```ignore
/// let id = lp.schedule(
///     System::new("physics", |world: &mut World| world.step())
///         .after(input_id),
/// );
/// ```
pub struct System<A> {
    name: String,
    body: SystemBody<A>,
    after: AfterHints,
}

impl<A> System<A> {
    /// Create a named system from its per-tick body
    pub fn new(name: impl Into<String>, body: impl FnMut(&mut A) + 'static) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
            after: SmallVec::new(),
        }
    }

    /// Declare that this system should run after another.
    ///
    /// Advisory only: recorded and exposed via `after_hints`, preserved by
    /// `replace`, but never used to reorder execution.
    pub fn after(mut self, id: SystemId) -> Self {
        self.after.push(id);
        self
    }

    /// The system's display name (used in error reports)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared ordering hints
    pub fn after_hints(&self) -> &[SystemId] {
        &self.after
    }

    pub(crate) fn into_parts(self) -> (String, SystemBody<A>, AfterHints) {
        (self.name, self.body, self.after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_builder() {
        let dep = SystemId::from_raw(SystemId::default().to_raw());
        let system: System<()> = System::new("mover", |_| {}).after(dep);

        assert_eq!(system.name(), "mover");
        assert_eq!(system.after_hints(), &[dep]);
    }

    #[test]
    fn test_token_round_trip() {
        let id = SystemId::default();
        assert_eq!(SystemId::from_raw(id.token().to_raw()), id);
    }
}
