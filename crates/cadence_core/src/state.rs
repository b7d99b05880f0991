//! Call-site-keyed hook state
//!
//! `use_hook_state` gives any code running inside an execution context a
//! storage slot that persists across frames. The slot is identified by the
//! caller's source location plus the stored type (captured via
//! `#[track_caller]`, so no registration or explicit key is needed), and is
//! reclaimed automatically once the call site stops being reached.
//!
//! Within one call site, slots are keyed either by an auto-incrementing
//! per-entry counter or by an explicit [`Discriminator`].
//!
//! # Caveat: auto keys in loops
//!
//! Auto keys restart from 0 on every context entry, so a *stable* sequence of
//! undiscriminated calls re-finds its slots each frame. Calling
//! `use_hook_state` from inside a variable-length loop or a branch shifts the
//! sequence and therefore the identities; pass a discriminator (e.g. an item
//! id) whenever per-item persistence matters.

use crate::context::{self, CallSiteKey, Slot};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;
use std::time::Instant;

/// Caller-supplied slot key, refined beyond the call site.
///
/// Stored in canonical string form: the integer `1` and the string `"1"`
/// address the same slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Discriminator(String);

impl Discriminator {
    /// The canonical string form of this discriminator
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Discriminator {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Discriminator {
    fn from(value: String) -> Self {
        Self(value)
    }
}

macro_rules! discriminator_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Discriminator {
            fn from(value: $ty) -> Self {
                Self(value.to_string())
            }
        })*
    };
}

discriminator_from_int!(u32, u64, usize, i32, i64, isize);

/// Handle to one hook-state slot.
///
/// Wraps the slot's shared `Rc<RefCell<T>>`: mutations made through any
/// handle are visible to every later access of the same slot, across frames,
/// until the slot is swept.
pub struct StateHandle<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> StateHandle<T> {
    /// Get a clone of the current value
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.borrow().clone()
    }

    /// Replace the current value
    pub fn set(&self, value: T) {
        *self.inner.borrow_mut() = value;
    }

    /// Read the value through a closure
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow())
    }

    /// Mutate the value through a closure
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    /// Update the value using a function of the previous value
    pub fn update(&self, f: impl FnOnce(T) -> T)
    where
        T: Clone,
    {
        let next = f(self.inner.borrow().clone());
        *self.inner.borrow_mut() = next;
    }

    /// Check whether two handles refer to the same slot allocation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Escape hatch to the underlying shared allocation
    pub fn handle(&self) -> Rc<RefCell<T>> {
        Rc::clone(&self.inner)
    }
}

/// Access this call site's auto-keyed hook state.
///
/// The slot is created with `T::default()` on first access and persists
/// across frames for as long as the call site keeps being reached.
///
/// # Panics
///
/// Panics when called outside an active execution context.
#[track_caller]
pub fn use_hook_state<T: Default + 'static>() -> StateHandle<T> {
    access(Location::caller(), None, None)
}

/// Access this call site's hook state under an explicit discriminator.
///
/// Unlike auto keying, a discriminated slot keeps a stable identity across
/// frames regardless of call order within the entry.
///
/// # Panics
///
/// Panics when called outside an active execution context.
#[track_caller]
pub fn use_hook_state_keyed<T: Default + 'static>(key: impl Into<Discriminator>) -> StateHandle<T> {
    access(Location::caller(), Some(key.into()), None)
}

/// Full-form hook-state access with an optional discriminator and a cleanup
/// callback.
///
/// The cleanup runs when an exit sweep finds the slot unaccessed; it receives
/// the value and the sweep time and returns `true` to veto reclamation. It is
/// fixed when the slot is created — later accesses passing a different
/// callback do not replace it.
///
/// # Panics
///
/// Panics when called outside an active execution context.
#[track_caller]
pub fn use_hook_state_with<T, F>(key: Option<Discriminator>, cleanup: F) -> StateHandle<T>
where
    T: Default + 'static,
    F: Fn(&T, Instant) -> bool + 'static,
{
    access(Location::caller(), key, Some(Box::new(cleanup)))
}

type Cleanup<T> = Box<dyn Fn(&T, Instant) -> bool>;

fn access<T: Default + 'static>(
    site: &'static Location<'static>,
    key: Option<Discriminator>,
    cleanup: Option<Cleanup<T>>,
) -> StateHandle<T> {
    let site_key = CallSiteKey::new::<T>(site);
    let Some((storage, slot_key)) = context::mark_access(site_key, key) else {
        panic!(
            "hook state accessed outside an execution context (at {site}). \
             Hooks may only run inside `enter()`, e.g. from a scheduled system."
        );
    };

    let value = storage.with_slots(|slots| {
        let site_slots = slots.entry(site_key).or_default();
        let slot = site_slots.entry(slot_key).or_insert_with(|| {
            let value: Rc<RefCell<T>> = Rc::new(RefCell::new(T::default()));
            let cleanup = cleanup.map(|callback| {
                let value = Rc::clone(&value);
                Box::new(move |now: Instant| callback(&value.borrow(), now))
                    as Box<dyn Fn(Instant) -> bool>
            });
            Slot {
                value: value as Rc<dyn Any>,
                cleanup,
            }
        });
        Rc::clone(&slot.value)
    });

    // The stored type is part of the call-site key, so the downcast cannot
    // fail for a slot found under this key.
    let inner = value
        .downcast::<RefCell<T>>()
        .unwrap_or_else(|_| panic!("hook slot type mismatch at {site}"));
    StateHandle { inner }
}
