//! The hook gate read by the guard inserted into `SimCellOccupier.OnSpawn`.
//!
//! The gate is confined to the current thread: the replay that opens it and
//! the patched method that reads it always run on the same call stack, and a
//! call on another thread sees it closed.

use std::cell::Cell;

thread_local! {
    static ON_SPAWN_GATE: Cell<bool> = const { Cell::new(false) };
}

pub struct HookGate;

impl HookGate {
    pub fn set_active() {
        ON_SPAWN_GATE.with(|g| g.set(true));
    }

    pub fn clear_active() {
        ON_SPAWN_GATE.with(|g| g.set(false));
    }

    pub fn is_active() -> bool {
        ON_SPAWN_GATE.with(Cell::get)
    }

    /// Open the gate until the returned guard is dropped.
    pub fn open() -> GateGuard {
        Self::set_active();
        GateGuard { _private: () }
    }
}

/// Clears the gate on drop, so an early return or panic inside the replayed
/// call cannot leave it open.
#[must_use = "the gate closes as soon as the guard is dropped"]
pub struct GateGuard {
    _private: (),
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        HookGate::clear_active();
    }
}

/// The predicate the guard block calls.
pub fn on_spawn_hook() -> bool {
    HookGate::is_active()
}
