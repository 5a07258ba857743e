//! # Instrumentation Weaver
//!
//! Rebinds a code unit so every call checks a per-breakpoint enabled flag
//! and, only when it is set, runs the breakpoint's hooks around the original
//! body.
//!
//! ## Call Path
//!
//! ```text
//! fn checkout(..) ──▶ CodeUnit::invoke(body)
//!                        │
//!                        ├─ enabled.load(Relaxed) == false ──▶ body()      (hot path)
//!                        │
//!                        └─ true ──▶ clone hook (read lock)
//!                                     ├─ none woven ──▶ body()
//!                                     └─ on_enter → body() → on_exit (drop guard)
//! ```
//!
//! The disabled path takes no lock and never allocates. The enabled path
//! clones an `Arc`, so a call that started instrumented finishes with the
//! hook it observed even if the breakpoint is uninstalled meanwhile.
//!
//! ## Weaving
//!
//! - [`weave`] stores the hook in the unit's slot with the flag cleared.
//! - [`WrappedUnit::enable`] / [`WrappedUnit::disable`] only flip the flag.
//! - [`unweave`] clears the flag, then empties the slot under the write lock,
//!   so the unit is never observed half-patched.
//!
//! A unit carries at most one woven breakpoint at a time.

pub mod hook;
pub mod unit;

pub use hook::{CallContext, CallOutcome, UnitHook};
pub use unit::CodeUnit;

use log::debug;
use std::sync::Arc;

use crate::domain::BreakpointError;
use unit::Woven;

/// A code unit with a breakpoint hook woven onto it
///
/// Holding a `WrappedUnit` is the only way to toggle or restore the unit.
pub struct WrappedUnit {
    unit: &'static CodeUnit,
    hook: Arc<dyn UnitHook>,
}

impl WrappedUnit {
    /// The original unit, restored by [`unweave`]
    #[must_use]
    pub fn unit(&self) -> &'static CodeUnit {
        self.unit
    }

    pub fn enable(&self) {
        self.unit.set_enabled(true);
    }

    pub fn disable(&self) {
        self.unit.set_enabled(false);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.unit.breakpoint_enabled()
    }
}

impl std::fmt::Debug for WrappedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedUnit").field("unit", &self.unit).finish_non_exhaustive()
    }
}

/// Weave `hook` onto `unit` on behalf of breakpoint `owner`
///
/// The breakpoint starts disabled.
///
/// # Errors
/// Returns `UnitOccupied` if another breakpoint is already woven on the unit
pub fn weave(
    unit: &'static CodeUnit,
    hook: Arc<dyn UnitHook>,
    owner: &str,
) -> Result<WrappedUnit, BreakpointError> {
    unit.with_slot(|slot| {
        if let Some(existing) = slot.as_ref() {
            return Err(BreakpointError::UnitOccupied {
                unit: unit.qualified_name(),
                holder: existing.owner.clone(),
            });
        }
        unit.set_enabled(false);
        *slot = Some(Woven { owner: owner.to_string(), hook: Arc::clone(&hook) });
        Ok(())
    })?;

    debug!("Wove {owner} onto {}", unit.qualified_name());
    Ok(WrappedUnit { unit, hook })
}

/// Restore the original unit
pub fn unweave(wrapped: WrappedUnit) -> &'static CodeUnit {
    let WrappedUnit { unit, hook } = wrapped;
    unit.set_enabled(false);
    unit.with_slot(|slot| {
        if slot.as_ref().is_some_and(|woven| Arc::ptr_eq(&woven.hook, &hook)) {
            *slot = None;
        }
    });
    debug!("Restored {}", unit.qualified_name());
    unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingHook {
        enters: AtomicUsize,
        exits: AtomicUsize,
        unwinds: AtomicUsize,
    }

    impl UnitHook for CountingHook {
        fn on_enter(&self, ctx: &mut CallContext) {
            ctx.entered_at = Some(std::time::Instant::now());
            self.enters.fetch_add(1, Ordering::Relaxed);
        }

        fn on_exit(&self, ctx: &CallContext, outcome: CallOutcome) {
            assert!(ctx.entered_at.is_some());
            self.exits.fetch_add(1, Ordering::Relaxed);
            if outcome == CallOutcome::Unwound {
                self.unwinds.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    static ADD: CodeUnit = crate::code_unit!("add");
    static DIVIDE: CodeUnit = crate::code_unit!("divide");
    static SHARED: CodeUnit = crate::code_unit!("shared");
    static HAMMERED: CodeUnit = crate::code_unit!("hammered");

    // Units are process-wide statics; tests touching the same one take turns.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn add(a: u64, b: u64) -> u64 {
        ADD.invoke(|| a + b)
    }

    fn divide(a: u32, b: u32) -> u32 {
        DIVIDE.invoke(|| a / b)
    }

    #[test]
    fn test_unwoven_unit_runs_body() {
        assert_eq!(add(2, 3), 5);
        assert!(!ADD.is_instrumented());
        assert!(!ADD.breakpoint_enabled());
    }

    #[test]
    fn test_hooks_run_only_when_enabled() {
        let _serial = SERIAL.lock().unwrap();
        let hook = Arc::new(CountingHook::default());
        let wrapped = weave(&SHARED, hook.clone(), "t1").unwrap();

        assert_eq!(SHARED.invoke(|| 7), 7);
        assert_eq!(hook.enters.load(Ordering::Relaxed), 0);

        wrapped.enable();
        assert!(SHARED.breakpoint_enabled());
        assert_eq!(SHARED.invoke(|| 7), 7);
        assert_eq!(hook.enters.load(Ordering::Relaxed), 1);
        assert_eq!(hook.exits.load(Ordering::Relaxed), 1);

        wrapped.disable();
        assert_eq!(SHARED.invoke(|| 7), 7);
        assert_eq!(hook.enters.load(Ordering::Relaxed), 1);

        let unit = unweave(wrapped);
        assert!(std::ptr::eq(unit, &SHARED));
        assert!(!SHARED.is_instrumented());
    }

    #[test]
    fn test_second_weave_is_rejected() {
        let _serial = SERIAL.lock().unwrap();
        let first = weave(&SHARED, Arc::new(CountingHook::default()), "first").unwrap();
        let err = weave(&SHARED, Arc::new(CountingHook::default()), "second").unwrap_err();
        match err {
            BreakpointError::UnitOccupied { holder, .. } => assert_eq!(holder, "first"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(SHARED.owner().as_deref(), Some("first"));
        unweave(first);
        assert_eq!(SHARED.owner(), None);
    }

    #[test]
    fn test_panics_propagate_and_are_reported() {
        let hook = Arc::new(CountingHook::default());
        let wrapped = weave(&DIVIDE, hook.clone(), "div").unwrap();
        wrapped.enable();

        assert_eq!(divide(6, 3), 2);
        let result = std::panic::catch_unwind(|| divide(1, 0));
        assert!(result.is_err());
        assert_eq!(hook.exits.load(Ordering::Relaxed), 2);
        assert_eq!(hook.unwinds.load(Ordering::Relaxed), 1);

        unweave(wrapped);
        let result = std::panic::catch_unwind(|| divide(1, 0));
        assert!(result.is_err());
        assert_eq!(divide(9, 3), 3);
        assert_eq!(hook.exits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_disabled_unit_never_calls_hook_under_contention() {
        let hook = Arc::new(CountingHook::default());
        let wrapped = weave(&HAMMERED, hook.clone(), "hammer").unwrap();

        let workers: Vec<_> = (0..8)
            .map(|i| {
                std::thread::spawn(move || {
                    (0..10_000u64).map(|n| HAMMERED.invoke(|| n + i)).sum::<u64>()
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(hook.enters.load(Ordering::Relaxed), 0);
        assert_eq!(hook.exits.load(Ordering::Relaxed), 0);
        unweave(wrapped);
    }

    #[test]
    fn test_toggling_while_called_keeps_results_intact() {
        let _serial = SERIAL.lock().unwrap();
        let hook = Arc::new(CountingHook::default());
        let wrapped = weave(&SHARED, hook.clone(), "toggle").unwrap();

        let callers: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    for n in 0..20_000u32 {
                        assert_eq!(SHARED.invoke(|| n * 2), n * 2);
                    }
                })
            })
            .collect();
        for round in 0..200 {
            if round % 2 == 0 {
                wrapped.enable();
            } else {
                wrapped.disable();
            }
        }
        for caller in callers {
            caller.join().unwrap();
        }
        unweave(wrapped);

        assert_eq!(hook.enters.load(Ordering::Relaxed), hook.exits.load(Ordering::Relaxed));
    }

    #[test]
    fn test_qualified_name_has_no_duplicate_segment() {
        crate::instrumentable! {
            fn doubled(x: u32) -> u32 {
                x * 2
            }
        }
        assert_eq!(doubled(4), 8);
        assert!(doubled::UNIT.qualified_name().ends_with("::doubled"));
        assert!(!doubled::UNIT.qualified_name().ends_with("doubled::doubled"));
        assert!(ADD.qualified_name().ends_with("weaver::tests::add"));
    }
}
