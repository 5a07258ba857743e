//! Hook contract between a woven code unit and the breakpoint behind it

use std::time::Instant;

/// How a call left the instrumented unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The body returned normally
    Returned,
    /// A panic is unwinding through the unit
    Unwound,
}

/// Call-local state shared between `on_enter` and `on_exit`
///
/// Lives on the caller's stack for the duration of one call; creating it
/// never allocates.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Name of the unit being executed
    pub unit: &'static str,
    /// Timing anchor, set by hooks that measure time
    pub entered_at: Option<Instant>,
}

impl CallContext {
    #[must_use]
    pub fn new(unit: &'static str) -> Self {
        Self { unit, entered_at: None }
    }
}

/// Behaviour run around a woven unit while its breakpoint is enabled
///
/// Implementations run on production threads: they must not block, must not
/// panic and should not allocate.
pub trait UnitHook: Send + Sync {
    /// Called before the original body runs
    fn on_enter(&self, ctx: &mut CallContext);

    /// Called after the body returned or while it unwinds
    fn on_exit(&self, ctx: &CallContext, outcome: CallOutcome);
}

/// Runs `on_exit` when dropped, so unwinding calls are reported too
pub(crate) struct ExitGuard<'a> {
    hook: &'a dyn UnitHook,
    ctx: CallContext,
    // A call made from a destructor during unwinding must not be reported
    // as unwound when it returns normally.
    panicking_at_entry: bool,
}

impl<'a> ExitGuard<'a> {
    pub(crate) fn enter(hook: &'a dyn UnitHook, unit: &'static str) -> Self {
        let mut ctx = CallContext::new(unit);
        hook.on_enter(&mut ctx);
        Self { hook, ctx, panicking_at_entry: std::thread::panicking() }
    }
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let outcome = if std::thread::panicking() && !self.panicking_at_entry {
            CallOutcome::Unwound
        } else {
            CallOutcome::Returned
        };
        self.hook.on_exit(&self.ctx, outcome);
    }
}
