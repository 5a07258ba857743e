//! Instrumentable code units
//!
//! A [`CodeUnit`] is the indirection slot every instrumentable function calls
//! through. It is a `static`, so it outlives any breakpoint woven onto it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::hook::{ExitGuard, UnitHook};

/// Hook currently woven onto a unit, tagged with the breakpoint that owns it
pub(crate) struct Woven {
    pub(crate) owner: String,
    pub(crate) hook: Arc<dyn UnitHook>,
}

/// Indirection slot for one instrumentable function
///
/// Build one with [`code_unit!`](crate::code_unit) and route the function
/// body through [`CodeUnit::invoke`]:
///
/// ```rust,ignore
/// static CHECKOUT: CodeUnit = prodbp::code_unit!("checkout");
///
/// fn checkout(cart: &Cart) -> Receipt {
///     CHECKOUT.invoke(|| {
///         // original body
///     })
/// }
/// ```
pub struct CodeUnit {
    name: &'static str,
    module_path: &'static str,
    file: &'static str,
    line: u32,
    enabled: AtomicBool,
    slot: RwLock<Option<Woven>>,
}

impl CodeUnit {
    #[must_use]
    pub const fn new(
        name: &'static str,
        module_path: &'static str,
        file: &'static str,
        line: u32,
    ) -> Self {
        Self {
            name,
            module_path,
            file,
            line,
            enabled: AtomicBool::new(false),
            slot: RwLock::new(None),
        }
    }

    /// Bare function name, matched against `fn` items in source
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Source file as recorded by `file!()` at the declaration
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// Line of the declaration
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// `module::path::name`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        // instrumentable! declares the unit inside a module named after the fn
        if self.module_path.rsplit("::").next() == Some(self.name) {
            self.module_path.to_string()
        } else {
            format!("{}::{}", self.module_path, self.name)
        }
    }

    /// Run `body` through the unit
    ///
    /// With no enabled breakpoint this is one relaxed atomic load followed by
    /// a direct call of `body`.
    #[inline]
    pub fn invoke<R>(&self, body: impl FnOnce() -> R) -> R {
        if !self.enabled.load(Ordering::Relaxed) {
            return body();
        }
        self.invoke_instrumented(body)
    }

    #[cold]
    #[inline(never)]
    fn invoke_instrumented<R>(&self, body: impl FnOnce() -> R) -> R {
        // Uninstalled between the flag load and here: run uninstrumented.
        let Some(hook) = self.current_hook() else {
            return body();
        };
        let _guard = ExitGuard::enter(hook.as_ref(), self.name);
        body()
    }

    fn current_hook(&self) -> Option<Arc<dyn UnitHook>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|woven| Arc::clone(&woven.hook))
    }

    /// Whether a breakpoint is woven and enabled on this unit
    #[must_use]
    pub fn breakpoint_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed) && self.is_instrumented()
    }

    /// Whether a breakpoint is woven on this unit, enabled or not
    #[must_use]
    pub fn is_instrumented(&self) -> bool {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Trace id of the breakpoint woven on this unit
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|woven| woven.owner.clone())
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn with_slot<T>(&self, f: impl FnOnce(&mut Option<Woven>) -> T) -> T {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut slot)
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("name", &self.qualified_name())
            .field("file", &self.file)
            .field("line", &self.line)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Build a [`CodeUnit`] for the function `name` declared at this location
#[macro_export]
macro_rules! code_unit {
    ($name:expr) => {
        $crate::weaver::CodeUnit::new($name, module_path!(), file!(), line!())
    };
}

/// Declare free functions whose bodies run through their own [`CodeUnit`]
///
/// Each function `f` gets a companion module `f` holding `f::UNIT`, which is
/// what gets registered with the controller.
///
/// ```rust,ignore
/// prodbp::instrumentable! {
///     pub fn price(qty: u32) -> u32 {
///         qty * 3
///     }
/// }
///
/// controller.register_unit(&price::UNIT);
/// ```
#[macro_export]
macro_rules! instrumentable {
    ($(
        $(#[$meta:meta])*
        $vis:vis fn $name:ident ( $($arg:ident : $ty:ty),* $(,)? ) $(-> $ret:ty)? $body:block
    )*) => {
        $(
            $(#[$meta])*
            $vis fn $name( $($arg: $ty),* ) $(-> $ret)? {
                $name::UNIT.invoke(move || $body)
            }

            $vis mod $name {
                pub static UNIT: $crate::weaver::CodeUnit = $crate::code_unit!(stringify!($name));
            }
        )*
    };
}
