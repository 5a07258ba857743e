//! # Breakpoint Types
//!
//! A breakpoint type decides what gets measured around a code unit and what
//! its probes carry. All types share one capability set:
//!
//! ```text
//! provider_name() ── which provider the probes live in
//! probes()        ── probe names and argument counts
//! on_enter(ctx)   ── before the body, on the calling thread
//! on_exit(ctx, outcome, sink) ── after the body (or while it unwinds)
//! ```
//!
//! Hooks run on production threads with the breakpoint enabled. They do
//! not allocate, block or panic: every argument a probe fires with is either
//! a number or a pointer to data built at install time.

pub mod latency;
pub mod panic_capture;

pub use latency::Latency;
pub use panic_capture::PanicCapture;

use std::ffi::CString;

use crate::domain::{BreakpointType, TraceId};
use crate::notes::encoder::MAX_NAME_LEN;
use crate::notes::{ProbeSpec, Provider, ProviderHandle};
use crate::weaver::{CallContext, CallOutcome, UnitHook};

/// Where a breakpoint's probes are fired
pub trait ProbeSink {
    /// Fire probe `index` (position in `probes()`) with `args`
    fn fire(&self, index: usize, args: &[u64]);
}

impl ProbeSink for Provider {
    #[inline]
    fn fire(&self, index: usize, args: &[u64]) {
        Provider::fire(self, index, args);
    }
}

/// Behaviour of one breakpoint type
pub trait BreakpointKind: Send + Sync {
    fn kind(&self) -> BreakpointType;

    fn provider_name(&self) -> &str;

    /// Probes this type fires, in index order
    fn probes(&self) -> Vec<ProbeSpec>;

    /// Primary probe, reported as the breakpoint's `name`
    fn probe_name(&self) -> &'static str;

    fn on_enter(&self, ctx: &mut CallContext);

    fn on_exit(&self, ctx: &CallContext, outcome: CallOutcome, sink: &dyn ProbeSink);
}

/// How provider names are chosen for a breakpoint type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProviderNaming {
    /// `<type>_<trace id>`, one provider per breakpoint; ids that need
    /// sanitizing or truncating get a hash suffix
    #[default]
    PerTrace,
    /// Every breakpoint of the type shares this provider
    Shared(String),
}

impl ProviderNaming {
    #[must_use]
    pub fn provider_name(&self, kind: BreakpointType, trace_id: &TraceId) -> String {
        match self {
            ProviderNaming::PerTrace => {
                let raw = trace_id.as_str();
                let sanitized = sanitize(raw);
                let mut name = format!("{}_{sanitized}", kind.as_str());
                if name.len() <= MAX_NAME_LEN && sanitized == raw {
                    return name;
                }
                // Sanitizing or truncating loses information: keep ids apart
                let suffix = format!("_{:08x}", fnv1a(raw.as_bytes()));
                name.truncate(MAX_NAME_LEN - suffix.len());
                name.push_str(&suffix);
                name
            }
            ProviderNaming::Shared(name) => name.clone(),
        }
    }
}

/// Map a trace id onto the provider name alphabet
fn sanitize(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

/// 32-bit FNV-1a, stable across builds and platforms
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash, &b| (hash ^ u32::from(b)).wrapping_mul(0x0100_0193))
}

/// Trace id as a C string, handed to tracers by pointer
///
/// Interior NUL bytes cannot cross the C boundary and are dropped.
pub(crate) fn trace_id_cstring(trace_id: &TraceId) -> CString {
    let bytes: Vec<u8> = trace_id.as_str().bytes().filter(|&b| b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

/// Nanoseconds since `on_enter`, 0 if no timestamp was taken
pub(crate) fn elapsed_ns(ctx: &CallContext) -> u64 {
    ctx.entered_at
        .map_or(0, |at| u64::try_from(at.elapsed().as_nanos()).unwrap_or(u64::MAX))
}

impl BreakpointType {
    /// Instantiate this type for `trace_id`
    #[must_use]
    pub fn build(self, trace_id: &TraceId, naming: &ProviderNaming) -> Box<dyn BreakpointKind> {
        let provider = naming.provider_name(self, trace_id);
        match self {
            BreakpointType::Latency => Box::new(Latency::new(trace_id, provider)),
            BreakpointType::PanicCapture => Box::new(PanicCapture::new(trace_id, provider)),
        }
    }
}

/// Adapts a breakpoint type and its provider to the weaver's hook contract
pub(crate) struct KindHook {
    kind: Box<dyn BreakpointKind>,
    provider: ProviderHandle,
}

impl KindHook {
    pub(crate) fn new(kind: Box<dyn BreakpointKind>, provider: ProviderHandle) -> Self {
        Self { kind, provider }
    }
}

impl UnitHook for KindHook {
    #[inline]
    fn on_enter(&self, ctx: &mut CallContext) {
        self.kind.on_enter(ctx);
    }

    #[inline]
    fn on_exit(&self, ctx: &CallContext, outcome: CallOutcome) {
        self.kind.on_exit(ctx, outcome, &*self.provider);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ProbeSink;
    use std::sync::Mutex;

    /// Records every probe fired at it
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) fired: Mutex<Vec<(usize, Vec<u64>)>>,
    }

    impl ProbeSink for RecordingSink {
        fn fire(&self, index: usize, args: &[u64]) {
            self.fired.lock().unwrap().push((index, args.to_vec()));
        }
    }
}
