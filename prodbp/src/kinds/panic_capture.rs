//! Panic capture breakpoints
//!
//! Fires `panic(trace_id: char*, elapsed_ns: u64)` only for calls that
//! leave the unit by unwinding. Normal returns are silent.

use prodbp_common::PANIC_PROBE;
use std::ffi::CString;
use std::time::Instant;

use super::{elapsed_ns, trace_id_cstring, BreakpointKind, ProbeSink};
use crate::domain::{BreakpointType, TraceId};
use crate::notes::ProbeSpec;
use crate::weaver::{CallContext, CallOutcome};

const PANIC_INDEX: usize = 0;

pub struct PanicCapture {
    provider: String,
    trace_id: CString,
}

impl PanicCapture {
    #[must_use]
    pub fn new(trace_id: &TraceId, provider: String) -> Self {
        Self { provider, trace_id: trace_id_cstring(trace_id) }
    }
}

impl BreakpointKind for PanicCapture {
    fn kind(&self) -> BreakpointType {
        BreakpointType::PanicCapture
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn probes(&self) -> Vec<ProbeSpec> {
        vec![ProbeSpec::new(PANIC_PROBE, 2)]
    }

    fn probe_name(&self) -> &'static str {
        PANIC_PROBE
    }

    fn on_enter(&self, ctx: &mut CallContext) {
        ctx.entered_at = Some(Instant::now());
    }

    fn on_exit(&self, ctx: &CallContext, outcome: CallOutcome, sink: &dyn ProbeSink) {
        if outcome == CallOutcome::Unwound {
            sink.fire(PANIC_INDEX, &[self.trace_id.as_ptr() as u64, elapsed_ns(ctx)]);
        }
    }
}
