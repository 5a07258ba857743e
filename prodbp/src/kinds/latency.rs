//! Latency breakpoints
//!
//! Fires `latency(trace_id: char*, elapsed_ns: u64)` every time the unit
//! is left, whether it returned or unwound.

use prodbp_common::LATENCY_PROBE;
use std::ffi::CString;
use std::time::Instant;

use super::{elapsed_ns, trace_id_cstring, BreakpointKind, ProbeSink};
use crate::domain::{BreakpointType, TraceId};
use crate::notes::ProbeSpec;
use crate::weaver::{CallContext, CallOutcome};

const LATENCY_INDEX: usize = 0;

pub struct Latency {
    provider: String,
    trace_id: CString,
}

impl Latency {
    #[must_use]
    pub fn new(trace_id: &TraceId, provider: String) -> Self {
        Self { provider, trace_id: trace_id_cstring(trace_id) }
    }
}

impl BreakpointKind for Latency {
    fn kind(&self) -> BreakpointType {
        BreakpointType::Latency
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn probes(&self) -> Vec<ProbeSpec> {
        vec![ProbeSpec::new(LATENCY_PROBE, 2)]
    }

    fn probe_name(&self) -> &'static str {
        LATENCY_PROBE
    }

    fn on_enter(&self, ctx: &mut CallContext) {
        ctx.entered_at = Some(Instant::now());
    }

    fn on_exit(&self, ctx: &CallContext, _outcome: CallOutcome, sink: &dyn ProbeSink) {
        sink.fire(LATENCY_INDEX, &[self.trace_id.as_ptr() as u64, elapsed_ns(ctx)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::testing::RecordingSink;
    use std::time::Duration;

    #[test]
    fn test_fires_trace_id_and_elapsed() {
        let latency = Latency::new(&TraceId::from("slow_checkout"), "latency_slow_checkout".into());
        let sink = RecordingSink::default();

        let mut ctx = CallContext::new("checkout");
        latency.on_enter(&mut ctx);
        std::thread::sleep(Duration::from_millis(2));
        latency.on_exit(&ctx, CallOutcome::Returned, &sink);
        latency.on_exit(&ctx, CallOutcome::Unwound, &sink);

        let fired = sink.fired.lock().unwrap();
        assert_eq!(fired.len(), 2);
        let (index, args) = &fired[0];
        assert_eq!(*index, LATENCY_INDEX);
        assert_eq!(args[0], latency.trace_id.as_ptr() as u64);
        assert!(args[1] >= 2_000_000);
    }

    #[test]
    fn test_probe_layout() {
        let latency = Latency::new(&TraceId::from("t"), "latency_t".into());
        assert_eq!(latency.probes(), [ProbeSpec::new("latency", 2)]);
        assert_eq!(latency.provider_name(), "latency_t");
    }
}
