//! Built-in target for `prodbp demo`
//!
//! A small request handler that can be instrumented without a separate
//! program. Lives in the binary only. Its source is embedded in the binary, so the demo resolves
//! regions even when run away from the source tree.

use std::io;
use std::path::Path;

use prodbp::locator::{SourceIndex, SourceLoader};
use prodbp::{BreakpointController, CodeUnit, ControllerConfig};

/// Path the demo handler is installed against
pub const SOURCE_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/src/demo.rs");

const SOURCE: &str = include_str!("demo.rs");

/// Request ids that make the handler panic, for panic capture breakpoints
pub const FAILING_REQUEST_INTERVAL: u64 = 997;

prodbp::instrumentable! {
    /// Simulated request: a bit of CPU work, failing now and then
    pub fn handle_request(id: u64) -> u64 {
        let rounds = 500 + (id % 7) * 250;
        let mut acc = id;
        for round in 0..rounds {
            acc = acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(round);
        }
        if id != 0 && id % FAILING_REQUEST_INTERVAL == 0 {
            panic!("request {id} failed");
        }
        acc
    }
}

/// Units the demo registers
#[must_use]
pub fn units() -> [&'static CodeUnit; 1] {
    [&handle_request::UNIT]
}

/// Line span of `handle_request`
///
/// # Errors
/// Returns an error if the embedded source no longer contains the handler
pub fn default_region() -> io::Result<(u32, u32)> {
    SourceIndex::parse(SOURCE)
        .unit_named("handle_request")
        .map(|span| (span.start_line, span.end_line))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "handle_request not in demo source"))
}

/// Serves the embedded demo source, everything else from disk
struct DemoSources;

impl SourceLoader for DemoSources {
    fn load(&self, path: &Path) -> io::Result<String> {
        if path == Path::new(SOURCE_PATH) {
            Ok(SOURCE.to_string())
        } else {
            std::fs::read_to_string(path)
        }
    }
}

/// Controller with the demo units registered
#[must_use]
pub fn controller(config: ControllerConfig) -> BreakpointController {
    let controller = BreakpointController::with_loader(config, Box::new(DemoSources));
    controller.register_units(&units());
    controller
}
