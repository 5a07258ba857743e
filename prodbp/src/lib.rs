//! # prodbp - Production Breakpoints
//!
//! prodbp lets an operator attach, toggle and remove lightweight
//! instrumentation ("production breakpoints") on running Rust code without
//! restarting the process. Each breakpoint is published as a SystemTap SDT
//! probe, so standard tracers (`bpftrace`, `perf`, `readelf --notes`) can
//! discover and consume it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Application Code                            │
//! │   fn checkout(..) { CHECKOUT.invoke(|| { .. }) }                │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ one relaxed load per call
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    prodbp (This Crate)                          │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Controller  │──▶│   Locator    │   │   Registry   │         │
//! │  │ (lifecycle)  │   │ (file:lines) │   │ (trace ids)  │         │
//! │  └──────┬───────┘   └──────────────┘   └──────────────┘         │
//! │         │                                                       │
//! │         ├──────────────▶┌──────────────┐                        │
//! │         │               │    Weaver    │ hook on the CodeUnit   │
//! │         │               └──────┬───────┘                        │
//! │         ▼                      ▼                                │
//! │  ┌──────────────┐   ┌──────────────┐                            │
//! │  │   Notes      │◀──│    Kinds     │ fire(trace_id, elapsed)    │
//! │  │ (ELF + SDT)  │   │ (latency..)  │                            │
//! │  └──────┬───────┘   └──────────────┘                            │
//! └─────────┼───────────────────────────────────────────────────────┘
//!           │ memfd + mmap R+X, /proc/<pid>/fd/<n>
//!           ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          External tracers: bpftrace, perf, readelf              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`controller`]: install / enable / disable / uninstall, process-wide instance
//! - [`locator`]: resolve `(file, start_line, end_line)` to a registered code unit
//! - [`weaver`]: `CodeUnit` indirection slots and the hook contract
//! - [`kinds`]: breakpoint types (`Latency`, `PanicCapture`) and provider naming
//! - [`notes`]: SDT note encoding, provider images, publishing, note reading
//! - [`registry`]: installed breakpoints keyed by trace id
//! - [`domain`]: `TraceId`, `Breakpoint`, errors
//! - [`cli`]: arguments and output of the `prodbp` binary
//!
//! ## Typical Usage
//!
//! ```rust,ignore
//! prodbp::instrumentable! {
//!     pub fn some_method() -> u64 {
//!         2
//!     }
//! }
//!
//! prodbp::register_units(&[&some_method::UNIT]);
//! let bp = prodbp::install_breakpoint(
//!     prodbp::BreakpointType::Latency, file!(), 3, 3, "checkout_latency",
//! )?;
//! prodbp::enable_breakpoint("checkout_latency")?;
//! // bpftrace -p <pid> -e 'usdt:<location>:latency_checkout_latency:latency { .. }'
//! prodbp::uninstall_breakpoint("checkout_latency")?;
//! ```
//!
//! ## Key Concepts
//!
//! - **Code unit**: the `static` slot an instrumentable function calls through
//! - **Provider**: a generated ELF image holding probe stubs and their notes
//! - **Trace id**: caller-chosen key of one installed breakpoint
//! - **SDT note**: `.note.stapsdt` descriptor tracers use to find a probe

pub mod cli;
pub mod controller;
pub mod domain;
pub mod kinds;
pub mod locator;
pub mod notes;
pub mod registry;
pub mod weaver;

pub use controller::{
    configure_global, disable_breakpoint, enable_breakpoint, global, install_breakpoint,
    installed_breakpoints, register_units, uninstall_breakpoint, BreakpointController,
    ControllerConfig,
};
pub use domain::{Breakpoint, BreakpointError, BreakpointState, BreakpointType, SourceRegion, TraceId};
pub use kinds::{BreakpointKind, ProviderNaming};
pub use notes::{ImageBacking, NoteRecord};
pub use weaver::{CodeUnit, WrappedUnit};
