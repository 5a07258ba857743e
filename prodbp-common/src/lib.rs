//! # Shared Probe ABI (instrumented process ↔ external tracers)
//!
//! Constants describing how production breakpoints surface to the outside
//! world. Everything here is part of a compatibility contract: external
//! tracers (`bpftrace`, bcc `tplist`, `readelf --notes`, hand-written eBPF
//! programs) locate our probes through these exact bytes.
//!
//! ## Key Items
//!
//! - [`STAPSDT_NOTE_NAME`] / [`NT_STAPSDT`] - Owner and type of every probe note
//! - [`NOTE_SECTION`] / [`BASE_SECTION`] - Sections tools search for probes
//! - [`PROBE_STUB`] - Machine code placed at each probe site
//! - [`ARG_REGISTERS`] - How probe arguments are spelled in the note

#![no_std]

// ============================================================================
// Note Format Constants
// ============================================================================

/// Owner name of SystemTap SDT notes, including the trailing NUL
///
/// Tools match this byte-for-byte when scanning `.note.stapsdt`.
pub const STAPSDT_NOTE_NAME: &[u8] = b"stapsdt\0";

/// Note type for SDT probe descriptors (`NT_STAPSDT`)
pub const NT_STAPSDT: u32 = 3;

/// Section holding one note per probe
pub const NOTE_SECTION: &str = ".note.stapsdt";

/// Section whose link-time address anchors prelink adjustment
///
/// Tracers compare the runtime address of this section against the `base`
/// field of each note to relocate probe addresses.
pub const BASE_SECTION: &str = ".stapsdt.base";

/// Fixed-width prefix of a note descriptor: `pc`, `base`, `semaphore`
pub const NOTE_DESC_HEADER_SIZE: usize = 3 * 8;

// ============================================================================
// Probe Sites
// ============================================================================

/// Maximum number of arguments a probe may carry
///
/// Arguments are passed in registers only (System V / AAPCS64 integer
/// argument registers), so this is the register count.
pub const MAX_PROBE_ARGS: usize = 6;

/// Size reserved for each probe stub in the provider's `.text`
pub const PROBE_STUB_SLOT: usize = 16;

/// `nop; ret`: the probe point is the `nop`, uprobes attach there
#[cfg(target_arch = "x86_64")]
pub const PROBE_STUB: &[u8] = &[0x90, 0xc3];

/// `nop; ret` (little-endian A64 encodings)
#[cfg(target_arch = "aarch64")]
pub const PROBE_STUB: &[u8] = &[0x1f, 0x20, 0x03, 0xd5, 0xc0, 0x03, 0x5f, 0xd6];

/// No executable stub on this architecture; probes never fire
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const PROBE_STUB: &[u8] = &[];

/// Integer argument registers in `stapsdt` argument syntax (`8@%rdi`)
#[cfg(target_arch = "x86_64")]
pub const ARG_REGISTERS: [&str; MAX_PROBE_ARGS] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// Integer argument registers in `stapsdt` argument syntax (`8@x0`)
#[cfg(target_arch = "aarch64")]
pub const ARG_REGISTERS: [&str; MAX_PROBE_ARGS] = ["x0", "x1", "x2", "x3", "x4", "x5"];

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const ARG_REGISTERS: [&str; MAX_PROBE_ARGS] = ["", "", "", "", "", ""];

/// Width in bytes of every probe argument (all arguments are `u64`)
pub const ARG_SIZE: usize = 8;

/// Whether this architecture can execute probe stubs at all
#[must_use]
pub const fn probes_supported() -> bool {
    !PROBE_STUB.is_empty()
}

// ============================================================================
// Probe Payloads
// ============================================================================

/// Probe fired by latency breakpoints every time a call leaves the unit
///
/// Arguments: `arg0` = pointer to the NUL-terminated trace id,
/// `arg1` = elapsed nanoseconds between entry and exit.
pub const LATENCY_PROBE: &str = "latency";

/// Probe fired by panic-capture breakpoints when a call unwinds
///
/// Arguments: `arg0` = pointer to the NUL-terminated trace id,
/// `arg1` = nanoseconds spent before the panic escaped.
pub const PANIC_PROBE: &str = "panic";
