//! # Probe Providers
//!
//! Statically defined tracing (SDT) probes for code that was never compiled
//! with them. Each provider is a tiny ELF shared object generated at runtime:
//!
//! ```text
//! ProviderTable::register("latency_checkout", [latency/2])
//!        │
//!        ├─ encoder::build_image   ── ELF64 ET_DYN, stubs + .note.stapsdt
//!        ├─ reader::read_stapsdt_notes ── verify the notes read back
//!        └─ loader::publish        ── memfd (or directory) + mmap R+X
//!                                        │
//!   bpftrace -e 'usdt:/proc/<pid>/fd/<n>:latency_checkout:latency { .. }'
//! ```
//!
//! ## Key Concepts
//!
//! - **Probe site:** a 16-byte stub (`nop; ret`) in the image's `.text`.
//!   Firing a probe is a plain call into the mapped stub with arguments in
//!   the C argument registers; an attached uprobe sees them there.
//! - **Note:** one `stapsdt` descriptor per probe naming provider, probe,
//!   site address and argument layout (`8@%rdi 8@%rsi`, ...).
//! - **Degraded mode:** if the image cannot be published or mapped, the
//!   provider still exists, its notes can be listed, and firing is a no-op.

pub mod encoder;
pub mod loader;
pub mod provider;
pub mod reader;

pub use encoder::{NoteRecord, ProbeSpec};
pub use loader::ImageBacking;
pub use provider::{Provider, ProviderHandle, ProviderTable};
pub use reader::read_stapsdt_notes;
