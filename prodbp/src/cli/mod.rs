//! Command-line surface of the `prodbp` binary

pub mod args;
pub mod output;

pub use args::{Args, Command, DemoArgs, KindArg, NotesArgs};
pub use output::{bpftrace_hint, format_notes};
