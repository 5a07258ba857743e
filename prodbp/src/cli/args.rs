//! CLI argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::controller::ControllerConfig;
use crate::domain::BreakpointType;
use crate::notes::ImageBacking;

#[derive(Parser)]
#[command(
    name = "prodbp",
    about = "Toggleable production breakpoints published as SDT probes",
    after_help = "\
EXAMPLES:
    prodbp notes /usr/lib/libc.so.6          List SDT probes of any ELF file
    prodbp demo --duration 30                Run the demo target with a latency breakpoint
    prodbp demo --kind panic --threads 8     Capture unwinding calls instead"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List `.note.stapsdt` probe descriptors of an ELF file
    Notes(NotesArgs),
    /// Run a built-in target under load with a breakpoint installed
    Demo(DemoArgs),
}

#[derive(clap::Args)]
pub struct NotesArgs {
    /// ELF file to inspect (a provider image path works too)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Print notes as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct DemoArgs {
    /// Breakpoint type to install
    #[arg(long, value_enum, default_value_t = KindArg::Latency)]
    pub kind: KindArg,

    /// Trace id of the demo breakpoint
    #[arg(long, default_value = "demo_handle_request")]
    pub trace_id: String,

    /// First line of the region (defaults to the demo handler)
    #[arg(long, requires = "end_line")]
    pub start_line: Option<u32>,

    /// Last line of the region
    #[arg(long, requires = "start_line")]
    pub end_line: Option<u32>,

    /// Worker threads calling the demo handler
    #[arg(long, default_value = "4")]
    pub threads: usize,

    /// Stop after N seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Publish provider images as files in DIR instead of memfds
    #[arg(long, value_name = "DIR")]
    pub provider_dir: Option<PathBuf>,

    /// Install without enabling
    #[arg(long)]
    pub disabled: bool,

    /// Suppress periodic statistics
    #[arg(short, long)]
    pub quiet: bool,
}

impl DemoArgs {
    /// Region override, if both lines were given
    #[must_use]
    pub fn region(&self) -> Option<(u32, u32)> {
        self.start_line.zip(self.end_line)
    }

    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        let backing = self
            .provider_dir
            .clone()
            .map_or(ImageBacking::Memfd, ImageBacking::Directory);
        ControllerConfig::default().with_backing(backing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Latency,
    Panic,
}

impl From<KindArg> for BreakpointType {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Latency => BreakpointType::Latency,
            KindArg::Panic => BreakpointType::PanicCapture,
        }
    }
}
