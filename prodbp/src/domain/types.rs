//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep caller-chosen identifiers apart from provider
//! and probe names, and make function signatures more expressive.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Trace identifier
///
/// Opaque, caller-chosen identifier of one installed breakpoint.
/// Unique across the process while the breakpoint is installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TraceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TraceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&TraceId> for TraceId {
    fn from(id: &TraceId) -> Self {
        id.clone()
    }
}

/// Source region targeted by a breakpoint (1-based, inclusive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRegion {
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
}

impl fmt::Display for SourceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.file.display(), self.start_line, self.end_line)
    }
}

/// Closed set of breakpoint behaviours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    /// Measure wall time between entry and exit of the unit
    Latency,
    /// Report calls that leave the unit by unwinding
    PanicCapture,
}

impl BreakpointType {
    /// Short name used in provider names and on the command line
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BreakpointType::Latency => "latency",
            BreakpointType::PanicCapture => "panic",
        }
    }
}

impl fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointState {
    Uninstalled,
    InstalledDisabled,
    InstalledEnabled,
}

impl BreakpointState {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, BreakpointState::InstalledEnabled)
    }
}

/// Read-only snapshot of an installed breakpoint
///
/// `provider_name`, `name` and `probe_names` are fixed at install time and
/// never change while the breakpoint stays installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub trace_id: TraceId,
    pub kind: BreakpointType,
    pub region: SourceRegion,
    /// Qualified name of the instrumented code unit
    pub unit: String,
    pub provider_name: String,
    /// Primary probe of the provider
    pub name: String,
    pub probe_names: Vec<String>,
    pub state: BreakpointState,
}

impl Breakpoint {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }
}
