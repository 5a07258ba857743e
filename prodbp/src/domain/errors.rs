//! Structured error types for prodbp
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::TraceId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the lifecycle controller
///
/// Only control-path operations report errors. Nothing on the instrumented
/// call path ever produces one of these.
#[derive(Error, Debug)]
pub enum BreakpointError {
    #[error("No instrumentable unit for {}:{start_line}-{end_line}: {reason}", file.display())]
    RegionNotFound { file: PathBuf, start_line: u32, end_line: u32, reason: String },

    #[error("Breakpoint {0} is already installed")]
    AlreadyInstalled(TraceId),

    #[error("Provider {provider} is already registered with a different probe set")]
    DuplicateProvider { provider: String },

    #[error("Failed to encode provider notes: {0}")]
    Encoding(String),

    #[error("Breakpoint {0} not found")]
    NotFound(TraceId),

    #[error("Code unit {unit} is already instrumented by breakpoint {holder}")]
    UnitOccupied { unit: String, holder: String },
}

impl BreakpointError {
    pub(crate) fn region(
        file: impl Into<PathBuf>,
        start_line: u32,
        end_line: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::RegionNotFound {
            file: file.into(),
            start_line,
            end_line,
            reason: reason.into(),
        }
    }
}

/// Errors from the breakpoint registry table itself
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Trace id {0} is already registered")]
    DuplicateTraceId(TraceId),

    #[error("Trace id {0} is not registered")]
    NotFound(TraceId),
}

impl From<RegistryError> for BreakpointError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateTraceId(id) => Self::AlreadyInstalled(id),
            RegistryError::NotFound(id) => Self::NotFound(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = BreakpointError::NotFound(TraceId::from("checkout_latency"));
        assert_eq!(err.to_string(), "Breakpoint checkout_latency not found");
    }

    #[test]
    fn test_region_error_mentions_location() {
        let err = BreakpointError::region("/srv/app/src/orders.rs", 7, 9, "no enclosing function");
        let msg = err.to_string();
        assert!(msg.contains("/srv/app/src/orders.rs:7-9"));
        assert!(msg.contains("no enclosing function"));
    }

    #[test]
    fn test_registry_errors_map_to_lifecycle_errors() {
        let err: BreakpointError = RegistryError::DuplicateTraceId(TraceId::from("a")).into();
        assert!(matches!(err, BreakpointError::AlreadyInstalled(ref id) if id.as_str() == "a"));

        let err: BreakpointError = RegistryError::NotFound(TraceId::from("b")).into();
        assert!(matches!(err, BreakpointError::NotFound(ref id) if id.as_str() == "b"));
    }
}
