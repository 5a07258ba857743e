//! Installed breakpoints, keyed by trace id
//!
//! The registry owns everything an installed breakpoint holds on to: the
//! woven unit (so it can be restored) and a handle to its provider (so the
//! probe image stays mapped). It is only mutated under the controller lock.

use std::collections::HashMap;

use crate::domain::{Breakpoint, BreakpointState, BreakpointType, RegistryError, SourceRegion, TraceId};
use crate::notes::ProviderHandle;
use crate::weaver::WrappedUnit;

/// One installed breakpoint and the resources it owns
#[derive(Debug)]
pub struct InstalledBreakpoint {
    pub trace_id: TraceId,
    pub kind: BreakpointType,
    pub region: SourceRegion,
    pub wrapped: WrappedUnit,
    pub provider: ProviderHandle,
    /// Primary probe name
    pub name: String,
}

impl InstalledBreakpoint {
    #[must_use]
    pub fn state(&self) -> BreakpointState {
        if self.wrapped.is_enabled() {
            BreakpointState::InstalledEnabled
        } else {
            BreakpointState::InstalledDisabled
        }
    }

    /// Public view of this breakpoint
    #[must_use]
    pub fn snapshot(&self) -> Breakpoint {
        Breakpoint {
            trace_id: self.trace_id.clone(),
            kind: self.kind,
            region: self.region.clone(),
            unit: self.wrapped.unit().qualified_name(),
            provider_name: self.provider.name().to_string(),
            name: self.name.clone(),
            probe_names: self.provider.probes().iter().map(|p| p.name.clone()).collect(),
            state: self.state(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<TraceId, InstalledBreakpoint>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, trace_id: &TraceId) -> bool {
        self.entries.contains_key(trace_id)
    }

    /// Add a breakpoint
    ///
    /// # Errors
    /// Returns `DuplicateTraceId` if the trace id is taken; the rejected entry
    /// is handed back so its resources can be released
    pub fn insert(
        &mut self,
        entry: InstalledBreakpoint,
    ) -> Result<(), (RegistryError, Box<InstalledBreakpoint>)> {
        if self.entries.contains_key(&entry.trace_id) {
            return Err((RegistryError::DuplicateTraceId(entry.trace_id.clone()), Box::new(entry)));
        }
        self.entries.insert(entry.trace_id.clone(), entry);
        Ok(())
    }

    /// # Errors
    /// Returns `NotFound` if no breakpoint has this trace id
    pub fn lookup(&self, trace_id: &TraceId) -> Result<&InstalledBreakpoint, RegistryError> {
        self.entries.get(trace_id).ok_or_else(|| RegistryError::NotFound(trace_id.clone()))
    }

    /// # Errors
    /// Returns `NotFound` if no breakpoint has this trace id
    pub fn lookup_mut(&mut self, trace_id: &TraceId) -> Result<&mut InstalledBreakpoint, RegistryError> {
        self.entries.get_mut(trace_id).ok_or_else(|| RegistryError::NotFound(trace_id.clone()))
    }

    /// # Errors
    /// Returns `NotFound` if no breakpoint has this trace id
    pub fn remove(&mut self, trace_id: &TraceId) -> Result<InstalledBreakpoint, RegistryError> {
        self.entries.remove(trace_id).ok_or_else(|| RegistryError::NotFound(trace_id.clone()))
    }

    /// Snapshots of every installed breakpoint, ordered by trace id
    #[must_use]
    pub fn all(&self) -> Vec<(TraceId, Breakpoint)> {
        let mut all: Vec<_> =
            self.entries.iter().map(|(id, entry)| (id.clone(), entry.snapshot())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry
    pub fn drain(&mut self) -> Vec<InstalledBreakpoint> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::{ImageBacking, ProbeSpec, ProviderTable};
    use crate::weaver::{self, CallContext, CallOutcome, CodeUnit, UnitHook};
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Quiet;

    impl UnitHook for Quiet {
        fn on_enter(&self, _ctx: &mut CallContext) {}
        fn on_exit(&self, _ctx: &CallContext, _outcome: CallOutcome) {}
    }

    static FIRST: CodeUnit = crate::code_unit!("first");
    static SECOND: CodeUnit = crate::code_unit!("second");
    static THIRD: CodeUnit = crate::code_unit!("third");

    fn entry(table: &mut ProviderTable, unit: &'static CodeUnit, id: &str) -> InstalledBreakpoint {
        let provider = table.register(&format!("latency_{id}"), &[ProbeSpec::new("latency", 2)]).unwrap();
        InstalledBreakpoint {
            trace_id: TraceId::from(id),
            kind: BreakpointType::Latency,
            region: SourceRegion { file: PathBuf::from("src/registry.rs"), start_line: 1, end_line: 2 },
            wrapped: weaver::weave(unit, Arc::new(Quiet), id).unwrap(),
            provider,
            name: "latency".to_string(),
        }
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut table = ProviderTable::new(ImageBacking::InMemory);
        let mut registry = Registry::new();
        registry.insert(entry(&mut table, &FIRST, "a")).unwrap();
        assert_eq!(registry.len(), 1);

        let id = TraceId::from("a");
        let snapshot = registry.lookup(&id).unwrap().snapshot();
        assert_eq!(snapshot.provider_name, "latency_a");
        assert_eq!(snapshot.probe_names, ["latency"]);
        assert_eq!(snapshot.state, BreakpointState::InstalledDisabled);
        assert!(snapshot.unit.ends_with("registry::tests::first"));

        registry.lookup_mut(&id).unwrap().wrapped.enable();
        assert!(registry.lookup(&id).unwrap().snapshot().is_enabled());

        let removed = registry.remove(&id).unwrap();
        weaver::unweave(removed.wrapped);
        assert_eq!(registry.remove(&id).unwrap_err(), RegistryError::NotFound(id.clone()));
        assert!(registry.lookup(&id).is_err());
    }

    #[test]
    fn test_duplicate_trace_id_hands_entry_back() {
        let mut table = ProviderTable::new(ImageBacking::InMemory);
        let mut registry = Registry::new();
        registry.insert(entry(&mut table, &SECOND, "dup")).unwrap();

        let (err, rejected) = registry.insert(entry(&mut table, &THIRD, "dup")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTraceId(TraceId::from("dup")));
        assert_eq!(table.users("latency_dup"), 2);
        table.release(&rejected.provider);
        weaver::unweave(rejected.wrapped);
        assert!(!THIRD.is_instrumented());

        let all = registry.all();
        assert_eq!(all.len(), 1);
        assert!(all[0].1.unit.ends_with("::second"));

        for entry in registry.drain() {
            table.release(&entry.provider);
            weaver::unweave(entry.wrapped);
        }
        assert!(registry.is_empty());
        assert!(table.is_empty());
    }
}
