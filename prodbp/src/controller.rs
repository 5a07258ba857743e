//! # Lifecycle Controller
//!
//! Public entry point for installing, toggling and removing breakpoints.
//!
//! ## Install Pipeline
//!
//! ```text
//! install(type, file, start, end, trace_id)
//!   1. trace id free?            ── AlreadyInstalled
//!   2. locate code unit          ── RegionNotFound
//!   3. build breakpoint type
//!   4. register provider + notes ── DuplicateProvider / Encoding
//!   5. weave hook (disabled)     ── UnitOccupied      → release provider
//!   6. record in registry                             → unweave, release
//! ```
//!
//! Every step that completed is undone when a later one fails, so a failed
//! install leaves no trace.
//!
//! ## States
//!
//! ```text
//!               install                 enable
//! Uninstalled ──────────▶ Disabled ◀──────────▶ Enabled
//!      ▲                     │        disable       │
//!      └──── uninstall ──────┴──────────────────────┘
//! ```
//!
//! All control operations serialise on one mutex. Instrumented calls never
//! touch it.

use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::domain::{Breakpoint, BreakpointError, BreakpointState, BreakpointType, SourceRegion, TraceId};
use crate::kinds::{KindHook, ProviderNaming};
use crate::locator::{SourceLoader, SourceLocator};
use crate::notes::{ImageBacking, NoteRecord, ProviderTable};
use crate::registry::{InstalledBreakpoint, Registry};
use crate::weaver::{self, CodeUnit};

/// Controller configuration
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Where provider images are published
    pub backing: ImageBacking,
    /// Provider naming per breakpoint type; unlisted types use `PerTrace`
    pub naming: HashMap<BreakpointType, ProviderNaming>,
}

impl ControllerConfig {
    #[must_use]
    pub fn with_backing(mut self, backing: ImageBacking) -> Self {
        self.backing = backing;
        self
    }

    #[must_use]
    pub fn with_naming(mut self, kind: BreakpointType, naming: ProviderNaming) -> Self {
        self.naming.insert(kind, naming);
        self
    }

    #[must_use]
    pub fn naming_for(&self, kind: BreakpointType) -> ProviderNaming {
        self.naming.get(&kind).cloned().unwrap_or_default()
    }
}

struct ControllerState {
    locator: SourceLocator,
    providers: ProviderTable,
    registry: Registry,
}

pub struct BreakpointController {
    config: ControllerConfig,
    state: Mutex<ControllerState>,
}

impl BreakpointController {
    /// Controller reading sources from the filesystem
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_locator(config, SourceLocator::default())
    }

    /// Controller reading sources through `loader`
    #[must_use]
    pub fn with_loader(config: ControllerConfig, loader: Box<dyn SourceLoader>) -> Self {
        Self::with_locator(config, SourceLocator::new(loader))
    }

    fn with_locator(config: ControllerConfig, locator: SourceLocator) -> Self {
        let providers = ProviderTable::new(config.backing.clone());
        Self {
            config,
            state: Mutex::new(ControllerState { locator, providers, registry: Registry::new() }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a code unit locatable; returns false if it was already known
    pub fn register_unit(&self, unit: &'static CodeUnit) -> bool {
        self.lock().locator.register(unit)
    }

    /// Register several units, returns how many were new
    pub fn register_units(&self, units: &[&'static CodeUnit]) -> usize {
        let mut state = self.lock();
        units.iter().filter(|&&unit| state.locator.register(unit)).count()
    }

    /// Install a breakpoint of `kind` on the unit enclosing the region
    ///
    /// The breakpoint starts disabled.
    ///
    /// # Errors
    /// `AlreadyInstalled`, `RegionNotFound`, `DuplicateProvider`, `Encoding`
    /// or `UnitOccupied`; nothing is left behind on failure
    pub fn install(
        &self,
        kind: BreakpointType,
        source_file: impl AsRef<Path>,
        start_line: u32,
        end_line: u32,
        trace_id: impl Into<TraceId>,
    ) -> Result<Breakpoint, BreakpointError> {
        let trace_id = trace_id.into();
        let file = source_file.as_ref();
        let mut state = self.lock();

        if state.registry.contains(&trace_id) {
            return Err(BreakpointError::AlreadyInstalled(trace_id));
        }

        let unit = state.locator.locate(file, start_line, end_line)?;
        let behaviour = kind.build(&trace_id, &self.config.naming_for(kind));
        let name = behaviour.probe_name().to_string();
        let provider = state.providers.register(behaviour.provider_name(), &behaviour.probes())?;

        let hook = Arc::new(KindHook::new(behaviour, provider.clone()));
        let wrapped = match weaver::weave(unit, hook, trace_id.as_str()) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                state.providers.release(&provider);
                return Err(e);
            }
        };

        let entry = InstalledBreakpoint {
            trace_id: trace_id.clone(),
            kind,
            region: SourceRegion { file: file.to_path_buf(), start_line, end_line },
            wrapped,
            provider,
            name,
        };
        let snapshot = entry.snapshot();
        if let Err((err, rejected)) = state.registry.insert(entry) {
            let InstalledBreakpoint { wrapped, provider, .. } = *rejected;
            weaver::unweave(wrapped);
            state.providers.release(&provider);
            return Err(err.into());
        }

        info!(
            "Installed {kind} breakpoint {trace_id} on {} ({}), provider {}",
            snapshot.unit, snapshot.region, snapshot.provider_name
        );
        Ok(snapshot)
    }

    /// Start firing probes; enabling an enabled breakpoint is a no-op
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trace id
    pub fn enable(&self, trace_id: impl Into<TraceId>) -> Result<(), BreakpointError> {
        let trace_id = trace_id.into();
        let state = self.lock();
        state.registry.lookup(&trace_id)?.wrapped.enable();
        debug!("Enabled breakpoint {trace_id}");
        Ok(())
    }

    /// Stop firing probes; disabling a disabled breakpoint is a no-op
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trace id
    pub fn disable(&self, trace_id: impl Into<TraceId>) -> Result<(), BreakpointError> {
        let trace_id = trace_id.into();
        let state = self.lock();
        state.registry.lookup(&trace_id)?.wrapped.disable();
        debug!("Disabled breakpoint {trace_id}");
        Ok(())
    }

    /// Restore the original unit and drop the breakpoint's provider reference
    ///
    /// Returns the breakpoint's final snapshot.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown trace id
    pub fn uninstall(&self, trace_id: impl Into<TraceId>) -> Result<Breakpoint, BreakpointError> {
        let trace_id = trace_id.into();
        let mut state = self.lock();
        let entry = state.registry.remove(&trace_id)?;
        let snapshot = Self::teardown(&mut state.providers, entry);
        info!("Uninstalled breakpoint {trace_id} from {}", snapshot.unit);
        Ok(snapshot)
    }

    /// Uninstall every breakpoint, returns how many were removed
    pub fn uninstall_all(&self) -> usize {
        let mut state = self.lock();
        let ControllerState { providers, registry, .. } = &mut *state;
        let entries = registry.drain();
        let count = entries.len();
        for entry in entries {
            Self::teardown(providers, entry);
        }
        if count > 0 {
            info!("Uninstalled {count} breakpoints");
        }
        count
    }

    fn teardown(providers: &mut ProviderTable, entry: InstalledBreakpoint) -> Breakpoint {
        let mut snapshot = entry.snapshot();
        snapshot.state = BreakpointState::Uninstalled;
        let InstalledBreakpoint { wrapped, provider, .. } = entry;
        weaver::unweave(wrapped);
        providers.release(&provider);
        snapshot
    }

    #[must_use]
    pub fn breakpoint(&self, trace_id: impl Into<TraceId>) -> Option<Breakpoint> {
        let trace_id = trace_id.into();
        self.lock().registry.lookup(&trace_id).ok().map(InstalledBreakpoint::snapshot)
    }

    /// Snapshot of every installed breakpoint
    #[must_use]
    pub fn installed_breakpoints(&self) -> HashMap<TraceId, Breakpoint> {
        self.lock().registry.all().into_iter().collect()
    }

    /// Every published probe descriptor
    #[must_use]
    pub fn notes(&self) -> Vec<NoteRecord> {
        self.lock().providers.notes()
    }

    /// Path external tracers attach to for `provider`
    #[must_use]
    pub fn provider_location(&self, provider: &str) -> Option<PathBuf> {
        let state = self.lock();
        state.providers.get(provider).and_then(|p| p.location().map(Path::to_path_buf))
    }
}

impl Drop for BreakpointController {
    fn drop(&mut self) {
        self.uninstall_all();
    }
}

impl std::fmt::Debug for BreakpointController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("BreakpointController")
            .field("config", &self.config)
            .field("units", &state.locator.catalog().len())
            .field("providers", &state.providers.len())
            .field("breakpoints", &state.registry.len())
            .finish()
    }
}

// ── Process-wide controller ────────────────────────────────────────────────

static GLOBAL: OnceLock<BreakpointController> = OnceLock::new();

/// The process-wide controller, created with the default config on first use
pub fn global() -> &'static BreakpointController {
    GLOBAL.get_or_init(|| BreakpointController::new(ControllerConfig::default()))
}

/// Create the process-wide controller with `config`
///
/// Returns false if it already exists; the existing one keeps its config.
pub fn configure_global(config: ControllerConfig) -> bool {
    let mut created = false;
    GLOBAL.get_or_init(|| {
        created = true;
        BreakpointController::new(config)
    });
    created
}

/// Register units with the process-wide controller
pub fn register_units(units: &[&'static CodeUnit]) -> usize {
    global().register_units(units)
}

/// [`BreakpointController::install`] on the process-wide controller
///
/// # Errors
/// See [`BreakpointController::install`]
pub fn install_breakpoint(
    kind: BreakpointType,
    source_file: impl AsRef<Path>,
    start_line: u32,
    end_line: u32,
    trace_id: impl Into<TraceId>,
) -> Result<Breakpoint, BreakpointError> {
    global().install(kind, source_file, start_line, end_line, trace_id)
}

/// # Errors
/// Returns `NotFound` for an unknown trace id
pub fn enable_breakpoint(trace_id: impl Into<TraceId>) -> Result<(), BreakpointError> {
    global().enable(trace_id)
}

/// # Errors
/// Returns `NotFound` for an unknown trace id
pub fn disable_breakpoint(trace_id: impl Into<TraceId>) -> Result<(), BreakpointError> {
    global().disable(trace_id)
}

/// # Errors
/// Returns `NotFound` for an unknown trace id
pub fn uninstall_breakpoint(trace_id: impl Into<TraceId>) -> Result<Breakpoint, BreakpointError> {
    global().uninstall(trace_id)
}

#[must_use]
pub fn installed_breakpoints() -> HashMap<TraceId, Breakpoint> {
    global().installed_breakpoints()
}
