//! Probe providers and the process-wide provider table

#![allow(unsafe_code)] // probe stubs are called through raw function pointers

use log::{debug, info};
use prodbp_common::MAX_PROBE_ARGS;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use super::encoder::{build_image, NoteRecord, ProbeSpec};
use super::loader::{publish, ImageBacking, PublishedImage};
use super::reader::read_stapsdt_notes;
use crate::domain::BreakpointError;

/// Signature of a probe stub: every argument travels in a u64 register
type ProbeFn = unsafe extern "C" fn(u64, u64, u64, u64, u64, u64);

/// A named group of probes backed by one published ELF image
pub struct Provider {
    name: String,
    probes: Vec<ProbeSpec>,
    image: Vec<u8>,
    notes: Vec<NoteRecord>,
    entries: Vec<Option<ProbeFn>>,
    // Owns the executable mapping `entries` point into
    published: PublishedImage,
}

impl Provider {
    /// Build, verify and publish the image for `name`
    ///
    /// # Errors
    /// Returns `Encoding` if the names or probe set cannot be encoded, or the
    /// built image does not read back as the requested probes
    pub fn new(name: &str, probes: &[ProbeSpec], backing: &ImageBacking) -> Result<Self, BreakpointError> {
        let image = build_image(name, probes)?;
        let notes = read_stapsdt_notes(&image.bytes)
            .map_err(|e| BreakpointError::Encoding(format!("provider {name}: {e}")))?;
        if notes.len() != probes.len() {
            return Err(BreakpointError::Encoding(format!(
                "provider {name}: image carries {} notes for {} probes",
                notes.len(),
                probes.len()
            )));
        }

        let published = publish(name, &image.bytes, backing);
        let entries = image
            .stub_offsets
            .iter()
            .map(|&offset| {
                let mapping = published.mapping()?;
                let offset = usize::try_from(offset).ok().filter(|o| *o < mapping.len())?;
                // SAFETY: the offset lies inside the R+X mapping and points at a
                // `ret`-terminated stub that follows the C calling convention.
                Some(unsafe { std::mem::transmute::<*const u8, ProbeFn>(mapping.base().add(offset)) })
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            probes: probes.to_vec(),
            image: image.bytes,
            notes,
            entries,
            published,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn probes(&self) -> &[ProbeSpec] {
        &self.probes
    }

    /// Descriptors embedded in the image
    #[must_use]
    pub fn notes(&self) -> &[NoteRecord] {
        &self.notes
    }

    /// Raw ELF image bytes
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Path external tracers attach to, if the image was published
    #[must_use]
    pub fn location(&self) -> Option<&Path> {
        self.published.path()
    }

    /// Whether firing actually reaches executable probe sites
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.published.mapping().is_some()
    }

    /// Index of the probe called `name`
    #[must_use]
    pub fn probe_index(&self, name: &str) -> Option<usize> {
        self.probes.iter().position(|p| p.name == name)
    }

    /// Fire probe `index` with `args`
    ///
    /// Missing arguments are passed as zero, extra ones are dropped. A no-op
    /// when the provider is not live; never allocates.
    #[inline]
    pub fn fire(&self, index: usize, args: &[u64]) {
        let Some(Some(entry)) = self.entries.get(index) else {
            return;
        };
        let mut regs = [0u64; MAX_PROBE_ARGS];
        for (reg, arg) in regs.iter_mut().zip(args) {
            *reg = *arg;
        }
        // SAFETY: entry points into a mapping owned by self, so it stays
        // executable for the duration of the call; the stub only returns.
        unsafe { entry(regs[0], regs[1], regs[2], regs[3], regs[4], regs[5]) }
    }

    fn same_probes(&self, probes: &[ProbeSpec]) -> bool {
        self.probes == probes
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("probes", &self.probes)
            .field("location", &self.location())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

/// Shared reference to a registered provider
///
/// The image stays mapped until the last handle drops, so calls still
/// running inside a probe after uninstall remain safe.
#[derive(Debug, Clone)]
pub struct ProviderHandle(Arc<Provider>);

impl ProviderHandle {
    #[must_use]
    pub fn ptr_eq(&self, other: &ProviderHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ProviderHandle {
    type Target = Provider;

    fn deref(&self) -> &Provider {
        &self.0
    }
}

struct Registered {
    handle: ProviderHandle,
    users: usize,
}

/// Reference-counted providers keyed by name
pub struct ProviderTable {
    backing: ImageBacking,
    providers: HashMap<String, Registered>,
}

impl ProviderTable {
    #[must_use]
    pub fn new(backing: ImageBacking) -> Self {
        Self { backing, providers: HashMap::new() }
    }

    /// Register a provider, or take another reference to an identical one
    ///
    /// # Errors
    /// Returns `DuplicateProvider` if `name` is registered with a different
    /// probe set, or `Encoding` if the provider cannot be built
    pub fn register(&mut self, name: &str, probes: &[ProbeSpec]) -> Result<ProviderHandle, BreakpointError> {
        if let Some(registered) = self.providers.get_mut(name) {
            if !registered.handle.same_probes(probes) {
                return Err(BreakpointError::DuplicateProvider { provider: name.to_string() });
            }
            registered.users += 1;
            debug!("Provider {name} now has {} users", registered.users);
            return Ok(registered.handle.clone());
        }

        let provider = Provider::new(name, probes, &self.backing)?;
        match provider.location() {
            Some(path) => info!("Registered provider {name} at {}", path.display()),
            None => info!("Registered provider {name} (not published)"),
        }
        let handle = ProviderHandle(Arc::new(provider));
        self.providers.insert(name.to_string(), Registered { handle: handle.clone(), users: 1 });
        Ok(handle)
    }

    /// Drop one reference; returns true when the provider was removed
    pub fn release(&mut self, handle: &ProviderHandle) -> bool {
        let name = handle.name();
        let Some(registered) = self.providers.get_mut(name) else {
            return false;
        };
        if !registered.handle.ptr_eq(handle) {
            return false;
        }
        registered.users -= 1;
        if registered.users > 0 {
            return false;
        }
        self.providers.remove(name);
        info!("Unregistered provider {name}");
        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderHandle> {
        self.providers.get(name).map(|r| &r.handle)
    }

    /// Number of breakpoints sharing `name`
    #[must_use]
    pub fn users(&self, name: &str) -> usize {
        self.providers.get(name).map_or(0, |r| r.users)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All published descriptors, ordered by provider then probe
    #[must_use]
    pub fn notes(&self) -> Vec<NoteRecord> {
        let mut notes: Vec<NoteRecord> =
            self.providers.values().flat_map(|r| r.handle.notes().iter().cloned()).collect();
        notes.sort_by(|a, b| (&a.provider, &a.name).cmp(&(&b.provider, &b.name)));
        notes
    }
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::new(ImageBacking::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probes() -> Vec<ProbeSpec> {
        vec![ProbeSpec::new("latency", 2)]
    }

    #[test]
    fn test_identical_registration_is_shared() {
        let mut table = ProviderTable::new(ImageBacking::InMemory);
        let first = table.register("orders", &probes()).unwrap();
        let second = table.register("orders", &probes()).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(table.users("orders"), 2);

        assert!(!table.release(&first));
        assert!(table.get("orders").is_some());
        assert!(table.release(&second));
        assert!(table.get("orders").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_conflicting_probe_set_is_rejected() {
        let mut table = ProviderTable::new(ImageBacking::InMemory);
        let _held = table.register("orders", &probes()).unwrap();
        let err = table.register("orders", &[ProbeSpec::new("latency", 3)]).unwrap_err();
        assert!(matches!(err, BreakpointError::DuplicateProvider { provider } if provider == "orders"));
        assert_eq!(table.users("orders"), 1);
    }

    #[test]
    fn test_notes_are_listed_per_provider() {
        let mut table = ProviderTable::new(ImageBacking::InMemory);
        table.register("zeta", &probes()).unwrap();
        table.register("alpha", &[ProbeSpec::new("panic", 2), ProbeSpec::new("latency", 2)]).unwrap();
        let listed: Vec<_> =
            table.notes().into_iter().map(|n| format!("{}:{}", n.provider, n.name)).collect();
        assert_eq!(listed, ["alpha:latency", "alpha:panic", "zeta:latency"]);
    }

    #[test]
    fn test_in_memory_provider_fires_as_noop() {
        let provider = Provider::new("inert", &probes(), &ImageBacking::InMemory).unwrap();
        assert!(!provider.is_live());
        assert!(provider.location().is_none());
        provider.fire(0, &[1, 2]);
        provider.fire(7, &[]);
        assert_eq!(provider.probe_index("latency"), Some(0));
        assert_eq!(provider.probe_index("missing"), None);
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn test_published_provider_fires_stub() {
        let provider = Provider::new("live_fire", &probes(), &ImageBacking::Memfd).unwrap();
        // Executable memfd mappings can be forbidden by the host.
        if provider.is_live() {
            for i in 0..1000 {
                provider.fire(0, &[i, i * 2]);
            }
        }
        assert_eq!(provider.notes()[0].provider, "live_fire");
    }

    #[test]
    fn test_invalid_names_fail_encoding() {
        let mut table = ProviderTable::new(ImageBacking::InMemory);
        let err = table.register("bad-name", &probes()).unwrap_err();
        assert!(matches!(err, BreakpointError::Encoding(_)));
        assert!(table.is_empty());
    }
}
