//! Registered code units
//!
//! Units are `static`s scattered across the program; a program makes them
//! addressable by registering them here, once, at startup.

use std::path::{Component, Path, PathBuf};

use crate::weaver::CodeUnit;

#[derive(Debug, Default)]
pub struct UnitCatalog {
    units: Vec<&'static CodeUnit>,
}

impl UnitCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit, returns false if it was already known
    pub fn register(&mut self, unit: &'static CodeUnit) -> bool {
        if self.units.iter().any(|known| std::ptr::eq(*known, unit)) {
            return false;
        }
        self.units.push(unit);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units named `name` declared in `file`
    pub fn candidates<'a>(
        &'a self,
        file: &'a Path,
        name: &'a str,
    ) -> impl Iterator<Item = &'static CodeUnit> + 'a {
        self.units
            .iter()
            .copied()
            .filter(move |unit| unit.name() == name && same_source(file, Path::new(unit.file())))
    }
}

/// Whether two paths name the same source file
///
/// `file!()` paths are relative to the workspace root while operators pass
/// absolute paths, so a component-wise suffix match is accepted either way.
pub(crate) fn same_source(requested: &Path, declared: &Path) -> bool {
    let requested = normalize(requested);
    let declared = normalize(declared);
    requested == declared || requested.ends_with(&declared) || declared.ends_with(&requested)
}

fn normalize(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}
