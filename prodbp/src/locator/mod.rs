//! # Source Locator
//!
//! Resolves a source region `(file, start_line, end_line)` to the smallest
//! instrumentable code unit whose `fn` item spans it.
//!
//! ## Resolution Flow
//!
//! ```text
//! 1. Load the file through the SourceLoader (cached per path)
//! 2. Validate the range: 1 <= start <= end <= line count
//! 3. Scan fn spans enclosing the range, innermost first
//! 4. Match each span's name against registered CodeUnits declared in
//!    the same file (file!() suffix match); the first span with exactly
//!    one owner wins, several possible owners is an error
//! ```
//!
//! Reading the source is the only side effect; the target code is not touched.

pub mod catalog;
pub mod source_index;

pub use catalog::UnitCatalog;
pub use source_index::{SourceIndex, UnitSpan};

use log::debug;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::domain::BreakpointError;
use crate::weaver::CodeUnit;

/// Capability to load source text for a path
pub trait SourceLoader: Send + Sync {
    /// # Errors
    /// Returns an error if the source cannot be read
    fn load(&self, path: &Path) -> io::Result<String>;
}

/// Loads sources from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSourceLoader;

impl SourceLoader for FsSourceLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

pub struct SourceLocator {
    loader: Box<dyn SourceLoader>,
    catalog: UnitCatalog,
    indexes: HashMap<PathBuf, SourceIndex>,
}

impl SourceLocator {
    #[must_use]
    pub fn new(loader: Box<dyn SourceLoader>) -> Self {
        Self { loader, catalog: UnitCatalog::new(), indexes: HashMap::new() }
    }

    pub fn register(&mut self, unit: &'static CodeUnit) -> bool {
        self.catalog.register(unit)
    }

    #[must_use]
    pub fn catalog(&self) -> &UnitCatalog {
        &self.catalog
    }

    /// Scanned index for `file`, loading it on first use
    ///
    /// # Errors
    /// Returns an error if the loader cannot read the file
    pub fn index(&mut self, file: &Path) -> io::Result<&SourceIndex> {
        load_index(&mut self.indexes, self.loader.as_ref(), file)
    }

    /// Resolve a region to its code unit
    ///
    /// Enclosing `fn` spans are tried innermost first; the first one backed
    /// by a registered unit wins.
    ///
    /// # Errors
    /// Returns `RegionNotFound` if the file cannot be loaded, the range is
    /// invalid or out of bounds, no registered unit encloses it, or several
    /// registered units could own the enclosing span
    pub fn locate(
        &mut self,
        file: &Path,
        start_line: u32,
        end_line: u32,
    ) -> Result<&'static CodeUnit, BreakpointError> {
        let not_found = |reason: String| BreakpointError::region(file, start_line, end_line, reason);

        if start_line == 0 || start_line > end_line {
            return Err(not_found("invalid line range".to_string()));
        }

        let Self { loader, catalog, indexes } = self;
        let index = load_index(indexes, loader.as_ref(), file)
            .map_err(|e| not_found(format!("cannot load source: {e}")))?;

        if end_line > index.line_count() {
            return Err(not_found(format!("file has only {} lines", index.line_count())));
        }

        let spans = index.enclosing_spans(start_line, end_line);
        for span in &spans {
            if let Some(unit) = owner_of(catalog, index, file, span).map_err(not_found)? {
                debug!("Region {start_line}-{end_line} resolved to {}", unit.qualified_name());
                return Ok(unit);
            }
        }

        Err(not_found(match spans.first() {
            Some(span) => format!(
                "function `{}` (lines {}-{}) is not a registered code unit",
                span.name, span.start_line, span.end_line
            ),
            None => "no enclosing function".to_string(),
        }))
    }
}

fn load_index<'a>(
    indexes: &'a mut HashMap<PathBuf, SourceIndex>,
    loader: &dyn SourceLoader,
    file: &Path,
) -> io::Result<&'a SourceIndex> {
    if !indexes.contains_key(file) {
        let source = loader.load(file)?;
        let index = SourceIndex::parse(&source);
        debug!("Indexed {}: {} functions", file.display(), index.units().len());
        indexes.insert(file.to_path_buf(), index);
    }
    Ok(&indexes[file])
}

/// Registered unit behind `span`, if any
///
/// Same-named units in one file are told apart by where they are declared:
/// a unit declared inside `span` belongs to it, one declared inside another
/// function of the same name does not. Anything still ambiguous is an error.
fn owner_of(
    catalog: &UnitCatalog,
    index: &SourceIndex,
    file: &Path,
    span: &UnitSpan,
) -> Result<Option<&'static CodeUnit>, String> {
    let declared_in = |unit: &CodeUnit, within: &UnitSpan| within.encloses(unit.line(), unit.line());

    let candidates: Vec<_> = catalog.candidates(file, &span.name).collect();
    let inside: Vec<_> = candidates.iter().copied().filter(|unit| declared_in(*unit, span)).collect();
    let owners = if inside.is_empty() {
        let namesakes: Vec<_> =
            index.units().iter().filter(|other| *other != span && other.name == span.name).collect();
        candidates
            .into_iter()
            .filter(|unit| !namesakes.iter().any(|other| declared_in(*unit, *other)))
            .collect()
    } else {
        inside
    };

    match owners.as_slice() {
        [] => Ok(None),
        [unit] => Ok(Some(*unit)),
        _ => Err(format!(
            "ambiguous unit `{}`: {} registered units could own lines {}-{}",
            span.name,
            owners.len(),
            span.start_line,
            span.end_line
        )),
    }
}

impl Default for SourceLocator {
    fn default() -> Self {
        Self::new(Box::new(FsSourceLoader))
    }
}
