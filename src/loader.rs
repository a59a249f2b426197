//! Module Loader (C6).
//!
//! Resolves paths, parses the main chunk and its included/imported
//! chunks, and maintains the inclusion/import graph, recursively
//! driving the loader for every directly imported module (spec.md
//! §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info_span;

use crate::ast::{ModuleKind, StmtKind};
use crate::source::ParsedChunkSource;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("source '{0}' could not be resolved: {1}")]
    ResolutionFailed(String, String),
    #[error("import cycle detected: {0}")]
    ImportCycle(String),
}

/// Resolves a module source name (a path, URL, or user-hook name) to
/// source text. The concrete mechanism (filesystem, network, registry)
/// is a caller concern; the loader only needs *some* resolver (spec.md
/// §4.6 step 4 "a configured source resolver").
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, source_name: &str) -> Result<String, LoadError>;
}

/// A resolver backed by an in-memory map, used by tests and by callers
/// that have already fetched every source in the graph up front.
#[derive(Default, Clone)]
pub struct MapResolver {
    pub sources: HashMap<String, String>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.sources.insert(name.into(), text.into());
        self
    }
}

impl SourceResolver for MapResolver {
    fn resolve(&self, source_name: &str) -> Result<String, LoadError> {
        self.sources
            .get(source_name)
            .cloned()
            .ok_or_else(|| LoadError::ResolutionFailed(source_name.to_string(), "not found in resolver".into()))
    }
}

/// A chunk pulled in by an `import ./dep.ix` inclusion statement,
/// back-pointing to the statement that named it (spec.md §4.6 step 3
/// "each carries a back-pointer to its including chunk and the
/// statement that imported it").
pub struct IncludedChunk {
    pub source: Arc<ParsedChunkSource>,
    pub includer: String,
}

/// An aggregate holding the parsed main chunk, its inclusion and import
/// graphs, and accumulated parse/resolution errors (spec.md §3
/// "Module").
pub struct Module {
    pub source_name: String,
    pub kind: ModuleKind,
    pub chunk: Arc<ParsedChunkSource>,
    /// Inclusion statement path -> parsed included chunk.
    pub inclusions: HashMap<String, IncludedChunk>,
    /// Directly imported module source name (stringified) -> loaded
    /// module, keyed the way spec.md §4.6 step 4 describes ("stored
    /// under the stringified form of its source").
    pub imports: HashMap<String, Arc<Module>>,
    /// Non-fatal: an inclusion or import whose source could not be
    /// resolved. Surfaced but does not stop the rest of the graph from
    /// loading (spec.md §4.6 step 5 "surfaced but do not stop
    /// loading").
    pub load_errors: Vec<LoadError>,
}

impl Module {
    /// All parse errors across the main chunk and every included chunk,
    /// in the load order they were discovered.
    pub fn all_parse_errors(&self) -> Vec<(&str, &crate::parser::ParseError)> {
        let mut out: Vec<(&str, &crate::parser::ParseError)> =
            self.chunk.parse_errors.iter().map(|e| (self.source_name.as_str(), e)).collect();
        for included in self.inclusions.values() {
            out.extend(included.source.parse_errors.iter().map(|e| (included.source.name.as_str(), e)));
        }
        out
    }
}

/// Source names that are textually different but name the same module
/// (`a.ix` and `./a.ix`) must dedup and cycle-check to the same key
/// (spec.md §4.6 "The loader deduplicates").
fn normalize_source_name(name: &str) -> String {
    name.strip_prefix("./").unwrap_or(name).to_string()
}

/// Drives C6: parses a chunk, walks its top-level inclusion/import
/// statements, and recurses. Deduplicates across the load graph so a
/// path loaded twice yields the same [`Module`] (spec.md §4.6 "The
/// loader deduplicates").
pub struct ModuleLoader<'a> {
    resolver: &'a dyn SourceResolver,
    loaded: HashMap<String, Arc<Module>>,
    /// Module-import edges on the current call stack, keyed by
    /// normalized source name, to detect cycles (spec.md §4.6 "A cycle
    /// across module-import edges must be reported as a load error";
    /// inclusion edges form a tree by construction and need no such
    /// check).
    in_progress: Vec<String>,
    /// Cycle errors waiting to be folded into an ancestor frame's own
    /// `load_errors` once it finishes building its `Module`. The frame
    /// that directly issues the back-edge call already receives the
    /// error through its own `Err(e) => load_errors.push(e)` match arm;
    /// this side table is only for the *other* frames on the cycle
    /// (spec.md §4.6 "A cycle ... must be reported as a load error" —
    /// reported on every module on the cycle's path, not only the one
    /// whose import statement closes the loop).
    pending_cycle_errors: HashMap<String, Vec<LoadError>>,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(resolver: &'a dyn SourceResolver) -> Self {
        Self { resolver, loaded: HashMap::new(), in_progress: Vec::new(), pending_cycle_errors: HashMap::new() }
    }

    /// Load the top-level module at `source_name` (spec.md §4.6).
    pub fn load(&mut self, source_name: &str) -> Result<Arc<Module>, LoadError> {
        self.load_as(source_name, ModuleKind::TopLevel)
    }

    fn load_as(&mut self, source_name: &str, kind: ModuleKind) -> Result<Arc<Module>, LoadError> {
        let key = normalize_source_name(source_name);
        if let Some(existing) = self.loaded.get(&key) {
            return Ok(existing.clone());
        }
        if let Some(pos) = self.in_progress.iter().position(|p| *p == key) {
            let err = LoadError::ImportCycle(source_name.to_string());
            // Every ancestor strictly between the repeated module and the
            // frame making this call also sits on the cycle; the calling
            // frame itself (`in_progress`'s last entry) gets the error
            // through the normal `Err` return below, so it is excluded
            // here to avoid double-recording it.
            let last = self.in_progress.len() - 1;
            for frame in &self.in_progress[pos..last] {
                self.pending_cycle_errors.entry(frame.clone()).or_default().push(err.clone());
            }
            return Err(err);
        }
        let _span = info_span!("load_module", path = source_name).entered();
        self.in_progress.push(key.clone());

        let text = match self.resolver.resolve(source_name) {
            Ok(text) => text,
            Err(e) => {
                self.in_progress.pop();
                return Err(e);
            }
        };
        let chunk = Arc::new(ParsedChunkSource::new(source_name, text));

        let mut inclusions = HashMap::new();
        let mut imports = HashMap::new();
        let mut load_errors = Vec::new();

        for stmt in &chunk.chunk.statements {
            match &stmt.kind {
                StmtKind::InclusionImportStatement { path } => match self.resolver.resolve(path) {
                    Ok(text) => {
                        let included = Arc::new(ParsedChunkSource::new(path.clone(), text));
                        inclusions.insert(path.clone(), IncludedChunk { source: included, includer: source_name.to_string() });
                    }
                    Err(e) => load_errors.push(e),
                },
                StmtKind::ImportStatement { source, .. } => match self.load_as(source, ModuleKind::TopLevel) {
                    Ok(imported) => {
                        imports.insert(source.clone(), imported);
                    }
                    Err(e) => load_errors.push(e),
                },
                _ => {}
            }
        }

        self.in_progress.pop();
        if let Some(mut extra) = self.pending_cycle_errors.remove(&key) {
            load_errors.append(&mut extra);
        }
        let module = Arc::new(Module { source_name: source_name.to_string(), kind, chunk, inclusions, imports, load_errors });
        self.loaded.insert(key, module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_inclusion_and_import_graph() {
        let resolver = MapResolver::new()
            .with("main.ix", "manifest {}\nimport ./inc.ix\nimport dep ./dep.ix {}\n")
            .with("./inc.ix", "%p = /tmp/...\n")
            .with("./dep.ix", "manifest {}\nx = 1\n");
        let mut loader = ModuleLoader::new(&resolver);
        let module = loader.load("main.ix").unwrap();
        assert!(module.inclusions.contains_key("./inc.ix"));
        assert!(module.imports.contains_key("./dep.ix"));
        assert!(module.load_errors.is_empty());
    }

    #[test]
    fn same_path_loaded_twice_yields_same_module() {
        let resolver = MapResolver::new().with("./shared.ix", "manifest {}\n");
        let mut loader = ModuleLoader::new(&resolver);
        let first = loader.load("./shared.ix").unwrap();
        let second = loader.load("./shared.ix").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unresolved_inclusion_is_non_fatal() {
        let resolver = MapResolver::new().with("main.ix", "import ./missing.ix\n");
        let mut loader = ModuleLoader::new(&resolver);
        let module = loader.load("main.ix").unwrap();
        assert_eq!(module.load_errors.len(), 1);
    }

    #[test]
    fn import_cycle_is_reported() {
        let resolver = MapResolver::new()
            .with("a.ix", "import b ./b.ix {}\n")
            .with("./b.ix", "import a ./a.ix {}\n");
        let mut loader = ModuleLoader::new(&resolver);
        let module = loader.load("a.ix").unwrap();
        assert!(module.load_errors.iter().any(|e| matches!(e, LoadError::ImportCycle(_))));
    }
}
