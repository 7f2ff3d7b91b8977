//! C4 — module resolver: loads, parses, and caches imported modules by
//! dotted name; detects import cycles (spec §4.4).
//!
//! The core never touches the filesystem itself (spec §1 "OUT OF SCOPE:
//! ...filesystem module loading"): [`ModuleSource`] is the seam a caller
//! (the `nzslc` CLI, or a test) plugs a concrete loader into, mirroring how
//! the teacher's `process_code`/`process_ast` pipeline takes an already-read
//! [`crate::file::SourceFile`] rather than opening paths itself.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use nzsl_diagnostics_core::SourceCode;
use nzsl_diagnostics_macros::Diagnostic;

use crate::ast::Module;
use crate::error::Error;
use crate::file::SourceFile;
use crate::options::CompilerOptions;

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum ModuleError {
    #[error("module `{name}` could not be found")]
    #[diagnostic(code = "module::not-found")]
    NotFound {
        #[source_code]
        source: SourceCode,
        #[label("imported here")]
        position: Range<usize>,
        name: String,
    },

    #[error("failed to read module `{name}`: {reason}")]
    #[diagnostic(code = "module::io")]
    Io {
        #[source_code]
        source: SourceCode,
        #[label("imported here")]
        position: Range<usize>,
        name: String,
        reason: String,
    },
}

impl From<ModuleError> for Error {
    fn from(e: ModuleError) -> Self {
        Error::Module(e)
    }
}

/// A pluggable loader that turns a dotted module name into source text.
/// `nzslc` implements this over `--module` search directories; tests
/// implement it over an in-memory map.
pub trait ModuleSource {
    /// Returns the path components and raw source text for `dotted_name`.
    fn read(&self, dotted_name: &str) -> Result<(Vec<String>, String), String>;
}

/// An in-memory source map, used by unit/integration tests and as the
/// trivial single-file case (no `--module` search roots configured).
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    pub modules: HashMap<String, String>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dotted_name: impl Into<String>, source: impl Into<String>) -> Self {
        self.modules.insert(dotted_name.into(), source.into());
        self
    }
}

impl ModuleSource for InMemorySource {
    fn read(&self, dotted_name: &str) -> Result<(Vec<String>, String), String> {
        match self.modules.get(dotted_name) {
            Some(text) => Ok((dotted_name.split('.').map(str::to_string).collect(), text.clone())),
            None => Err(format!("no in-memory module named `{dotted_name}`")),
        }
    }
}

/// Owns the by-name module cache and is the sole authority for
/// name → [`Module`] resolution (spec §4.4). Not shared across compiler
/// instances (spec §5).
pub struct ModuleResolver<'a> {
    source: &'a dyn ModuleSource,
    cache: HashMap<String, Arc<Module>>,
    /// DFS "currently resolving" marker used to detect import cycles
    /// (spec §9 "Cyclic module graphs").
    resolving: HashSet<String>,
    pub options: CompilerOptions,
}

impl<'a> ModuleResolver<'a> {
    pub fn new(source: &'a dyn ModuleSource, options: CompilerOptions) -> Self {
        Self { source, cache: HashMap::new(), resolving: HashSet::new(), options }
    }

    /// Resolves `dotted_name` to a fully-resolved (parsed, identifier/type
    /// resolved) module, by shared reference (spec §6.5 "idempotent and
    /// return by-shared-reference").
    pub fn resolve(&mut self, dotted_name: &str, import_position: Range<usize>, importer_source: SourceCode) -> Result<Arc<Module>, Error> {
        if let Some(cached) = self.cache.get(dotted_name) {
            return Ok(cached.clone());
        }

        if self.resolving.contains(dotted_name) {
            return Err(crate::resolve::error::ResolveError::CircularImport {
                source: importer_source,
                position: import_position,
                cycle: dotted_name.to_string(),
            }
            .into());
        }

        let (path, text) = match self.source.read(dotted_name) {
            Ok(v) => v,
            Err(reason) => {
                return Err(ModuleError::Io {
                    source: importer_source,
                    position: import_position,
                    name: dotted_name.to_string(),
                    reason,
                }
                .into());
            }
        };

        self.resolving.insert(dotted_name.to_string());

        let file = SourceFile::new(path, text.clone());
        let tokens = crate::lexer::tokenize(&text, file.clone())?;
        let mut parsed = crate::parser::parse(&tokens, file)?;
        let options = self.options.clone();
        crate::resolve::resolve_module(&mut parsed, self, &options)?;

        self.resolving.remove(dotted_name);

        let arc = Arc::new(parsed);
        self.cache.insert(dotted_name.to_string(), arc.clone());
        Ok(arc)
    }
}
