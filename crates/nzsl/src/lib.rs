//! NZSL — a compiler for a C-family statically-typed shading language.
//!
//! Pipeline (spec §2): source text -> [`lexer`] -> [`parser`] (recursing
//! into [`module`] for imports) -> [`resolve`] -> [`constfold`] ->
//! [`validate`] -> one of [`binary`], [`spirv`], [`printers`].
//!
//! Every stage takes an explicit [`options::CompilerOptions`]; there is no
//! global/static configuration anywhere in this crate (spec §5, SPEC_FULL
//! §1.3).

pub mod ast;
pub mod binary;
pub mod constfold;
pub mod error;
pub mod file;
pub mod lexer;
pub mod map;
pub mod module;
pub mod nom_tools;
pub mod options;
pub mod parser;
pub mod printers;
pub mod resolve;
pub mod spirv;
pub mod transform;
pub mod validate;

pub use error::Error;
pub use options::CompilerOptions;

use std::sync::Arc;

use crate::ast::Module;
use crate::file::SourceFile;
use crate::module::ModuleResolver;

/// Runs the full front-end (C1-C8) over a single source file: tokenize,
/// parse, resolve, fold constants (always: the validator and every backend
/// expect a folded tree; `--optimize` only adds dead-code elimination on
/// top), and validate. Imports are resolved through `module_resolver`.
pub fn compile_module(
    source_text: &str,
    file: SourceFile,
    module_resolver: &mut ModuleResolver,
    options: &CompilerOptions,
) -> Result<Module, Error> {
    let tokens = lexer::tokenize(source_text, file.clone())?;
    let mut module = parser::parse(&tokens, file)?;
    resolve::resolve_module(&mut module, module_resolver, options)?;
    constfold::fold_module(&mut module, options)?;
    validate::validate_module(&module, options)?;
    Ok(module)
}

/// Convenience wrapper for tests and single-file invocations that have no
/// imports to resolve.
pub fn compile_standalone(source_text: &str, file: SourceFile, options: &CompilerOptions) -> Result<Module, Error> {
    let source = module::InMemorySource::new();
    let mut resolver = ModuleResolver::new(&source, options.clone());
    compile_module(source_text, file, &mut resolver, options)
}

pub type SharedModule = Arc<Module>;
