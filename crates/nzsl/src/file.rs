//! Source file representation shared by every compiler stage.
//!
//! A [`SourceFile`] is the unit the lexer, parser, resolver and diagnostics
//! renderer all refer to by identity: module imports dedupe against it,
//! error reports borrow its text for the labeled snippet.

use std::{error::Error, path::PathBuf, sync::Arc};

use nzsl_diagnostics_core::SourceCode;

/// A source file loaded from disk (or constructed in memory for tests),
/// identified by its dotted module path (`a.b.c` -> `["a", "b", "c"]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    /// Dotted module path components, e.g. `["Simple", "Module"]`.
    pub path: Arc<Vec<String>>,
    /// Full source text.
    pub code: Arc<String>,
}

impl SourceFile {
    pub fn new(path: Vec<String>, code: String) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
        }
    }

    pub fn path(&self) -> &Vec<String> {
        &self.path
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Dotted name used as the module resolver cache key (`Simple.Module`).
    pub fn dotted_name(&self) -> String {
        self.path.join(".")
    }
}

impl Error for SourceFile {}

impl std::fmt::Display for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dotted_name())
    }
}

impl From<SourceFile> for SourceCode {
    fn from(file: SourceFile) -> Self {
        (&file).into()
    }
}

impl From<&SourceFile> for SourceCode {
    fn from(file: &SourceFile) -> Self {
        let path = PathBuf::from_iter(file.path.iter());
        SourceCode {
            source: file.code.to_string(),
            name: path.to_string_lossy().to_string(),
        }
    }
}
