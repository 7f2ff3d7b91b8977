//! Core types and traits shared by the diagnostics derive macro and the
//! compiler's error enums.
//!
//! This crate provides the fundamental types used by the `Diagnostic`
//! procedural macro for error handling and source code representation. It
//! has no dependency on the compiler itself so it can be used from both the
//! macro crate and `nzsl`.

use std::fmt::{Display, Formatter};

pub mod traits;

/// Source code plus the name it should be displayed under in a rendered
/// diagnostic (a file path, or a synthetic name like `<memory>`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceCode {
    /// The actual source code content
    pub source: String,
    /// The name or path of the source file
    pub name: String,
}

impl Display for SourceCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}
