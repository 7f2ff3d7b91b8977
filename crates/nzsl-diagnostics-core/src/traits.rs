//! Traits and supporting types for rich compiler diagnostics.
//!
//! These types let an error enum describe, on demand, the labeled source
//! spans, nested errors, references, help text and error code that a
//! renderer needs without the renderer knowing anything about the concrete
//! error type.

use std::{fmt::{Debug, Display}, ops::Range};

/// A labeled field with a source position, used for `#[label]` attributes
/// that are plain struct fields rather than format strings.
#[derive(Clone, Debug)]
pub struct LabelField {
    /// The source position range where this label applies
    pub position: Range<usize>,
    /// The descriptive label text
    pub label: String,
}

/// A labeled span combining a descriptive label with a source range.
#[derive(Clone, Debug)]
pub struct LabeledSpan {
    /// The descriptive label text
    pub label: String,
    /// The source position range where this label applies
    pub span: Range<usize>,
}

impl LabeledSpan {
    /// Creates a new labeled span with the given label and source range
    pub fn new(label: String, span: Range<usize>) -> Self {
        Self { label, span }
    }
}

/// Core trait implemented (via the `Diagnostic` derive macro) by every error
/// type in the compiler's error families so that a single renderer
/// (`nzsl::error::report`) can walk any of them uniformly.
pub trait DiagnosticReport: Display {
    /// Labeled fields that highlight specific parts of the source code
    fn labels(&self) -> Option<Vec<LabelField>>;

    /// Nested errors contained within this error (e.g. an error collection)
    fn errors<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn DiagnosticReport> + 'a>>;

    /// References to other related errors (e.g. the first definition site of
    /// a name that was redefined)
    fn references(&self) -> Option<Vec<Box<&dyn DiagnosticReport>>>;

    /// The source code this error's positions are relative to
    fn source_code(&self) -> Option<Box<crate::SourceCode>> { None }

    /// A short machine-readable error code (e.g. `resolve::undeclared-identifier`)
    fn error_code(&self) -> Option<Box<dyn Display>> { None }

    /// Help text suggesting how to resolve the error
    fn help(&self) -> Option<Box<dyn Display>> { None }
}
