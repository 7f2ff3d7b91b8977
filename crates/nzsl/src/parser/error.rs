//! Parser diagnostics (spec §7 `ParseError`).

use std::ops::Range;

use nzsl_diagnostics_core::SourceCode;
use nzsl_diagnostics_macros::Diagnostic;

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected token, expected {expected}")]
    #[diagnostic(code = "parse::unexpected-token")]
    UnexpectedToken {
        #[source_code]
        source: SourceCode,
        #[label("found here")]
        position: Range<usize>,
        expected: String,
    },

    #[error("expected {expected}, found end of input")]
    #[diagnostic(code = "parse::expected-token")]
    ExpectedToken {
        #[source_code]
        source: SourceCode,
        #[label("expected after this")]
        position: Range<usize>,
        expected: String,
    },

    #[error("a second `module` statement is not allowed")]
    #[diagnostic(code = "parse::duplicate-module", help = "only the first `module;`/`module Name;` starts the root module")]
    DuplicateModule {
        #[source_code]
        source: SourceCode,
        #[label("second module statement")]
        position: Range<usize>,
    },

    #[error("duplicate attribute `{name}`")]
    #[diagnostic(code = "parse::duplicate-attribute")]
    DuplicateAttribute {
        #[source_code]
        source: SourceCode,
        #[label("repeated here")]
        position: Range<usize>,
        name: String,
    },

    #[error("invalid version string `{text}`")]
    #[diagnostic(code = "parse::invalid-version", help = "expected `major.minor.patch`, e.g. \"1.2.0\"")]
    InvalidVersion {
        #[source_code]
        source: SourceCode,
        #[label("not a valid version")]
        position: Range<usize>,
        text: String,
    },

    #[error("source requests nzsl_version {requested} but this compiler supports up to {max}")]
    #[diagnostic(code = "parse::version-too-high")]
    VersionTooHigh {
        #[source_code]
        source: SourceCode,
        #[label("requested here")]
        position: Range<usize>,
        requested: String,
        max: String,
    },

    #[error("unknown attribute `{name}`")]
    #[diagnostic(code = "parse::unknown-attribute")]
    UnknownAttribute {
        #[source_code]
        source: SourceCode,
        #[label("not a recognized attribute")]
        position: Range<usize>,
        name: String,
    },

    #[error("unknown import identifier `{name}`")]
    #[diagnostic(code = "parse::unknown-import-identifier")]
    UnknownImportIdentifier {
        #[source_code]
        source: SourceCode,
        #[label("not exported by the imported module")]
        position: Range<usize>,
        name: String,
    },

    #[error("missing required attribute `{name}`")]
    #[diagnostic(code = "parse::missing-attribute")]
    MissingRequiredAttribute {
        #[source_code]
        source: SourceCode,
        #[label("declaration is missing `[{name}(...)]`")]
        position: Range<usize>,
        name: String,
    },

    #[error("nested `module` declarations are not allowed inside an imported module body")]
    #[diagnostic(code = "parse::nested-module")]
    NestedModule {
        #[source_code]
        source: SourceCode,
        #[label("nested module here")]
        position: Range<usize>,
    },

    #[error("a `module` declaration must carry an `nzsl_version` attribute")]
    #[diagnostic(code = "parse::module-missing-version")]
    ModuleMissingVersion {
        #[source_code]
        source: SourceCode,
        #[label("add `[nzsl_version(\"1.3\")]` before this")]
        position: Range<usize>,
    },
}
