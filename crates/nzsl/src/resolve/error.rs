//! Resolver diagnostics (spec §7 `ResolveError`, §4.4 `CircularImport`).

use std::ops::Range;

use nzsl_diagnostics_core::SourceCode;
use nzsl_diagnostics_macros::Diagnostic;

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum ResolveError {
    #[error("undeclared identifier `{name}`")]
    #[diagnostic(code = "resolve::undeclared-identifier")]
    UndeclaredIdentifier {
        #[source_code]
        source: SourceCode,
        #[label("not found in this scope")]
        position: Range<usize>,
        name: String,
    },

    #[error("`{name}` is already declared in this scope")]
    #[diagnostic(code = "resolve::duplicate-declaration")]
    DuplicateDeclaration {
        #[source_code]
        source: SourceCode,
        #[label("redeclared here")]
        position: Range<usize>,
        name: String,
    },

    #[error("type mismatch: expected {expected}, found {found}")]
    #[diagnostic(code = "resolve::type-mismatch")]
    TypeMismatch {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        expected: String,
        found: String,
    },

    #[error("invalid assignment target")]
    #[diagnostic(code = "resolve::invalid-lvalue", help = "assignment targets must be a variable, field access, or index expression")]
    InvalidLvalue {
        #[source_code]
        source: SourceCode,
        #[label("not an lvalue")]
        position: Range<usize>,
    },

    #[error("no field `{field}` on this type")]
    #[diagnostic(code = "resolve::unknown-field")]
    UnknownField {
        #[source_code]
        source: SourceCode,
        #[label("unknown field")]
        position: Range<usize>,
        field: String,
    },

    #[error("cannot cast to `{target}`: {reason}")]
    #[diagnostic(code = "resolve::invalid-cast")]
    InvalidCast {
        #[source_code]
        source: SourceCode,
        #[label("invalid cast")]
        position: Range<usize>,
        target: String,
        reason: String,
    },

    #[error("unsupported operands for `{op}`: {left} and {right}")]
    #[diagnostic(code = "resolve::unsupported-operands")]
    UnsupportedOperands {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        op: String,
        left: String,
        right: String,
    },

    #[error("`{name}` recursively calls itself")]
    #[diagnostic(code = "resolve::forbidden-recursion")]
    ForbiddenRecursion {
        #[source_code]
        source: SourceCode,
        #[label("in this call chain")]
        position: Range<usize>,
        name: String,
    },

    #[error("option hash collision: `{a}` and `{b}` hash to the same value")]
    #[diagnostic(code = "resolve::option-hash-collision")]
    OptionHashCollision {
        #[source_code]
        source: SourceCode,
        #[label("colliding option")]
        position: Range<usize>,
        a: String,
        b: String,
    },

    #[error("import cycle detected: {cycle}")]
    #[diagnostic(code = "resolve::circular-import")]
    CircularImport {
        #[source_code]
        source: SourceCode,
        #[label("import introduces a cycle here")]
        position: Range<usize>,
        cycle: String,
    },

    #[error("module `{name}` could not be resolved")]
    #[diagnostic(code = "resolve::module-not-found")]
    ModuleNotFound {
        #[source_code]
        source: SourceCode,
        #[label("imported here")]
        position: Range<usize>,
        name: String,
    },

    #[error("unknown type `{text}`")]
    #[diagnostic(code = "resolve::unknown-type")]
    UnknownType {
        #[source_code]
        source: SourceCode,
        #[label("cannot resolve this as a type")]
        position: Range<usize>,
        text: String,
    },

    #[error("wrong number of arguments: expected {expected}, found {found}")]
    #[diagnostic(code = "resolve::arity-mismatch")]
    ArityMismatch {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        expected: usize,
        found: usize,
    },

    #[error("`{name}` is not callable")]
    #[diagnostic(code = "resolve::not-callable")]
    NotCallable {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        name: String,
    },

    #[error("parameter `{param}` has semantic `{expected}` but argument is not a valid `{expected}` value")]
    #[diagnostic(code = "resolve::semantic-mismatch")]
    SemanticMismatch {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        param: String,
        expected: String,
    },
}
