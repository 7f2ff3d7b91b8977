//! Procedural macros for the NZSL compiler's diagnostics.
//!
//! This crate provides the `Diagnostic` derive macro that implements
//! `nzsl_diagnostics_core::traits::DiagnosticReport` for the compiler's error
//! families (`LexError`, `ParseError`, `ResolveError`, `ConstError`,
//! `ValidationError`, `BackendError`, `ModuleError`) with rich source
//! locations, labels, help text, and error chaining, without hand-writing the
//! same boilerplate match expression seven times.

use proc_macro::TokenStream;
use crate::error::diagnostic_report;
mod error;

/// Derive macro implementing `DiagnosticReport` on error structs and enums.
///
/// # Attributes
/// - `source_code` - Marks a field containing source code information
/// - `label` - Marks a field that provides an error label for a span
/// - `help` - Marks a field containing help text for the error
/// - `diagnostic` - Configures an error code / default help / transparency
/// - `errors` - Marks a field containing nested errors
/// - `reference` - Marks a field containing a reference to a related error
#[proc_macro_derive(Diagnostic, attributes(source_code, label, help, diagnostic, errors, reference))]
pub fn derive_diagnostic(input: TokenStream) -> TokenStream {
    diagnostic_report(input)
}
