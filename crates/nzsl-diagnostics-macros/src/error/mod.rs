//! Procedural macro implementation for generating `DiagnosticReport` impls.
//!
//! This module provides the core logic for the `#[derive(Diagnostic)]` macro.
//! The macro supports rich error reporting with source code locations,
//! labels, help text, and error chaining.
//!
//! # Supported Attributes
//!
//! ## Field Attributes
//! - `#[source_code]` - Marks a field as containing source code information
//! - `#[label("message")]` - Creates a labeled span with the given message
//! - `#[help]` - Marks a field as containing help text for the error
//! - `#[errors]` - Marks a field containing nested errors
//! - `#[reference]` - Marks a field containing an error reference
//!
//! ## Type Attributes
//! - `#[diagnostic(code = "E001")]` - Sets an error code for the error type
//! - `#[diagnostic(help = "Try this...")]` - Sets default help text
//! - `#[diagnostic(transparent)]` - Delegates to the wrapped error
//!
//! # Label Format Strings
//!
//! ```ignore
//! #[label("Expected {expected}, found {actual}")]
//! struct TypeError {
//!     #[source_code] source: SourceCode,
//!     position: Range<usize>,
//!     expected: String,
//!     actual: String,
//! }
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, DataEnum, DataStruct, DeriveInput, Field, Fields, FieldsNamed, Ident, Variant};

/// Attribute parser for `#[label("message")]` annotations
#[derive(deluxe::ExtractAttributes)]
#[deluxe(attributes(label))]
struct Label(String);

/// Attribute parser for `#[diagnostic(...)]` annotations
#[derive(deluxe::ExtractAttributes, deluxe::ParseMetaItem)]
#[deluxe(attributes(diagnostic))]
#[derive(Debug)]
struct Diagnostic {
    #[deluxe(default)]
    code: Option<String>,

    #[deluxe(default)]
    help: Option<String>,

    #[deluxe(default)]
    transparent: bool,
}

/// Finds the field marked with `#[source_code]`
fn get_source_code(fields: &mut FieldsNamed) -> Option<syn::Member> {
    for (i, field) in fields.named.iter_mut().enumerate() {
        if field.attrs.iter().any(|attr| attr.path().is_ident("source_code")) {
            let member = match field.ident.clone() {
                Some(ident) => syn::Member::Named(ident),
                None => syn::Member::Unnamed(syn::Index {
                    index: i as u32,
                    span: field.span()
                })
            };

            return Some(member);
        }
    }

    None
}

/// Finds the field marked with `#[help]` and generates the accessor code
fn get_help(fields: &mut FieldsNamed) -> Option<proc_macro2::TokenStream> {
    for field in fields.named.iter_mut() {
        if field.attrs.iter().any(|attr| attr.path().is_ident("help")) {
            let name = &field.ident;
            return Some(quote! { Some(Box::new(self.#name.clone())) });
        }
    }

    None
}

/// Processes `#[label("...")]` fields, expanding `{field}` interpolation
fn get_labels(fields: &mut FieldsNamed) -> Vec<(Field, proc_macro2::TokenStream)> {
    let mut field_values = Vec::new();
    for field in fields.named.iter_mut() {
        if let Ok(Label(message)) = deluxe::extract_attributes(field) {

            match message.contains('{') {
                true => {
                    let mut fields = Vec::new();
                    let mut out = String::new();
                    let mut read = message.as_str();

                    while let Some(start_index) = read.find('{') {
                        if let Some(end_index) = read.find('}') {
                            out.push_str(&read[0..start_index]);

                            out.push('{');
                            out.push('}');

                            let field_name = &read[start_index+1..end_index];
                            let field_name = format_ident!("{}", field_name);
                            fields.push(quote! { self.#field_name.to_string() });

                            read = &read[end_index+1..];
                        } else {
                            panic!("Invalid fmt syntax");
                        }
                    }

                    out.push_str(read);

                    let name = &field.ident;
                    field_values.push((field.clone(), quote! {
                        nzsl_diagnostics_core::traits::LabelField {
                            label: {
                                use std::fmt::Write;
                                let mut s = String::new();
                                write!(&mut s, #out, #(#fields),*).unwrap();
                                s
                            },
                            position: self.#name.clone(),
                        }
                    }));

                },
                false => {
                    let name = &field.ident;
                    field_values.push((field.clone(), quote! {
                        nzsl_diagnostics_core::traits::LabelField {
                            label: #message.to_string(),
                            position: self.#name.clone(),
                        }
                    }));
                }
            };
        }
    }

    field_values
}

/// Finds fields marked `#[reference]` and generates the boxed trait-object code
fn get_references(fields: &mut FieldsNamed) -> Vec<(Field, proc_macro2::TokenStream)> {
    let mut field_values = Vec::new();
    for field in fields.named.iter_mut() {
        if field.attrs.iter().any(|attr| attr.path().is_ident("reference")) {
            let name = &field.ident;
            field_values.push((field.clone(), quote! { Box::new(&self.#name as &dyn nzsl_diagnostics_core::traits::DiagnosticReport) }));
        }
    }

    field_values
}

/// Finds the field marked `#[errors]` and generates the iterator code
fn get_errors(fields: &mut FieldsNamed) -> Option<proc_macro2::TokenStream> {
    for field in fields.named.iter_mut() {
        if field.attrs.iter().any(|attr| attr.path().is_ident("errors")) {
            let name = &field.ident;
            return Some(quote! {
                std::boxed::Box::new(self.#name.iter().map(|x| -> &(dyn nzsl_diagnostics_core::traits::DiagnosticReport) { &*x }))
            });
        }
    }

    None
}

/// Generates `DiagnosticReport` for struct types
fn build_struct(name: Ident, diagnostic: Diagnostic, mut data: DataStruct) -> TokenStream {
    if let Fields::Named(fields) = &mut data.fields {
        let source_code = match get_source_code(fields) {
            Some(member) => quote!( Some(Box::new(self.#member.clone())) ),
            None => quote!( None ),
        };

        let errors = match get_errors(fields) {
            Some(errors) => quote!( Some(#errors) ),
            None => quote!( None ),
        };

        let error_code = match diagnostic.code {
            Some(code) => quote!( Some(Box::new(#code.to_string())) ),
            None => quote!( None ),
        };

        let help = match diagnostic.help {
            Some(help) => quote!( Some(Box::new(#help.to_string())) ),
            None => match get_help(fields) {
                Some(help) => help,
                None => quote!( None ),
            },
        };

        let labels = get_labels(fields).into_iter().map(|(_, token)| token).collect::<Vec<_>>();
        let references = get_references(fields).into_iter().map(|(_, token)| token).collect::<Vec<_>>();

        return TokenStream::from(quote!{
            impl nzsl_diagnostics_core::traits::DiagnosticReport for #name {
                fn labels(&self) -> Option<Vec<nzsl_diagnostics_core::traits::LabelField>> { Some(vec![#(#labels),*]) }
                fn references<'a>(&'a self) -> Option<Vec<Box<&'a dyn nzsl_diagnostics_core::traits::DiagnosticReport>>> { Some(vec![#(#references),*]) }
                fn errors<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn nzsl_diagnostics_core::traits::DiagnosticReport> + 'a>> { #errors }
                fn source_code(&self) -> Option<Box<nzsl_diagnostics_core::SourceCode>> { #source_code }
                fn error_code(&self) -> Option<Box<dyn std::fmt::Display>> { #error_code }
                fn help(&self) -> Option<Box<dyn std::fmt::Display>> { #help }
            }
        });
    }

    TokenStream::from(syn::Error::new(name.span(), "Only structs and enums with named fields can derive `Diagnostic`").to_compile_error())
}

fn generate_enum_source_code(enum_name: &Ident, enum_field_ident: &Ident, fields: &mut FieldsNamed) -> proc_macro2::TokenStream {
    let inner_match = match get_source_code(fields) {
        Some(member) => quote!( #member ),
        None => quote!( None )
    };

    quote!( #enum_name::#enum_field_ident { .. } => #inner_match )
}

fn generate_enum_errors(enum_name: &Ident, enum_field_ident: &Ident, fields: &mut FieldsNamed) -> proc_macro2::TokenStream {
    let inner_match = match get_errors(fields) {
        Some(member) => quote!( #member ),
        None => quote!( None )
    };

    quote!( #enum_name::#enum_field_ident { .. } => #inner_match )
}

fn generate_enum_error_code(enum_name: &Ident, enum_field_ident: &Ident, diagnostic: &Diagnostic) -> proc_macro2::TokenStream {
    let inner_match = match diagnostic.code.as_ref() {
        Some(code) => quote!( Some(Box::new(#code.to_string())) ),
        None => quote!( None ),
    };

    quote!( #enum_name::#enum_field_ident { .. } => #inner_match )
}

fn generate_enum_help(enum_name: &Ident, enum_field_ident: &Ident, diagnostic: &Diagnostic) -> proc_macro2::TokenStream {
    let inner_match = match diagnostic.help.as_ref() {
        Some(help) => quote!( Some(Box::new(#help.to_string())) ),
        None => quote!( None ),
    };

    quote!( #enum_name::#enum_field_ident { .. } => #inner_match )
}

fn generate_enum_labels(enum_name: &Ident, enum_field_ident: &Ident, fields: &mut FieldsNamed) -> proc_macro2::TokenStream {
    let labels = get_labels(fields);
    match labels.is_empty() {
        true => quote!( #enum_name::#enum_field_ident { .. } => None ),
        false => {
            let fields = labels.iter().map(|(field, _)| field).collect::<Vec<_>>();
            let tokens = labels.iter().map(|(_, token)| token).collect::<Vec<_>>();

            quote!( #enum_name::#enum_field_ident { #(#fields),*, .. } => Some(vec![#(#tokens),*]) )
        },
    }
}

fn generate_enum_references(enum_name: &Ident, enum_field_ident: &Ident, fields: &mut FieldsNamed) -> proc_macro2::TokenStream {
    let references = get_references(fields);
    match references.is_empty() {
        true => quote!( #enum_name::#enum_field_ident { .. } => None ),
        false => {
            let fields = references.iter().map(|(field, _)| field).collect::<Vec<_>>();
            let tokens = references.iter().map(|(_, token)| token).collect::<Vec<_>>();

            quote!( #enum_name::#enum_field_ident { #(#fields),*, .. } => Some(vec![#(#tokens),*]) )
        },
    }
}

/// Builds the match expression for one trait method across all enum variants.
fn enum_generator(enum_name: &Ident, function_name: Ident, variants: &mut [Variant]) -> proc_macro2::TokenStream {
    let mut lines = Vec::new();
    for enum_field in variants.iter_mut() {

        let enum_field_ident = enum_field.ident.clone();
        if let Ok(diagnostic) = deluxe::extract_attributes::<_, Diagnostic>(enum_field) {

            // Transparent variants delegate entirely to the wrapped error.
            if diagnostic.transparent {
                lines.push(quote! { #enum_name::#enum_field_ident ( data ) =>  data.#function_name() });
            } else {
                match &mut enum_field.fields {
                    Fields::Named(fields) => {
                        let tokens = match function_name.to_string().as_str() {
                            "labels" => generate_enum_labels(enum_name, &enum_field_ident, fields),
                            "references" => generate_enum_references(enum_name, &enum_field_ident, fields),
                            "source_code" => generate_enum_source_code(enum_name, &enum_field_ident, fields),
                            "error_code" => generate_enum_error_code(enum_name, &enum_field_ident, &diagnostic),
                            "help" => generate_enum_help(enum_name, &enum_field_ident, &diagnostic),
                            "errors" => generate_enum_errors(enum_name, &enum_field_ident, fields),
                            _ => panic!("Unknown field ({function_name})")
                        };

                        lines.push(tokens);
                    }
                    Fields::Unnamed(_) => {
                        let tokens = match function_name.to_string().as_str() {
                            "error_code" => generate_enum_error_code(enum_name, &enum_field_ident, &diagnostic),
                            "help" => generate_enum_help(enum_name, &enum_field_ident, &diagnostic),
                            _ => quote!( #enum_name::#enum_field_ident { .. } => None )
                        };
                        lines.push(tokens);
                    },
                    Fields::Unit => {
                        let tokens = match function_name.to_string().as_str() {
                            "error_code" => generate_enum_error_code(enum_name, &enum_field_ident, &diagnostic),
                            "help" => generate_enum_help(enum_name, &enum_field_ident, &diagnostic),
                            _ => quote!( #enum_name::#enum_field_ident { .. } => None )
                        };

                        lines.push(tokens);
                    }
                };
            }
        } else {
            panic!("#[diagnostic] expected");
        }
    }
    quote!(
        match self {
            #(#lines),*
        }
    )
}

/// Generates `DiagnosticReport` for enum types
fn build_enum(name: Ident, data: DataEnum) -> TokenStream {
    let mut variants = Vec::new();
    for variant in data.variants.into_iter() {
        variants.push(variant);
    }

    let error_code = enum_generator(&name, format_ident!("error_code"), &mut (variants.clone()));
    let labels = enum_generator(&name, format_ident!("labels"), &mut (variants.clone()));
    let source_code = enum_generator(&name, format_ident!("source_code"), &mut (variants.clone()));
    let help = enum_generator(&name, format_ident!("help"), &mut (variants.clone()));
    let errors = enum_generator(&name, format_ident!("errors"), &mut (variants.clone()));
    let references = enum_generator(&name, format_ident!("references"), &mut (variants.clone()));

    TokenStream::from(quote!{
        impl nzsl_diagnostics_core::traits::DiagnosticReport for #name {
            fn labels(&self) -> Option<Vec<nzsl_diagnostics_core::traits::LabelField>> { #labels }
            fn references<'a>(&'a self) -> Option<Vec<Box<&'a dyn nzsl_diagnostics_core::traits::DiagnosticReport>>> { #references }
            fn errors<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn nzsl_diagnostics_core::traits::DiagnosticReport> + 'a>> { #errors }
            fn source_code(&self) -> Option<Box<nzsl_diagnostics_core::SourceCode>> { #source_code }
            fn error_code(&self) -> Option<Box<dyn std::fmt::Display>> { #error_code }
            fn help(&self) -> Option<Box<dyn std::fmt::Display>> { #help }
        }
    })
}

/// Entry point for `#[derive(Diagnostic)]`: parses the input and dispatches
/// to the struct or enum builder.
pub fn diagnostic_report(input: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(input as DeriveInput);

    let diagnostic: Diagnostic = match deluxe::extract_attributes(&mut input) {
        Ok(diagnostic) => diagnostic,
        _ => return TokenStream::from(syn::Error::new(input.ident.span(), "diagnostic is missing").to_compile_error())
    };

    match input.data {
        syn::Data::Struct(data) => build_struct(input.ident, diagnostic, data),
        syn::Data::Enum(data) => build_enum(input.ident, data),
        _ => TokenStream::from(syn::Error::new(input.ident.span(), "Only structs and enums with named fields can derive `Diagnostic`").to_compile_error())
    }
}
