//! C6 — identifier/type resolver (spec §4.6).
//!
//! Operates in the two phases spec §4.6 describes: forward registration
//! (every alias/constant/external/function/struct/option gets a dense
//! index, imports execute here) followed by a child-first expression/type
//! rewrite pass. Unlike the constant propagator this pass hand-rolls its
//! own recursion instead of going through [`crate::transform`]: it threads
//! scope and symbol-table state the generic driver has no slot for (see
//! that module's doc comment).
//!
//! Function bodies are resolved in a third, deferred pass once every
//! signature in the module is known, so two functions may call each other
//! regardless of declaration order (spec §3.6).

pub mod error;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use nzsl_diagnostics_core::SourceCode;

use crate::ast::*;
use crate::error::Error;
use crate::file::SourceFile;
use crate::module::ModuleResolver;
use crate::options::CompilerOptions;
use error::ResolveError;

/// What a bare identifier refers to once it's been looked up. Distinct
/// from `ExpressionType`: a `Symbol` names a declaration, a type names the
/// shape of a value.
#[derive(Debug, Clone, Copy)]
pub enum Symbol {
    Alias(AliasIndex),
    Constant(ConstantIndex),
    Variable(VariableIndex),
    Function(FunctionIndex),
    Struct(StructIndex),
    Module(ModuleIndex),
    Option(OptionIndex),
    ExternalBlock(ExternalIndex),
    Intrinsic(IntrinsicId),
}

/// Resolution-time state, independent of the `Module` being mutated: the
/// symbol table, scope stack and import map live here so lookups never
/// need to borrow the `&mut Module` that phase 2 is simultaneously writing
/// resolved types into.
pub struct Resolver<'a> {
    options: &'a CompilerOptions,
    file: Arc<SourceFile>,
    globals: HashMap<String, Symbol>,
    imports: HashMap<String, Arc<Module>>,
    alias_targets: HashMap<usize, ExpressionType>,
    variable_types: HashMap<usize, ExpressionType>,
    /// Keyed by `ConstantIndex::get()`, populated as each `const` is typed
    /// in phase 2 (spec §4.6): lets a `const` referenced before its own
    /// declaration finishes resolving (or from a sibling module) still get
    /// a real type instead of `NoType`.
    constant_types: HashMap<usize, ExpressionType>,
    scopes: Vec<HashMap<String, Symbol>>,
    next_variable: usize,
    loop_depth: u32,
    in_function: bool,
    /// Populated from `module.structs` once phase 2 has resolved every
    /// field type, keyed by `StructIndex::get()`. Lets `AccessField` look
    /// up a real field by name instead of guessing (spec §4.6 "unknown
    /// field access").
    struct_fields: HashMap<usize, Vec<StructField>>,
    /// Keyed by `ModuleIndex::get()`, the reverse of `imports` (which is
    /// keyed by local alias): lets an `ExpressionType::Module{index}`
    /// found on an already-resolved node look its module back up.
    module_by_index: HashMap<usize, Arc<Module>>,
    /// Populated from `module.functions` once phase 2 has resolved every
    /// signature, keyed by `FunctionIndex::get()`: parameter list (with
    /// semantics) and return type, used to check call arity/types (spec
    /// §4.6 "Function calls").
    function_sigs: HashMap<usize, (Vec<FunctionParameter>, ExpressionType)>,
}

impl<'a> Resolver<'a> {
    fn new(file: Arc<SourceFile>, options: &'a CompilerOptions) -> Self {
        Self {
            options,
            file,
            globals: HashMap::new(),
            imports: HashMap::new(),
            alias_targets: HashMap::new(),
            variable_types: HashMap::new(),
            constant_types: HashMap::new(),
            scopes: Vec::new(),
            next_variable: 0,
            loop_depth: 0,
            in_function: false,
            struct_fields: HashMap::new(),
            module_by_index: HashMap::new(),
            function_sigs: HashMap::new(),
        }
    }

    pub fn source_code(&self) -> SourceCode {
        (&*self.file).into()
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_global(&mut self, name: String, symbol: Symbol) {
        self.globals.insert(name, symbol);
    }

    /// Declares `name` in the innermost scope, shadowing anything outer.
    /// Duplicate declaration *within the same scope* is the caller's job
    /// to reject before calling this (spec §7 `DuplicateDeclaration`).
    fn declare_local(&mut self, name: String, symbol: Symbol) {
        if let Symbol::Variable(index) | Symbol::ExternalBlock(_) = symbol {
            let _ = index;
        }
        self.scopes.last_mut().expect("declare_local outside any scope").insert(name, symbol);
    }

    fn local_duplicate(&self, name: &str) -> bool {
        self.scopes.last().is_some_and(|scope| scope.contains_key(name))
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.get(name) {
                return Some(*symbol);
            }
        }
        if let Some(symbol) = self.globals.get(name) {
            return Some(*symbol);
        }
        types::intrinsic_from_name(name).map(Symbol::Intrinsic)
    }

    pub fn alias_target(&self, index: AliasIndex) -> ExpressionType {
        self.alias_targets.get(&index.get()).cloned().unwrap_or(ExpressionType::NoType)
    }

    fn variable_type(&self, index: VariableIndex) -> ExpressionType {
        self.variable_types.get(&index.get()).cloned().unwrap_or(ExpressionType::NoType)
    }

    fn constant_type(&self, index: ConstantIndex) -> ExpressionType {
        self.constant_types.get(&index.get()).cloned().unwrap_or(ExpressionType::NoType)
    }

    pub fn imported_module(&self, alias: &str) -> Option<&Module> {
        self.imports.get(alias).map(|m| m.as_ref())
    }

    fn fresh_variable(&mut self) -> VariableIndex {
        let index = VariableIndex(self.next_variable);
        self.next_variable += 1;
        index
    }

    fn struct_field(&self, index: StructIndex, name: &str) -> Option<(usize, ExpressionType)> {
        self.struct_fields.get(&index.get())?.iter().position(|f| f.name == name).map(|pos| {
            let ty = self.struct_fields[&index.get()][pos].ty.clone();
            (pos, ty)
        })
    }

    fn function_signature(&self, index: FunctionIndex) -> Option<&(Vec<FunctionParameter>, ExpressionType)> {
        self.function_sigs.get(&index.get())
    }
}

/// Entry point called by [`ModuleResolver::resolve`] once a module has
/// been tokenized and parsed, and recursively for every module this crate
/// compiles standalone (tests, the `nzslc` pipeline).
pub fn resolve_module(module: &mut Module, module_resolver: &mut ModuleResolver, options: &CompilerOptions) -> Result<(), Error> {
    let file = module.root.location.file.clone();
    let mut resolver = Resolver::new(file, options);

    let mut statements = take_statements(module);

    let result = (|| {
        register_declarations(&mut resolver, &mut statements, module, module_resolver)?;
        resolve_signatures_and_constants(&mut resolver, &mut statements, module)?;
        populate_struct_and_function_tables(&mut resolver, module);
        resolve_function_bodies(&mut resolver, &mut statements, module)
    })();

    module.root.kind = StatementKind::Multi(statements);
    result
}

// ---------------------------------------------------------------------
// Phase 1 — forward registration
// ---------------------------------------------------------------------

/// Takes the root `Multi`'s statement list out of `module` by value. The
/// three resolution phases work on this detached `Vec` plus `module`'s
/// registries as two disjoint `&mut` borrows (the registries are written
/// through as each declaration is processed); the list is spliced back
/// into `module.root` once all three phases finish.
fn take_statements(module: &mut Module) -> Vec<Statement> {
    match &mut module.root.kind {
        StatementKind::Multi(statements) => std::mem::take(statements),
        _ => panic!("module root is always a Multi statement (built by the parser)"),
    }
}

fn register_declarations(
    resolver: &mut Resolver,
    statements: &mut [Statement],
    module: &mut Module,
    module_resolver: &mut ModuleResolver,
) -> Result<(), Error> {
    let mut next_alias = 0usize;
    let mut next_constant = 0usize;
    let mut next_external = 0usize;
    let mut next_function = 0usize;
    let mut next_struct = 0usize;
    let mut next_option = 0usize;
    let mut next_module = 0usize;
    let source = resolver.source_code();

    for statement in statements.iter_mut() {
        match &mut statement.kind {
            StatementKind::Import { module_path, alias, module_index, .. } => {
                let dotted = module_path.join(".");
                let import_position = statement.location.position.clone();
                let source_code = resolver.source_code();
                let imported = module_resolver.resolve(&dotted, import_position, source_code)?;

                let local_name = alias.clone().unwrap_or_else(|| module_path.last().cloned().unwrap_or_default());
                let index = ModuleIndex(next_module);
                next_module += 1;
                *module_index = Some(index);

                resolver.imports.insert(local_name.clone(), imported.clone());
                resolver.module_by_index.insert(index.get(), imported.clone());
                module.imports.push(ImportedModule { identifier: local_name.clone(), module: imported.clone() });
                resolver.declare_global(local_name, Symbol::Module(index));
            }
            StatementKind::DeclareStruct(decl) => {
                let index = StructIndex(next_struct);
                next_struct += 1;
                decl.index = Some(index);
                resolver.declare_global(decl.name.clone(), Symbol::Struct(index));
                let entry = StructDeclaration {
                    name: decl.name.clone(),
                    fields: decl.fields.clone(),
                    attributes: decl.attributes.clone(),
                    location: decl.location.clone(),
                    index: Some(index),
                };
                module.structs.validate_insert(decl.name.clone(), entry, |_, new| ResolveError::DuplicateDeclaration {
                    source: source.clone(),
                    position: new.location.position.clone(),
                    name: new.name.clone(),
                })?;
            }
            StatementKind::DeclareFunction(decl) => {
                let index = FunctionIndex(next_function);
                next_function += 1;
                decl.index = Some(index);
                resolver.declare_global(decl.name.clone(), Symbol::Function(index));
                let entry = FunctionDeclaration {
                    name: decl.name.clone(),
                    parameters: decl.parameters.clone(),
                    return_type: decl.return_type.clone(),
                    body: decl.body.clone(),
                    attributes: decl.attributes.clone(),
                    location: decl.location.clone(),
                    index: Some(index),
                };
                module.functions.validate_insert(decl.name.clone(), entry, |_, new| ResolveError::DuplicateDeclaration {
                    source: source.clone(),
                    position: new.location.position.clone(),
                    name: new.name.clone(),
                })?;
            }
            StatementKind::DeclareConst { name, ty, index, .. } => {
                let idx = ConstantIndex(next_constant);
                next_constant += 1;
                *index = Some(idx);
                resolver.declare_global(name.clone(), Symbol::Constant(idx));
                let entry = ConstantDeclarationInfo {
                    index: idx,
                    ty: ty.clone().unwrap_or(ExpressionType::NoType),
                    value: None,
                    location: statement.location.clone(),
                };
                module.constants.validate_insert(name.clone(), entry, |_, _| ResolveError::DuplicateDeclaration {
                    source: source.clone(),
                    position: statement.location.position.clone(),
                    name: name.clone(),
                })?;
            }
            StatementKind::DeclareOption { name, ty, index, .. } => {
                let idx = OptionIndex(next_option);
                next_option += 1;
                *index = Some(idx);
                resolver.declare_global(name.clone(), Symbol::Option(idx));
                let entry = OptionInfo {
                    index: idx,
                    ty: ty.clone(),
                    default: None,
                    location: statement.location.clone(),
                    hash: option_hash(name),
                };
                module.options.validate_insert(name.clone(), entry, |_, _| ResolveError::DuplicateDeclaration {
                    source: source.clone(),
                    position: statement.location.position.clone(),
                    name: name.clone(),
                })?;
            }
            StatementKind::DeclareAlias { name, index, .. } => {
                let idx = AliasIndex(next_alias);
                next_alias += 1;
                *index = Some(idx);
                resolver.declare_global(name.clone(), Symbol::Alias(idx));
                let entry = AliasInfo { index: idx, target: ExpressionType::NoType, location: statement.location.clone() };
                module.aliases.validate_insert(name.clone(), entry, |_, _| ResolveError::DuplicateDeclaration {
                    source: source.clone(),
                    position: statement.location.position.clone(),
                    name: name.clone(),
                })?;
            }
            StatementKind::DeclareExternal { name, vars, index, .. } => {
                if let Some(block_name) = name.clone() {
                    let idx = ExternalIndex(next_external);
                    next_external += 1;
                    *index = Some(idx);
                    resolver.declare_global(block_name, Symbol::ExternalBlock(idx));
                }
                for var in vars.iter_mut() {
                    let vindex = resolver.fresh_variable();
                    var.index = Some(vindex);
                    resolver.declare_global(var.name.clone(), Symbol::Variable(vindex));
                    module.externals.insert(var.name.clone(), var.clone());
                }
            }
            StatementKind::DeclareVariable { .. }
            | StatementKind::Expression(_)
            | StatementKind::Multi(_)
            | StatementKind::NoOp
            | StatementKind::Branch { .. }
            | StatementKind::Conditional { .. }
            | StatementKind::Break
            | StatementKind::Continue
            | StatementKind::Discard
            | StatementKind::For { .. }
            | StatementKind::ForEach { .. }
            | StatementKind::Return(_)
            | StatementKind::Scoped(_)
            | StatementKind::While { .. } => {
                // Not legal at module scope; the parser already rejects these,
                // so reaching here would be a parser defect, not a resolver one.
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------
// Phase 2 — struct/const/external/option/alias types, function signatures
// ---------------------------------------------------------------------

fn resolve_signatures_and_constants(resolver: &mut Resolver, statements: &mut [Statement], module: &mut Module) -> Result<(), Error> {
    resolver.push_scope();

    for statement in statements.iter_mut() {
        match &mut statement.kind {
            StatementKind::DeclareAlias { name, target, index, .. } => {
                resolve_expression(resolver, target)?;
                let ty = alias_target_type(target);
                resolver.alias_targets.insert(index.expect("registered in phase 1").get(), ty.clone());
                if let Some(entry) = module.aliases.get_mut(name.as_str()) {
                    entry.target = ty;
                }
            }
            StatementKind::DeclareStruct(decl) => {
                for field in decl.fields.iter_mut() {
                    resolve_type_in_place(resolver, &mut field.ty)?;
                }
                if let Some(entry) = module.structs.get_mut(decl.name.as_str()) {
                    entry.fields = decl.fields.clone();
                }
            }
            StatementKind::DeclareFunction(decl) => {
                for param in decl.parameters.iter_mut() {
                    resolve_type_in_place(resolver, &mut param.ty)?;
                }
                if let Some(ret) = decl.return_type.as_mut() {
                    resolve_type_in_place(resolver, ret)?;
                }
                if let Some(entry) = module.functions.get_mut(decl.name.as_str()) {
                    entry.parameters = decl.parameters.clone();
                    entry.return_type = decl.return_type.clone();
                }
            }
            StatementKind::DeclareExternal { vars, .. } => {
                for var in vars.iter_mut() {
                    resolve_type_in_place(resolver, &mut var.ty)?;
                    if let Some(index) = var.index {
                        resolver.variable_types.insert(index.get(), var.ty.clone());
                    }
                    if let Some(entry) = module.externals.get_mut(var.name.as_str()) {
                        entry.ty = var.ty.clone();
                    }
                }
            }
            StatementKind::DeclareOption { name, ty, default, default_expr, index, .. } => {
                resolve_type_in_place(resolver, ty)?;
                if let Some(expr) = default_expr.as_mut() {
                    resolve_expression(resolver, expr)?;
                    let expr_ty = expr.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
                    check_assignable(resolver, statement_position(ty), ty, &expr_ty)?;
                    *default = ExpressionValue::Expression(expr.clone());
                } else if !matches!(default, ExpressionValue::Absent) {
                    if let ExpressionValue::Value(value) = default {
                        check_assignable(resolver, value_position(index), ty, &value.expression_type())?;
                    }
                }
                if let Some(entry) = module.options.get_mut(name.as_str()) {
                    entry.ty = ty.clone();
                    entry.default = default.get_resulting_value().cloned();
                }
            }
            StatementKind::DeclareConst { name, ty, value, expr, index, .. } => {
                if let Some(declared) = ty.as_mut() {
                    resolve_type_in_place(resolver, declared)?;
                }
                if let Some(e) = expr.as_mut() {
                    resolve_expression(resolver, e)?;
                    let inferred = e.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
                    let final_ty = match ty.clone() {
                        Some(declared) => {
                            check_assignable(resolver, statement_position(&declared), &declared, &inferred)?;
                            declared
                        }
                        None => narrow_implicit(&inferred),
                    };
                    *ty = Some(final_ty.clone());
                    *value = ExpressionValue::Expression(e.clone());
                    if let Some(idx) = index {
                        resolver.constant_types.insert(idx.get(), final_ty.clone());
                    }
                    if let Some(entry) = module.constants.get_mut(name.as_str()) {
                        entry.ty = final_ty;
                    }
                } else if let ExpressionValue::Value(v) = value {
                    let final_ty = ty.clone().unwrap_or_else(|| v.expression_type());
                    if let Some(idx) = index {
                        resolver.constant_types.insert(idx.get(), final_ty.clone());
                    }
                    if let Some(entry) = module.constants.get_mut(name.as_str()) {
                        entry.ty = final_ty;
                        entry.value = Some(v.clone());
                    }
                }
            }
            _ => {}
        }
    }

    resolver.pop_scope();
    Ok(())
}

fn alias_target_type(resolved_target: &Expression) -> ExpressionType {
    match &resolved_target.kind {
        ExpressionKind::StructTypeReference { index } => ExpressionType::Struct { index: *index },
        ExpressionKind::FunctionReference { index } => ExpressionType::Function { index: *index },
        ExpressionKind::ModuleReference { index } => ExpressionType::Module { index: *index },
        ExpressionKind::AliasValue { index } => ExpressionType::Alias { index: *index, target: Box::new(ExpressionType::NoType) },
        _ => resolved_target.cached_expression_type.clone().unwrap_or(ExpressionType::NoType),
    }
}

fn narrow_implicit(ty: &ExpressionType) -> ExpressionType {
    match ty.as_primitive() {
        Some(p) if p.is_untyped() => ExpressionType::Primitive(p.default_concrete()),
        _ => ty.clone(),
    }
}

fn resolve_type_in_place(resolver: &mut Resolver, ty: &mut ExpressionType) -> Result<(), ResolveError> {
    if let ExpressionType::Unresolved(expr) = ty {
        let resolved = types::resolve_type_expression(resolver, expr)?;
        *ty = resolved;
    }
    Ok(())
}

fn statement_position(ty: &ExpressionType) -> std::ops::Range<usize> {
    match ty {
        ExpressionType::Unresolved(expr) => expr.location.position.clone(),
        _ => 0..0,
    }
}

fn value_position(_index: &Option<OptionIndex>) -> std::ops::Range<usize> {
    0..0
}

fn check_assignable(resolver: &mut Resolver, position: std::ops::Range<usize>, expected: &ExpressionType, found: &ExpressionType) -> Result<(), ResolveError> {
    let expected_resolved = expected.resolve_alias();
    let found_resolved = found.resolve_alias();

    let compatible = match (expected_resolved.as_primitive(), found_resolved.as_primitive()) {
        (Some(e), Some(f)) => e == f || (f.is_untyped() && f.is_numeric() == e.is_numeric()),
        _ => expected_resolved == found_resolved || matches!(found_resolved, ExpressionType::NoType),
    };

    if compatible {
        Ok(())
    } else {
        Err(ResolveError::TypeMismatch {
            source: resolver.source_code(),
            position,
            expected: format!("{expected_resolved:?}"),
            found: format!("{found_resolved:?}"),
        })
    }
}

/// Snapshots `module.structs`/`module.functions` into the resolver's
/// lookup tables once phase 2 has resolved every field/parameter type.
/// Phase 3 (function bodies) reads these instead of `module` directly
/// since `module` is simultaneously borrowed mutably by the statement
/// list being spliced back in (see [`take_statements`]).
fn populate_struct_and_function_tables(resolver: &mut Resolver, module: &Module) {
    for (_, decl) in module.structs.iter() {
        if let Some(index) = decl.index {
            let fields: Vec<StructField> = decl.fields.iter().filter(|f| field_cond_enabled(f, module, resolver.options)).cloned().collect();
            resolver.struct_fields.insert(index.get(), fields);
        }
    }
    for (_, decl) in module.functions.iter() {
        if let Some(index) = decl.index {
            resolver.function_sigs.insert(index.get(), (decl.parameters.clone(), decl.return_type.clone().unwrap_or(ExpressionType::NoType)));
        }
    }
}

/// Resolves a struct field's `cond` attribute (spec §4.8 "`cond`-disabled
/// members are skipped entirely in field-index enumeration") against this
/// module's `option` declarations and `--set` overrides. Fields with no
/// `cond` attribute are always enabled. `cond`'s argument is the common
/// case an `option` name (`[cond(SOME_OPTION)]`, parsed as a bare
/// `AttributeArg::Identifier`) or its negation (`[cond(!SOME_OPTION)]`,
/// parsed as `AttributeArg::Expression`); any other shape can't be decided
/// without running the constant propagator, which hasn't run yet at this
/// point in C6 (see DESIGN.md), so such a field is left enabled rather than
/// silently dropped.
pub(crate) fn field_cond_enabled(field: &StructField, module: &Module, options: &CompilerOptions) -> bool {
    let Some(attr) = field.attributes.iter().find(|a| a.name == AttributeName::Cond) else {
        return true;
    };
    let Some(arg) = attr.args.first() else {
        return true;
    };
    match arg {
        AttributeArg::Identifier(name) => option_bool_value(module, options, name).unwrap_or(true),
        AttributeArg::Expression(expr) => match &expr.kind {
            ExpressionKind::Unary { op: UnaryOp::LogicalNot, expr: inner } => match &inner.kind {
                ExpressionKind::Identifier(name) => option_bool_value(module, options, name).map(|b| !b).unwrap_or(true),
                _ => true,
            },
            _ => true,
        },
        _ => true,
    }
}

/// Looks up a declared `option`'s effective boolean value: a `--set`
/// override if one was given (spec GLOSSARY "Option"), else the option's
/// own literal default. Returns `None` if `name` isn't a known option, its
/// value isn't a plain boolean, or its default needs folding.
fn option_bool_value(module: &Module, options: &CompilerOptions, name: &str) -> Option<bool> {
    let entry = module.options.get(name)?;
    let value = options.option_overrides.get(&entry.hash).or(entry.default.as_ref())?;
    match value {
        ConstantValue::Single(SingleValue::Bool(b)) => Some(*b),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// Phase 3 — deferred function bodies
// ---------------------------------------------------------------------

fn resolve_function_bodies(resolver: &mut Resolver, statements: &mut [Statement], module: &mut Module) -> Result<(), Error> {
    for statement in statements.iter_mut() {
        if let StatementKind::DeclareFunction(decl) = &mut statement.kind {
            resolver.push_scope();
            resolver.in_function = true;

            for param in decl.parameters.iter_mut() {
                let index = resolver.fresh_variable();
                resolver.variable_types.insert(index.get(), param.ty.clone());
                resolver.declare_local(param.name.clone(), Symbol::Variable(index));
                param.index = Some(index);
            }

            resolve_statement(resolver, &mut decl.body)?;

            resolver.in_function = false;
            resolver.pop_scope();

            if let Some(entry) = module.functions.get_mut(decl.name.as_str()) {
                entry.body = decl.body.clone();
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Statement resolution
// ---------------------------------------------------------------------

fn resolve_statement(resolver: &mut Resolver, stmt: &mut Statement) -> Result<(), ResolveError> {
    match &mut stmt.kind {
        StatementKind::Multi(statements) => {
            for s in statements.iter_mut() {
                resolve_statement(resolver, s)?;
            }
        }
        StatementKind::Scoped(inner) => {
            resolver.push_scope();
            resolve_statement(resolver, inner)?;
            resolver.pop_scope();
        }
        StatementKind::Branch { arms, else_body } => {
            for arm in arms.iter_mut() {
                if let Some(cond) = arm.condition.as_mut() {
                    resolve_expression(resolver, cond)?;
                }
                resolver.push_scope();
                resolve_statement(resolver, &mut arm.body)?;
                resolver.pop_scope();
            }
            if let Some(else_body) = else_body.as_mut() {
                resolver.push_scope();
                resolve_statement(resolver, else_body)?;
                resolver.pop_scope();
            }
        }
        StatementKind::Conditional { condition, truthy, falsy } => {
            resolve_expression(resolver, condition)?;
            resolver.push_scope();
            resolve_statement(resolver, truthy)?;
            resolver.pop_scope();
            if let Some(falsy) = falsy.as_mut() {
                resolver.push_scope();
                resolve_statement(resolver, falsy)?;
                resolver.pop_scope();
            }
        }
        StatementKind::DeclareVariable { name, ty, value, index } => {
            if resolver.local_duplicate(name) {
                return Err(ResolveError::DuplicateDeclaration { source: resolver.source_code(), position: stmt.location.position.clone(), name: name.clone() });
            }
            if let Some(declared) = ty.as_mut() {
                resolve_type_in_place(resolver, declared)?;
            }
            let mut final_ty = ty.clone().unwrap_or(ExpressionType::NoType);
            if let Some(v) = value.as_mut() {
                resolve_expression(resolver, v)?;
                let inferred = v.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
                final_ty = match ty.clone() {
                    Some(declared) => {
                        check_assignable(resolver, stmt.location.position.clone(), &declared, &inferred)?;
                        declared
                    }
                    None => narrow_implicit(&inferred),
                };
            }
            *ty = Some(final_ty.clone());
            let var_index = resolver.fresh_variable();
            *index = Some(var_index);
            resolver.variable_types.insert(var_index.get(), final_ty);
            resolver.declare_local(name.clone(), Symbol::Variable(var_index));
        }
        StatementKind::For { variable, from, to, step, body, variable_index } => {
            resolve_expression(resolver, from)?;
            resolve_expression(resolver, to)?;
            if let Some(step) = step.as_mut() {
                resolve_expression(resolver, step)?;
            }
            resolver.push_scope();
            let index = resolver.fresh_variable();
            *variable_index = Some(index);
            resolver.variable_types.insert(index.get(), ExpressionType::Primitive(PrimitiveType::I32));
            resolver.declare_local(variable.clone(), Symbol::Variable(index));
            resolver.loop_depth += 1;
            resolve_statement(resolver, body)?;
            resolver.loop_depth -= 1;
            resolver.pop_scope();
        }
        StatementKind::ForEach { variable, container, body, variable_index } => {
            resolve_expression(resolver, container)?;
            let element_ty = container
                .cached_expression_type
                .as_ref()
                .and_then(|t| match t.resolve_alias() {
                    ExpressionType::Array { element, .. } | ExpressionType::DynArray { element } => Some((**element).clone()),
                    _ => None,
                })
                .unwrap_or(ExpressionType::NoType);
            resolver.push_scope();
            let index = resolver.fresh_variable();
            *variable_index = Some(index);
            resolver.variable_types.insert(index.get(), element_ty);
            resolver.declare_local(variable.clone(), Symbol::Variable(index));
            resolver.loop_depth += 1;
            resolve_statement(resolver, body)?;
            resolver.loop_depth -= 1;
            resolver.pop_scope();
        }
        StatementKind::While { condition, body } => {
            resolve_expression(resolver, condition)?;
            resolver.push_scope();
            resolver.loop_depth += 1;
            resolve_statement(resolver, body)?;
            resolver.loop_depth -= 1;
            resolver.pop_scope();
        }
        StatementKind::Expression(expr) => {
            resolve_expression(resolver, expr)?;
        }
        StatementKind::Return(expr) => {
            if let Some(e) = expr.as_mut() {
                resolve_expression(resolver, e)?;
            }
        }
        StatementKind::Break | StatementKind::Continue | StatementKind::Discard | StatementKind::NoOp => {}
        StatementKind::DeclareAlias { .. }
        | StatementKind::DeclareConst { .. }
        | StatementKind::DeclareExternal { .. }
        | StatementKind::DeclareFunction(_)
        | StatementKind::DeclareOption { .. }
        | StatementKind::DeclareStruct(_)
        | StatementKind::Import { .. } => {
            // Module-scope-only declarations; unreachable inside a function body.
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Expression resolution (child-first)
// ---------------------------------------------------------------------

fn resolve_expression(resolver: &mut Resolver, expr: &mut Expression) -> Result<(), ResolveError> {
    match &mut expr.kind {
        ExpressionKind::Constant(value) => {
            expr.cached_expression_type = Some(value.expression_type());
        }
        ExpressionKind::Identifier(name) => {
            resolve_identifier(resolver, expr, name.clone())?;
        }
        ExpressionKind::AccessField { expr: inner, field_name, field_index } => {
            resolve_expression(resolver, inner)?;
            resolve_access_field(resolver, expr.location.position.clone(), inner, field_name, field_index)?;
        }
        ExpressionKind::AccessIdentifier { expr: inner, identifiers } => {
            resolve_expression(resolver, inner)?;
            let mut field_index = None;
            let mut current_ty = inner.cached_expression_type.clone();
            for ident in identifiers.iter() {
                current_ty = resolve_named_member(resolver, expr.location.position.clone(), current_ty.as_ref(), ident, &mut field_index)?;
            }
            expr.cached_expression_type = current_ty;
        }
        ExpressionKind::AccessIndex { expr: inner, indices } => {
            resolve_expression(resolver, inner)?;
            for idx in indices.iter_mut() {
                resolve_expression(resolver, idx)?;
            }
            let result_ty = match inner.cached_expression_type.as_ref().map(|t| t.resolve_alias()) {
                Some(ExpressionType::Array { element, .. }) | Some(ExpressionType::DynArray { element }) => (**element).clone(),
                Some(ExpressionType::Vector { primitive, .. }) => ExpressionType::Primitive(*primitive),
                Some(ExpressionType::Matrix { rows, primitive, .. }) => ExpressionType::Vector { component_count: *rows, primitive: *primitive },
                _ => ExpressionType::NoType,
            };
            expr.cached_expression_type = Some(result_ty);
        }
        ExpressionKind::Assign { target, value } => {
            resolve_expression(resolver, target)?;
            resolve_expression(resolver, value)?;
            if !is_lvalue(target) {
                return Err(ResolveError::InvalidLvalue { source: resolver.source_code(), position: target.location.position.clone() });
            }
            let target_ty = target.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
            let value_ty = value.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
            check_assignable(resolver, expr.location.position.clone(), &target_ty, &value_ty)?;
            expr.cached_expression_type = Some(target_ty);
        }
        ExpressionKind::Binary { op, left, right } => {
            resolve_expression(resolver, left)?;
            resolve_expression(resolver, right)?;
            let left_ty = left.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
            let right_ty = right.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
            let result = types::binary_result_type(*op, &left_ty, &right_ty).ok_or_else(|| ResolveError::UnsupportedOperands {
                source: resolver.source_code(),
                position: expr.location.position.clone(),
                op: format!("{op:?}"),
                left: format!("{left_ty:?}"),
                right: format!("{right_ty:?}"),
            })?;
            expr.cached_expression_type = Some(result);
        }
        ExpressionKind::Unary { op, expr: inner } => {
            resolve_expression(resolver, inner)?;
            let inner_ty = inner.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
            let result = types::unary_result_type(*op, &inner_ty).ok_or_else(|| ResolveError::UnsupportedOperands {
                source: resolver.source_code(),
                position: expr.location.position.clone(),
                op: format!("{op:?}"),
                left: format!("{inner_ty:?}"),
                right: "<none>".to_string(),
            })?;
            expr.cached_expression_type = Some(result);
        }
        ExpressionKind::Conditional { condition, true_expr, false_expr } => {
            resolve_expression(resolver, condition)?;
            resolve_expression(resolver, true_expr)?;
            resolve_expression(resolver, false_expr)?;
            expr.cached_expression_type = true_expr.cached_expression_type.clone();
        }
        ExpressionKind::Swizzle { expr: inner, components } => {
            resolve_expression(resolver, inner)?;
            let base = inner.cached_expression_type.as_ref().and_then(|t| t.base_primitive()).unwrap_or(PrimitiveType::F32);
            expr.cached_expression_type = Some(if components.len() == 1 {
                ExpressionType::Primitive(base)
            } else {
                ExpressionType::Vector { component_count: components.len() as u8, primitive: base }
            });
        }
        ExpressionKind::CallFunction { callee, arguments } => {
            resolve_call(resolver, expr.location.position.clone(), callee, arguments)?;
            let resolved_kind = std::mem::replace(&mut expr.kind, ExpressionKind::Constant(ConstantValue::Single(SingleValue::Bool(false))));
            if let ExpressionKind::CallFunction { callee, arguments } = resolved_kind {
                expr.kind = rewrite_call(*callee, arguments);
            }
            let ty = call_result_type(resolver, &expr.kind);
            expr.cached_expression_type = Some(ty);
        }
        ExpressionKind::CallMethod { object, method, arguments } => {
            resolve_expression(resolver, object)?;
            for a in arguments.iter_mut() {
                resolve_expression(resolver, a)?;
            }
            let _ = method;
            expr.cached_expression_type = Some(ExpressionType::NoType);
        }
        ExpressionKind::Cast { target_type, arguments } => {
            resolve_expression(resolver, target_type)?;
            for a in arguments.iter_mut() {
                resolve_expression(resolver, a)?;
            }
            let ty = target_type.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
            let arg_types: Vec<ExpressionType> = arguments.iter().map(|a| a.cached_expression_type.clone().unwrap_or(ExpressionType::NoType)).collect();
            if let ExpressionType::Type { index } = &ty {
                types::validate_cast(index, &arg_types).map_err(|reason| ResolveError::InvalidCast {
                    source: resolver.source_code(),
                    position: expr.location.position.clone(),
                    target: format!("{index:?}"),
                    reason,
                })?;
                expr.cached_expression_type = Some((**index).clone());
            } else {
                types::validate_cast(&ty, &arg_types).map_err(|reason| ResolveError::InvalidCast {
                    source: resolver.source_code(),
                    position: expr.location.position.clone(),
                    target: format!("{ty:?}"),
                    reason,
                })?;
                expr.cached_expression_type = Some(ty);
            }
        }
        ExpressionKind::Intrinsic { id, arguments } => {
            for a in arguments.iter_mut() {
                resolve_expression(resolver, a)?;
            }
            expr.cached_expression_type = Some(intrinsic_result_type(*id, arguments));
        }
        // Already-resolved reference kinds: nothing left to do (idempotent
        // re-resolution, e.g. if a pass runs twice over the same module).
        ExpressionKind::AliasValue { index } => {
            expr.cached_expression_type = Some(resolver.alias_target(*index));
        }
        ExpressionKind::FunctionReference { .. }
        | ExpressionKind::IdentifierValue { .. }
        | ExpressionKind::IntrinsicFunctionReference { .. }
        | ExpressionKind::ModuleReference { .. }
        | ExpressionKind::NamedExternalBlockReference { .. }
        | ExpressionKind::StructTypeReference { .. }
        | ExpressionKind::TypeReference { .. } => {}
        ExpressionKind::VariableValue { index } => {
            expr.cached_expression_type = Some(resolver.variable_type(*index));
        }
        ExpressionKind::ConstantReference { index } => {
            expr.cached_expression_type = Some(resolver.constant_type(*index));
        }
    }
    Ok(())
}

fn resolve_identifier(resolver: &mut Resolver, expr: &mut Expression, name: String) -> Result<(), ResolveError> {
    let symbol = resolver.lookup(&name).ok_or_else(|| ResolveError::UndeclaredIdentifier {
        source: resolver.source_code(),
        position: expr.location.position.clone(),
        name: name.clone(),
    })?;

    let (kind, ty) = match symbol {
        Symbol::Variable(index) => (ExpressionKind::VariableValue { index }, resolver.variable_type(index)),
        Symbol::Constant(index) => (ExpressionKind::ConstantReference { index }, resolver.constant_type(index)),
        Symbol::Function(index) => (ExpressionKind::FunctionReference { index }, ExpressionType::Function { index }),
        Symbol::Struct(index) => (ExpressionKind::StructTypeReference { index }, ExpressionType::Type { index: Box::new(ExpressionType::Struct { index }) }),
        Symbol::Alias(index) => {
            let target = resolver.alias_target(index);
            (ExpressionKind::AliasValue { index }, target)
        }
        Symbol::Module(index) => (ExpressionKind::ModuleReference { index }, ExpressionType::Module { index }),
        Symbol::Option(_) => (ExpressionKind::Identifier(name.clone()), ExpressionType::NoType),
        Symbol::ExternalBlock(index) => (ExpressionKind::NamedExternalBlockReference { index }, ExpressionType::NamedExternalBlock { index }),
        Symbol::Intrinsic(id) => (ExpressionKind::IntrinsicFunctionReference { id }, ExpressionType::Intrinsic { intrinsic_id: id }),
    };

    expr.kind = kind;
    expr.cached_expression_type = Some(ty);
    Ok(())
}

/// Resolves one `.name` step of a field/member access against the type a
/// prior expression resolved to: a struct (by field name, spec §4.6
/// "unknown field access") or an imported module (by constant name, the
/// only module member meaningful at expression level — struct member
/// paths like `M.Block` only ever appear in type position and are handled
/// by [`types::resolve_type_expression`] instead).
fn resolve_member_step(
    resolver: &mut Resolver,
    position: std::ops::Range<usize>,
    current: Option<&ExpressionType>,
    name: &str,
    field_index: &mut Option<usize>,
) -> Result<ExpressionType, ResolveError> {
    match current.map(|t| t.resolve_alias()) {
        Some(ExpressionType::Struct { index }) => match resolver.struct_field(*index, name) {
            Some((pos, ty)) => {
                *field_index = Some(pos);
                Ok(ty)
            }
            None => Err(ResolveError::UnknownField { source: resolver.source_code(), position, field: name.to_string() }),
        },
        Some(ExpressionType::Module { index }) => {
            let module = resolver.module_by_index.get(&index.get()).cloned();
            match module.as_ref().and_then(|m| m.constants.get(name)) {
                Some(entry) => Ok(entry.ty.clone()),
                None => Err(ResolveError::UnknownField { source: resolver.source_code(), position, field: name.to_string() }),
            }
        }
        _ => Err(ResolveError::UnknownField { source: resolver.source_code(), position, field: name.to_string() }),
    }
}

fn resolve_access_field(
    resolver: &mut Resolver,
    position: std::ops::Range<usize>,
    inner: &Expression,
    field_name: &str,
    field_index: &mut Option<usize>,
) -> Result<ExpressionType, ResolveError> {
    resolve_member_step(resolver, position, inner.cached_expression_type.as_ref(), field_name, field_index)
}

fn resolve_named_member(
    resolver: &mut Resolver,
    position: std::ops::Range<usize>,
    current: Option<&ExpressionType>,
    name: &str,
    field_index: &mut Option<usize>,
) -> Result<Option<ExpressionType>, ResolveError> {
    resolve_member_step(resolver, position, current, name, field_index).map(Some)
}

fn is_lvalue(expr: &Expression) -> bool {
    matches!(
        expr.kind,
        ExpressionKind::VariableValue { .. } | ExpressionKind::IdentifierValue { .. } | ExpressionKind::AccessField { .. } | ExpressionKind::AccessIndex { .. } | ExpressionKind::Swizzle { .. }
    )
}

/// Disambiguates the parser's single `CallFunction` shape into a real
/// call, a cast, or an intrinsic invocation, per spec §4.6 (the parser
/// cannot tell these apart without name resolution).
fn resolve_call(resolver: &mut Resolver, position: std::ops::Range<usize>, callee: &mut Expression, arguments: &mut [Expression]) -> Result<(), ResolveError> {
    resolve_expression(resolver, callee)?;
    for a in arguments.iter_mut() {
        resolve_expression(resolver, a)?;
    }

    match &callee.kind {
        ExpressionKind::FunctionReference { index } => check_call_arguments(resolver, position, *index, arguments),
        ExpressionKind::StructTypeReference { .. } | ExpressionKind::TypeReference { .. } | ExpressionKind::Identifier(_) => Ok(()),
        ExpressionKind::IntrinsicFunctionReference { .. } => Ok(()),
        _ => Err(ResolveError::NotCallable { source: resolver.source_code(), position, name: format!("{:?}", callee.kind) }),
    }
}

/// Checks a resolved call's argument count, per-parameter type, and
/// `in`/`out`/`inout` semantic against the callee's declaration (spec
/// §4.6 "Function calls: parameter count, per-parameter resolved type,
/// and parameter semantic must match declaration").
fn check_call_arguments(resolver: &mut Resolver, position: std::ops::Range<usize>, index: FunctionIndex, arguments: &[Expression]) -> Result<(), ResolveError> {
    let Some((parameters, _)) = resolver.function_signature(index).cloned() else {
        // Recursive/forward call into a signature not yet snapshotted
        // (shouldn't happen post phase-2, but partial compilation may
        // still be resolving a body before every sibling is known).
        return Ok(());
    };

    if parameters.len() != arguments.len() {
        return Err(ResolveError::ArityMismatch { source: resolver.source_code(), position, expected: parameters.len(), found: arguments.len() });
    }

    for (param, arg) in parameters.iter().zip(arguments) {
        let arg_ty = arg.cached_expression_type.clone().unwrap_or(ExpressionType::NoType);
        check_assignable(resolver, arg.location.position.clone(), &param.ty, &arg_ty)?;

        if matches!(param.semantic, ParameterSemantic::Out | ParameterSemantic::Inout) && !is_lvalue(arg) {
            return Err(ResolveError::SemanticMismatch {
                source: resolver.source_code(),
                position: arg.location.position.clone(),
                param: param.name.clone(),
                expected: match param.semantic {
                    ParameterSemantic::Out => "out".to_string(),
                    ParameterSemantic::Inout => "inout".to_string(),
                    ParameterSemantic::In => unreachable!(),
                },
            });
        }
    }
    Ok(())
}

fn rewrite_call(callee: Expression, arguments: Vec<Expression>) -> ExpressionKind {
    match callee.kind {
        ExpressionKind::IntrinsicFunctionReference { id } => ExpressionKind::Intrinsic { id, arguments },
        ExpressionKind::StructTypeReference { .. } | ExpressionKind::TypeReference { .. } => {
            ExpressionKind::Cast { target_type: Box::new(callee), arguments }
        }
        _ => ExpressionKind::CallFunction { callee: Box::new(callee), arguments },
    }
}

fn call_result_type(resolver: &Resolver, kind: &ExpressionKind) -> ExpressionType {
    match kind {
        ExpressionKind::CallFunction { callee, .. } => match &callee.cached_expression_type {
            Some(ExpressionType::Function { index }) => {
                resolver.function_signature(*index).map(|(_, ret)| ret.clone()).unwrap_or(ExpressionType::NoType)
            }
            _ => ExpressionType::NoType,
        },
        ExpressionKind::Cast { target_type, .. } => target_type.cached_expression_type.clone().unwrap_or(ExpressionType::NoType),
        ExpressionKind::Intrinsic { id, arguments } => intrinsic_result_type(*id, arguments),
        _ => ExpressionType::NoType,
    }
}

fn intrinsic_result_type(id: IntrinsicId, arguments: &[Expression]) -> ExpressionType {
    let first = arguments.first().and_then(|a| a.cached_expression_type.clone()).unwrap_or(ExpressionType::NoType);
    match id {
        IntrinsicId::ArraySize => ExpressionType::Primitive(PrimitiveType::U32),
        IntrinsicId::Length => ExpressionType::Primitive(first.base_primitive().unwrap_or(PrimitiveType::F32)),
        IntrinsicId::Dot => ExpressionType::Primitive(first.base_primitive().unwrap_or(PrimitiveType::F32)),
        IntrinsicId::Select => arguments.get(1).and_then(|a| a.cached_expression_type.clone()).unwrap_or(first),
        IntrinsicId::SampleTexture => ExpressionType::Vector { component_count: 4, primitive: PrimitiveType::F32 },
        _ => first,
    }
}
