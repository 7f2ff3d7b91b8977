//! C8 — validator (spec §4.7): the last front-end pass before a [`Module`]
//! is handed to a backend. Everything here assumes resolution (C6) and
//! constant folding (C7) already ran: every expression carries a
//! `cached_expression_type`, no `Unresolved`/implicit types remain, and dead
//! `const if` arms are already gone when `--optimize` is set.
//!
//! Checks performed: control-flow legality (`break`/`continue` inside a
//! loop, `discard` only in a fragment entry point, every path through a
//! non-void function returns), entry-point/builtin/stage compatibility,
//! external-block rules (push-constant exclusivity, binding/set
//! completeness), struct member rules, and intrinsic arity/type checks not
//! already enforced at resolution time.

use std::ops::Range;

use nzsl_diagnostics_core::SourceCode;
use nzsl_diagnostics_macros::Diagnostic;

use crate::ast::{AttributeName, Expression, ExpressionKind, ExpressionType, FunctionDeclaration, Module, PrimitiveType, Statement, StatementKind};
use crate::options::CompilerOptions;

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum ValidationError {
    #[error("`break` outside of a loop or branch")]
    #[diagnostic(code = "validate::break-outside-loop")]
    BreakOutsideLoop {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
    },

    #[error("`continue` outside of a loop")]
    #[diagnostic(code = "validate::continue-outside-loop")]
    ContinueOutsideLoop {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
    },

    #[error("`discard` is only valid in a fragment entry point")]
    #[diagnostic(code = "validate::discard-outside-fragment")]
    DiscardOutsideFragment {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
    },

    #[error("function `{name}` does not return a value on every path")]
    #[diagnostic(code = "validate::missing-return", help = "add a `return` statement covering every control-flow path")]
    MissingReturn {
        #[source_code]
        source: SourceCode,
        #[label("this function")]
        position: Range<usize>,
        name: String,
    },

    #[error("entry point `{name}` has stage `{stage}` which does not accept a `{attribute}` builtin")]
    #[diagnostic(code = "validate::builtin-stage-mismatch")]
    BuiltinStageMismatch {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        name: String,
        stage: String,
        attribute: String,
    },

    #[error("entry point `{name}` declares more than one `{attribute}` builtin parameter")]
    #[diagnostic(code = "validate::duplicate-builtin")]
    DuplicateBuiltin {
        #[source_code]
        source: SourceCode,
        #[label("duplicate")]
        position: Range<usize>,
        name: String,
        attribute: String,
    },

    #[error("a `push_constant` external block cannot declare more than one variable across the module")]
    #[diagnostic(code = "validate::multiple-push-constants")]
    MultiplePushConstants {
        #[source_code]
        source: SourceCode,
        #[label("second push_constant block")]
        position: Range<usize>,
    },

    #[error("external variable `{name}` is missing a `set`/`binding` attribute and `auto_binding` is not enabled")]
    #[diagnostic(code = "validate::missing-binding")]
    MissingBinding {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        name: String,
    },

    #[error("binding ({set}, {binding}) is used by more than one external variable")]
    #[diagnostic(code = "validate::duplicate-binding")]
    DuplicateBinding {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        set: u32,
        binding: u32,
    },

    #[error("struct field `{field}` has builtin `{attribute}` which is incompatible with its declared type")]
    #[diagnostic(code = "validate::builtin-type-mismatch")]
    BuiltinTypeMismatch {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        field: String,
        attribute: String,
    },

    #[error("intrinsic `{name}` expected {expected} argument(s), found {found}")]
    #[diagnostic(code = "validate::intrinsic-arity")]
    IntrinsicArity {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("the module has more than one entry point for stage `{stage}`")]
    #[diagnostic(code = "validate::duplicate-entry-point")]
    DuplicateEntryPoint {
        #[source_code]
        source: SourceCode,
        #[label("second entry point")]
        position: Range<usize>,
        stage: String,
    },

    #[error("{kind} index {index} does not refer to a declaration in this module")]
    #[diagnostic(code = "validate::dangling-index", help = "this is a compiler defect in an earlier pass, not a source error")]
    DanglingIndex {
        #[source_code]
        source: SourceCode,
        #[label("here")]
        position: Range<usize>,
        kind: &'static str,
        index: usize,
    },
}

/// Shader stages an `entry` attribute can name (spec §4.7, GLOSSARY
/// "Entry point").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    fn from_identifier(s: &str) -> Option<Self> {
        match s {
            "vert" => Some(ShaderStage::Vertex),
            "frag" => Some(ShaderStage::Fragment),
            "compute" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "compute",
        }
    }
}

/// Builtin parameter name -> (allowed stages, required primitive/vector
/// shape), spec §4.7 "BuiltinData". Kept as a small match table rather than
/// a lazy-static map: it never grows at runtime and a match compiles to a
/// jump table anyway.
fn builtin_allowed_stages(name: &str) -> Option<&'static [ShaderStage]> {
    match name {
        "position" => Some(&[ShaderStage::Vertex, ShaderStage::Fragment]),
        "vertex_index" | "instance_index" => Some(&[ShaderStage::Vertex]),
        "frag_coord" | "frag_depth" | "front_facing" => Some(&[ShaderStage::Fragment]),
        "global_invocation_indices" | "local_invocation_index" | "workgroup_indices" => {
            Some(&[ShaderStage::Compute])
        }
        _ => None,
    }
}

struct Validator<'a> {
    options: &'a CompilerOptions,
    errors: Vec<ValidationError>,
    /// Loop nesting depth, to validate `break`/`continue`.
    loop_depth: u32,
    current_stage: Option<ShaderStage>,
    current_function: String,
}

impl<'a> Validator<'a> {
    fn source(&self, stmt: &Statement) -> SourceCode {
        stmt.location.file.as_ref().into()
    }

    fn check_statement(&mut self, stmt: &Statement) {
        match &stmt.kind {
            StatementKind::Break => {
                if self.loop_depth == 0 {
                    self.errors.push(ValidationError::BreakOutsideLoop {
                        source: self.source(stmt),
                        position: stmt.location.position.clone(),
                    });
                }
            }
            StatementKind::Continue => {
                if self.loop_depth == 0 {
                    self.errors.push(ValidationError::ContinueOutsideLoop {
                        source: self.source(stmt),
                        position: stmt.location.position.clone(),
                    });
                }
            }
            StatementKind::Discard => {
                if self.current_stage != Some(ShaderStage::Fragment) {
                    self.errors.push(ValidationError::DiscardOutsideFragment {
                        source: self.source(stmt),
                        position: stmt.location.position.clone(),
                    });
                }
            }
            StatementKind::While { body, .. } => {
                self.loop_depth += 1;
                self.check_statement(body);
                self.loop_depth -= 1;
            }
            StatementKind::For { body, .. } | StatementKind::ForEach { body, .. } => {
                self.loop_depth += 1;
                self.check_statement(body);
                self.loop_depth -= 1;
            }
            StatementKind::Branch { arms, else_body } => {
                for arm in arms {
                    self.check_statement(&arm.body);
                }
                if let Some(else_body) = else_body {
                    self.check_statement(else_body);
                }
            }
            StatementKind::Conditional { truthy, falsy, .. } => {
                self.check_statement(truthy);
                if let Some(falsy) = falsy {
                    self.check_statement(falsy);
                }
            }
            StatementKind::Scoped(inner) => self.check_statement(inner),
            StatementKind::Multi(statements) => {
                for s in statements {
                    self.check_statement(s);
                }
            }
            StatementKind::DeclareFunction(func) => {
                self.check_function(func);
            }
            _ => {}
        }
    }

    /// Conservative "definitely returns" check: a return statement, or a
    /// branch whose every arm (including an else) definitely returns. Loops
    /// never count since the compiler can't prove they execute.
    fn always_returns(stmt: &Statement) -> bool {
        match &stmt.kind {
            StatementKind::Return(_) | StatementKind::Discard => true,
            StatementKind::Scoped(inner) => Self::always_returns(inner),
            StatementKind::Multi(statements) => statements.iter().any(Self::always_returns),
            StatementKind::Branch { arms, else_body } => {
                let Some(else_body) = else_body else { return false };
                arms.iter().all(|arm| Self::always_returns(&arm.body)) && Self::always_returns(else_body)
            }
            StatementKind::Conditional { truthy, falsy, .. } => {
                let Some(falsy) = falsy else { return false };
                Self::always_returns(truthy) && Self::always_returns(falsy)
            }
            _ => false,
        }
    }

    fn check_function(&mut self, func: &FunctionDeclaration) {
        let is_entry = func.attributes.iter().any(|a| a.name == AttributeName::Entry);
        let previous_stage = self.current_stage;
        let previous_name = std::mem::replace(&mut self.current_function, func.name.clone());

        if is_entry {
            self.current_stage = func
                .attributes
                .iter()
                .find(|a| a.name == AttributeName::Entry)
                .and_then(|a| a.args.first())
                .and_then(|arg| match arg {
                    crate::ast::AttributeArg::Identifier(s) => ShaderStage::from_identifier(s),
                    _ => None,
                });
            self.check_entry_builtins(func);
        }

        self.check_statement(&func.body);

        if func.return_type.is_some()
            && !matches!(func.return_type, Some(ExpressionType::NoType))
            && !Self::always_returns(&func.body)
        {
            self.errors.push(ValidationError::MissingReturn {
                source: func.location.file.as_ref().into(),
                position: func.location.position.clone(),
                name: func.name.clone(),
            });
        }

        self.current_function = previous_name;
        self.current_stage = previous_stage;
    }

    fn check_entry_builtins(&mut self, func: &FunctionDeclaration) {
        let mut seen = std::collections::HashSet::new();
        for param in &func.parameters {
            let Some(builtin_attr) = param.attributes.iter().find(|a| a.name == AttributeName::Builtin) else {
                continue;
            };
            let Some(crate::ast::AttributeArg::Identifier(builtin_name)) = builtin_attr.args.first() else {
                continue;
            };
            if !seen.insert(builtin_name.clone()) {
                self.errors.push(ValidationError::DuplicateBuiltin {
                    source: param.location.file.as_ref().into(),
                    position: param.location.position.clone(),
                    name: func.name.clone(),
                    attribute: builtin_name.clone(),
                });
                continue;
            }
            if let Some(allowed) = builtin_allowed_stages(builtin_name) {
                if let Some(stage) = self.current_stage {
                    if !allowed.contains(&stage) {
                        self.errors.push(ValidationError::BuiltinStageMismatch {
                            source: param.location.file.as_ref().into(),
                            position: param.location.position.clone(),
                            name: func.name.clone(),
                            stage: stage.name().to_string(),
                            attribute: builtin_name.clone(),
                        });
                    }
                }
            }
        }
    }
}

fn check_externals(module: &Module, errors: &mut Vec<ValidationError>) {
    let mut push_constant_seen = false;
    let mut seen_bindings = std::collections::HashSet::new();

    for (_, ext) in module.externals.iter() {
        let has_set = ext.attributes.iter().any(|a| a.name == AttributeName::Set);
        let has_binding = ext.attributes.iter().any(|a| a.name == AttributeName::Binding);
        let has_auto_binding = module
            .externals
            .iter()
            .any(|(_, e)| e.attributes.iter().any(|a| a.name == AttributeName::AutoBinding));

        if matches!(ext.ty, ExpressionType::PushConstant { .. }) {
            if push_constant_seen {
                errors.push(ValidationError::MultiplePushConstants {
                    source: ext.location.file.as_ref().into(),
                    position: ext.location.position.clone(),
                });
            }
            push_constant_seen = true;
            continue;
        }

        if !has_set && !has_binding && !has_auto_binding {
            errors.push(ValidationError::MissingBinding {
                source: ext.location.file.as_ref().into(),
                position: ext.location.position.clone(),
                name: ext.name.clone(),
            });
            continue;
        }

        if has_set && has_binding {
            let set = attribute_int(ext, AttributeName::Set).unwrap_or(0);
            let binding = attribute_int(ext, AttributeName::Binding).unwrap_or(0);
            if !seen_bindings.insert((set, binding)) {
                errors.push(ValidationError::DuplicateBinding {
                    source: ext.location.file.as_ref().into(),
                    position: ext.location.position.clone(),
                    set: set as u32,
                    binding: binding as u32,
                });
            }
        }
    }
}

fn attribute_int(ext: &crate::ast::ExternalVar, name: AttributeName) -> Option<i64> {
    ext.attributes.iter().find(|a| a.name == name).and_then(|a| a.args.first()).and_then(|arg| match arg {
        crate::ast::AttributeArg::IntegerLiteral(v) => Some(*v),
        _ => None,
    })
}

fn check_struct_members(module: &Module, options: &CompilerOptions, errors: &mut Vec<ValidationError>) {
    for (_, decl) in module.structs.iter() {
        for field in &decl.fields {
            if !crate::resolve::field_cond_enabled(field, module, options) {
                continue;
            }
            let Some(builtin_attr) = field.attributes.iter().find(|a| a.name == AttributeName::Builtin) else {
                continue;
            };
            let Some(crate::ast::AttributeArg::Identifier(builtin_name)) = builtin_attr.args.first() else {
                continue;
            };
            let ok = match builtin_name.as_str() {
                "position" => matches!(&field.ty, ExpressionType::Vector { component_count: 4, primitive: PrimitiveType::F32 }),
                "vertex_index" | "instance_index" => matches!(field.ty.as_primitive(), Some(PrimitiveType::U32)),
                "front_facing" => matches!(field.ty.as_primitive(), Some(PrimitiveType::Bool)),
                "frag_depth" => matches!(field.ty.as_primitive(), Some(PrimitiveType::F32)),
                _ => true,
            };
            if !ok {
                errors.push(ValidationError::BuiltinTypeMismatch {
                    source: field.location.file.as_ref().into(),
                    position: field.location.position.clone(),
                    field: field.name.clone(),
                    attribute: builtin_name.clone(),
                });
            }
        }
    }
}

/// Walks every expression reachable from `stmt`, checking each
/// [`crate::ast::ExpressionKind::Intrinsic`] call's argument count against
/// the fixed arity table (spec §4.7 "per-intrinsic parameter signature").
/// Unlike [`Validator::check_statement`] (which only tracks control-flow
/// legality) this visits every statement kind so no intrinsic call goes
/// unchecked regardless of which statement form it's nested in.
fn check_intrinsics_in_statement(stmt: &Statement, options: &CompilerOptions, errors: &mut Vec<ValidationError>) {
    match &stmt.kind {
        StatementKind::Expression(expr) => check_intrinsics_in_expression(expr, options, errors),
        StatementKind::Return(expr) => {
            if let Some(e) = expr {
                check_intrinsics_in_expression(e, options, errors);
            }
        }
        StatementKind::DeclareVariable { value, .. } => {
            if let Some(v) = value {
                check_intrinsics_in_expression(v, options, errors);
            }
        }
        StatementKind::DeclareConst { expr, .. } => {
            if let Some(e) = expr {
                check_intrinsics_in_expression(e, options, errors);
            }
        }
        StatementKind::For { from, to, step, body, .. } => {
            check_intrinsics_in_expression(from, options, errors);
            check_intrinsics_in_expression(to, options, errors);
            if let Some(step) = step {
                check_intrinsics_in_expression(step, options, errors);
            }
            check_intrinsics_in_statement(body, options, errors);
        }
        StatementKind::ForEach { container, body, .. } => {
            check_intrinsics_in_expression(container, options, errors);
            check_intrinsics_in_statement(body, options, errors);
        }
        StatementKind::While { condition, body } => {
            check_intrinsics_in_expression(condition, options, errors);
            check_intrinsics_in_statement(body, options, errors);
        }
        StatementKind::Branch { arms, else_body } => {
            for arm in arms {
                if let Some(cond) = &arm.condition {
                    check_intrinsics_in_expression(cond, options, errors);
                }
                check_intrinsics_in_statement(&arm.body, options, errors);
            }
            if let Some(else_body) = else_body {
                check_intrinsics_in_statement(else_body, options, errors);
            }
        }
        StatementKind::Conditional { condition, truthy, falsy } => {
            check_intrinsics_in_expression(condition, options, errors);
            check_intrinsics_in_statement(truthy, options, errors);
            if let Some(falsy) = falsy {
                check_intrinsics_in_statement(falsy, options, errors);
            }
        }
        StatementKind::Scoped(inner) => check_intrinsics_in_statement(inner, options, errors),
        StatementKind::Multi(statements) => {
            for s in statements {
                check_intrinsics_in_statement(s, options, errors);
            }
        }
        StatementKind::DeclareFunction(func) => check_intrinsics_in_statement(&func.body, options, errors),
        StatementKind::Break
        | StatementKind::Continue
        | StatementKind::Discard
        | StatementKind::NoOp
        | StatementKind::DeclareAlias { .. }
        | StatementKind::DeclareExternal { .. }
        | StatementKind::DeclareOption { .. }
        | StatementKind::DeclareStruct(_)
        | StatementKind::Import { .. } => {}
    }
}

fn check_intrinsics_in_expression(expr: &Expression, options: &CompilerOptions, errors: &mut Vec<ValidationError>) {
    use ExpressionKind::*;
    match &expr.kind {
        Intrinsic { id, arguments } => {
            for a in arguments {
                check_intrinsics_in_expression(a, options, errors);
            }
            let unresolved = arguments.iter().any(|a| a.cached_expression_type.is_none());
            if options.partial_compilation && unresolved {
                return;
            }
            let expected = crate::resolve::types::intrinsic_arity(*id);
            if arguments.len() != expected {
                errors.push(ValidationError::IntrinsicArity {
                    source: expr.location.file.as_ref().into(),
                    position: expr.location.position.clone(),
                    name: format!("{id:?}"),
                    expected,
                    found: arguments.len(),
                });
            }
        }
        AccessField { expr: inner, .. } | Swizzle { expr: inner, .. } | Unary { expr: inner, .. } => {
            check_intrinsics_in_expression(inner, options, errors)
        }
        AccessIdentifier { expr: inner, .. } => check_intrinsics_in_expression(inner, options, errors),
        AccessIndex { expr: inner, indices } => {
            check_intrinsics_in_expression(inner, options, errors);
            for i in indices {
                check_intrinsics_in_expression(i, options, errors);
            }
        }
        Assign { target, value } => {
            check_intrinsics_in_expression(target, options, errors);
            check_intrinsics_in_expression(value, options, errors);
        }
        Binary { left, right, .. } => {
            check_intrinsics_in_expression(left, options, errors);
            check_intrinsics_in_expression(right, options, errors);
        }
        CallFunction { callee, arguments } => {
            check_intrinsics_in_expression(callee, options, errors);
            for a in arguments {
                check_intrinsics_in_expression(a, options, errors);
            }
        }
        CallMethod { object, arguments, .. } => {
            check_intrinsics_in_expression(object, options, errors);
            for a in arguments {
                check_intrinsics_in_expression(a, options, errors);
            }
        }
        Cast { arguments, .. } => {
            for a in arguments {
                check_intrinsics_in_expression(a, options, errors);
            }
        }
        Conditional { condition, true_expr, false_expr } => {
            check_intrinsics_in_expression(condition, options, errors);
            check_intrinsics_in_expression(true_expr, options, errors);
            check_intrinsics_in_expression(false_expr, options, errors);
        }
        Constant(_)
        | Identifier(_)
        | AliasValue { .. }
        | ConstantReference { .. }
        | FunctionReference { .. }
        | IdentifierValue { .. }
        | IntrinsicFunctionReference { .. }
        | ModuleReference { .. }
        | NamedExternalBlockReference { .. }
        | StructTypeReference { .. }
        | TypeReference { .. }
        | VariableValue { .. } => {}
    }
}

/// Dense per-category index sets collected once per [`validate_module`] run,
/// so every reference-expression's index can be checked against a live
/// declaration (spec §4.8 "Index integrity: every reference-expression index
/// names a live entry") without re-scanning the registries per node.
struct IndexSets {
    constants: std::collections::HashSet<usize>,
    functions: std::collections::HashSet<usize>,
    aliases: std::collections::HashSet<usize>,
    structs: std::collections::HashSet<usize>,
    modules: std::collections::HashSet<usize>,
}

impl IndexSets {
    fn collect(module: &Module) -> Self {
        Self {
            constants: module.constants.values().map(|c| c.index.get()).collect(),
            functions: module.functions.values().filter_map(|f| f.index.map(|i| i.get())).collect(),
            aliases: module.aliases.values().map(|a| a.index.get()).collect(),
            structs: module.structs.values().filter_map(|s| s.index.map(|i| i.get())).collect(),
            modules: (0..module.imports.len()).collect(),
        }
    }
}

/// Number of `cond`-enabled members `ty` (a resolved struct/alias type)
/// would enumerate for field-index purposes, or `None` if `ty` doesn't name
/// a struct this module declares (e.g. an imported one, not checked here).
fn struct_enabled_field_count(module: &Module, options: &CompilerOptions, ty: &ExpressionType) -> Option<usize> {
    let ExpressionType::Struct { index } = ty else { return None };
    let decl = module.structs.values().find(|s| s.index == Some(*index))?;
    Some(decl.fields.iter().filter(|f| crate::resolve::field_cond_enabled(f, module, options)).count())
}

fn check_indices_in_expression(expr: &Expression, module: &Module, options: &CompilerOptions, sets: &IndexSets, errors: &mut Vec<ValidationError>) {
    use ExpressionKind::*;

    let mut dangling = |kind: &'static str, index: usize| {
        errors.push(ValidationError::DanglingIndex {
            source: expr.location.file.as_ref().into(),
            position: expr.location.position.clone(),
            kind,
            index,
        });
    };

    match &expr.kind {
        ConstantReference { index } => {
            if !sets.constants.contains(&index.get()) {
                dangling("constant", index.get());
            }
        }
        FunctionReference { index } => {
            if !sets.functions.contains(&index.get()) {
                dangling("function", index.get());
            }
        }
        AliasValue { index } => {
            if !sets.aliases.contains(&index.get()) {
                dangling("alias", index.get());
            }
        }
        StructTypeReference { index } => {
            if !sets.structs.contains(&index.get()) {
                dangling("struct", index.get());
            }
        }
        ModuleReference { index } => {
            if !sets.modules.contains(&index.get()) {
                dangling("module", index.get());
            }
        }
        AccessField { expr: inner, field_index: Some(field_index), .. } => {
            check_indices_in_expression(inner, module, options, sets, errors);
            if let Some(count) = inner.cached_expression_type.as_ref().and_then(|ty| struct_enabled_field_count(module, options, ty)) {
                if *field_index >= count {
                    dangling("struct field", *field_index);
                }
            }
        }
        _ => {}
    }

    match &expr.kind {
        AccessField { expr: inner, .. } | Swizzle { expr: inner, .. } | Unary { expr: inner, .. } => {
            check_indices_in_expression(inner, module, options, sets, errors)
        }
        AccessIdentifier { expr: inner, .. } => check_indices_in_expression(inner, module, options, sets, errors),
        AccessIndex { expr: inner, indices } => {
            check_indices_in_expression(inner, module, options, sets, errors);
            for i in indices {
                check_indices_in_expression(i, module, options, sets, errors);
            }
        }
        Assign { target, value } => {
            check_indices_in_expression(target, module, options, sets, errors);
            check_indices_in_expression(value, module, options, sets, errors);
        }
        Binary { left, right, .. } => {
            check_indices_in_expression(left, module, options, sets, errors);
            check_indices_in_expression(right, module, options, sets, errors);
        }
        CallFunction { callee, arguments } => {
            check_indices_in_expression(callee, module, options, sets, errors);
            for a in arguments {
                check_indices_in_expression(a, module, options, sets, errors);
            }
        }
        CallMethod { object, arguments, .. } => {
            check_indices_in_expression(object, module, options, sets, errors);
            for a in arguments {
                check_indices_in_expression(a, module, options, sets, errors);
            }
        }
        Cast { arguments, .. } => {
            for a in arguments {
                check_indices_in_expression(a, module, options, sets, errors);
            }
        }
        Conditional { condition, true_expr, false_expr } => {
            check_indices_in_expression(condition, module, options, sets, errors);
            check_indices_in_expression(true_expr, module, options, sets, errors);
            check_indices_in_expression(false_expr, module, options, sets, errors);
        }
        Intrinsic { arguments, .. } => {
            for a in arguments {
                check_indices_in_expression(a, module, options, sets, errors);
            }
        }
        Constant(_)
        | Identifier(_)
        | ConstantReference { .. }
        | FunctionReference { .. }
        | AliasValue { .. }
        | StructTypeReference { .. }
        | ModuleReference { .. }
        | IdentifierValue { .. }
        | IntrinsicFunctionReference { .. }
        | NamedExternalBlockReference { .. }
        | TypeReference { .. }
        | VariableValue { .. } => {}
    }
}

fn check_indices_in_statement(stmt: &Statement, module: &Module, options: &CompilerOptions, sets: &IndexSets, errors: &mut Vec<ValidationError>) {
    match &stmt.kind {
        StatementKind::Expression(expr) => check_indices_in_expression(expr, module, options, sets, errors),
        StatementKind::Return(expr) => {
            if let Some(e) = expr {
                check_indices_in_expression(e, module, options, sets, errors);
            }
        }
        StatementKind::DeclareVariable { value, .. } => {
            if let Some(v) = value {
                check_indices_in_expression(v, module, options, sets, errors);
            }
        }
        StatementKind::DeclareConst { expr, .. } => {
            if let Some(e) = expr {
                check_indices_in_expression(e, module, options, sets, errors);
            }
        }
        StatementKind::For { from, to, step, body, .. } => {
            check_indices_in_expression(from, module, options, sets, errors);
            check_indices_in_expression(to, module, options, sets, errors);
            if let Some(step) = step {
                check_indices_in_expression(step, module, options, sets, errors);
            }
            check_indices_in_statement(body, module, options, sets, errors);
        }
        StatementKind::ForEach { container, body, .. } => {
            check_indices_in_expression(container, module, options, sets, errors);
            check_indices_in_statement(body, module, options, sets, errors);
        }
        StatementKind::While { condition, body } => {
            check_indices_in_expression(condition, module, options, sets, errors);
            check_indices_in_statement(body, module, options, sets, errors);
        }
        StatementKind::Branch { arms, else_body } => {
            for arm in arms {
                if let Some(cond) = &arm.condition {
                    check_indices_in_expression(cond, module, options, sets, errors);
                }
                check_indices_in_statement(&arm.body, module, options, sets, errors);
            }
            if let Some(else_body) = else_body {
                check_indices_in_statement(else_body, module, options, sets, errors);
            }
        }
        StatementKind::Conditional { condition, truthy, falsy } => {
            check_indices_in_expression(condition, module, options, sets, errors);
            check_indices_in_statement(truthy, module, options, sets, errors);
            if let Some(falsy) = falsy {
                check_indices_in_statement(falsy, module, options, sets, errors);
            }
        }
        StatementKind::Scoped(inner) => check_indices_in_statement(inner, module, options, sets, errors),
        StatementKind::Multi(statements) => {
            for s in statements {
                check_indices_in_statement(s, module, options, sets, errors);
            }
        }
        StatementKind::DeclareFunction(func) => check_indices_in_statement(&func.body, module, options, sets, errors),
        StatementKind::DeclareAlias { target, .. } => check_indices_in_expression(target, module, options, sets, errors),
        StatementKind::Break
        | StatementKind::Continue
        | StatementKind::Discard
        | StatementKind::NoOp
        | StatementKind::DeclareExternal { .. }
        | StatementKind::DeclareOption { .. }
        | StatementKind::DeclareStruct(_)
        | StatementKind::Import { .. } => {}
    }
}

/// Spec §4.8 bullet 1: "every reference-expression index names a live
/// entry." Runs after C6/C7 so every index that survives to this point is
/// expected to resolve; a dangling one here is a defect in an earlier pass
/// rather than a malformed source program.
fn check_index_integrity(module: &Module, options: &CompilerOptions, errors: &mut Vec<ValidationError>) {
    let sets = IndexSets::collect(module);
    check_indices_in_statement(&module.root, module, options, &sets, errors);
}

fn check_entry_point_uniqueness(module: &Module, errors: &mut Vec<ValidationError>) {
    let mut seen_stages = std::collections::HashSet::new();
    for (_, func) in module.functions.iter() {
        let Some(entry_attr) = func.attributes.iter().find(|a| a.name == AttributeName::Entry) else {
            continue;
        };
        let Some(crate::ast::AttributeArg::Identifier(stage_name)) = entry_attr.args.first() else {
            continue;
        };
        if !seen_stages.insert(stage_name.clone()) {
            errors.push(ValidationError::DuplicateEntryPoint {
                source: func.location.file.as_ref().into(),
                position: func.location.position.clone(),
                stage: stage_name.clone(),
            });
        }
    }
}

pub fn validate_module(module: &Module, options: &CompilerOptions) -> Result<(), crate::error::Error> {
    let mut validator = Validator {
        options,
        errors: Vec::new(),
        loop_depth: 0,
        current_stage: None,
        current_function: String::new(),
    };

    for (_, func) in module.functions.iter() {
        validator.check_function(func);
        check_intrinsics_in_statement(&func.body, options, &mut validator.errors);
    }

    check_externals(module, &mut validator.errors);
    check_struct_members(module, options, &mut validator.errors);
    check_entry_point_uniqueness(module, &mut validator.errors);
    check_index_integrity(module, options, &mut validator.errors);

    if let Some(err) = validator.errors.into_iter().next() {
        return Err(err.into());
    }
    Ok(())
}
