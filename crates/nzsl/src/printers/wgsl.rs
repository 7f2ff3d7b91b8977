//! C11 — WGSL printer (spec §4.11): transforms the AST to WGSL's textual
//! restrictions. Described at the interface level only (spec §1); unlike
//! [`super::glsl`] WGSL needs no binding linearization pass (its
//! `@group(N) @binding(M)` attributes already carry the same numbers the
//! source declared).

use std::collections::HashMap;
use std::ops::Range;

use nzsl_diagnostics_core::SourceCode;
use nzsl_diagnostics_macros::Diagnostic;

use crate::ast::*;
use crate::printers::common::primitive_name;

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum WgslError {
    #[error("module has no `[entry(...)]` function to emit a WGSL shader for")]
    #[diagnostic(code = "wgsl::no-entry-point")]
    NoEntryPoint {
        #[source_code]
        source: SourceCode,
        #[label("module declared here")]
        position: Range<usize>,
    },
}

struct StructNames(HashMap<usize, String>);

impl StructNames {
    fn from_module(module: &Module) -> Self {
        let mut map = HashMap::new();
        for (name, decl) in module.structs.iter() {
            if let Some(index) = decl.index {
                map.insert(index.get(), name.clone());
            }
        }
        Self(map)
    }

    fn get(&self, index: usize) -> String {
        self.0.get(&index).cloned().unwrap_or_else(|| format!("Struct{index}"))
    }
}

/// WGSL reserved identifiers a struct field must not clash with (spec
/// §4.11).
const RESERVED: &[&str] = &["fn", "var", "let", "struct", "type", "array", "ptr", "texture", "sampler", "override"];

fn safe_name(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

fn wgsl_type(ty: &ExpressionType, structs: &StructNames) -> String {
    match ty.resolve_alias() {
        ExpressionType::Primitive(PrimitiveType::Bool) => "bool".to_string(),
        ExpressionType::Primitive(p) => primitive_name(*p).to_string(),
        ExpressionType::Vector { component_count, primitive } => format!("vec{component_count}<{}>", wgsl_scalar(*primitive)),
        ExpressionType::Matrix { columns, rows, primitive } => format!("mat{columns}x{rows}<{}>", wgsl_scalar(*primitive)),
        ExpressionType::Array { element, length } => format!("array<{}, {length}>", wgsl_type(element, structs)),
        ExpressionType::DynArray { element } => format!("array<{}>", wgsl_type(element, structs)),
        ExpressionType::Struct { index } => structs.get(index.get()),
        ExpressionType::Uniform { struct_index } | ExpressionType::Storage { struct_index, .. } | ExpressionType::PushConstant { struct_index } => {
            structs.get(struct_index.get())
        }
        ExpressionType::Sampler { depth: true, .. } => "sampler_comparison".to_string(),
        ExpressionType::Sampler { .. } => "sampler".to_string(),
        ExpressionType::Texture { dim, base, .. } => {
            let dim_name = match dim {
                SamplerDim::D1 => "1d",
                SamplerDim::D2 => "2d",
                SamplerDim::D3 => "3d",
                SamplerDim::Cube => "cube",
            };
            format!("texture_{dim_name}<{}>", wgsl_scalar(*base))
        }
        _ => "f32".to_string(),
    }
}

fn wgsl_scalar(p: PrimitiveType) -> &'static str {
    match p {
        PrimitiveType::I32 | PrimitiveType::IntLiteral => "i32",
        PrimitiveType::U32 => "u32",
        PrimitiveType::Bool => "bool",
        _ => "f32",
    }
}

fn entry_stage(func: &FunctionDeclaration) -> Option<&'static str> {
    let attr = func.attributes.iter().find(|a| a.name == AttributeName::Entry)?;
    let AttributeArg::Identifier(stage) = attr.args.first()? else { return None };
    match stage.as_str() {
        "vert" => Some("vertex"),
        "frag" => Some("fragment"),
        "compute" => Some("compute"),
        _ => None,
    }
}

fn builtin_of(attrs: &Attributes) -> Option<String> {
    attrs.iter().find(|a| a.name == AttributeName::Builtin).and_then(|a| a.args.first()).and_then(|a| match a {
        AttributeArg::Identifier(s) => Some(s.clone()),
        _ => None,
    })
}

fn wgsl_builtin(name: &str) -> Option<&'static str> {
    match name {
        "position" => Some("position"),
        "vertex_index" => Some("vertex_index"),
        "instance_index" => Some("instance_index"),
        "front_facing" => Some("front_facing"),
        "frag_depth" => Some("frag_depth"),
        _ => None,
    }
}

fn location_of(attrs: &Attributes) -> Option<i64> {
    attrs.iter().find(|a| a.name == AttributeName::Location).and_then(|a| a.args.first()).and_then(|a| match a {
        AttributeArg::IntegerLiteral(v) => Some(*v),
        _ => None,
    })
}

fn set_of(attrs: &Attributes) -> i64 {
    attrs
        .iter()
        .find(|a| a.name == AttributeName::Set)
        .and_then(|a| a.args.first())
        .and_then(|a| match a {
            AttributeArg::IntegerLiteral(v) => Some(*v),
            _ => None,
        })
        .unwrap_or(0)
}

fn binding_of(attrs: &Attributes) -> i64 {
    attrs
        .iter()
        .find(|a| a.name == AttributeName::Binding)
        .and_then(|a| a.args.first())
        .and_then(|a| match a {
            AttributeArg::IntegerLiteral(v) => Some(*v),
            _ => None,
        })
        .unwrap_or(0)
}

fn io_member(field: &StructField, structs: &StructNames) -> String {
    if let Some(builtin) = builtin_of(&field.attributes).as_deref().and_then(wgsl_builtin) {
        format!("\t@builtin({builtin}) {}: {},\n", safe_name(&field.name), wgsl_type(&field.ty, structs))
    } else {
        let loc = location_of(&field.attributes).unwrap_or(0);
        format!("\t@location({loc}) {}: {},\n", safe_name(&field.name), wgsl_type(&field.ty, structs))
    }
}

pub fn generate(module: &Module) -> Result<String, crate::error::Error> {
    let structs = StructNames::from_module(module);
    let entry = module.functions.iter().find_map(|(name, f)| entry_stage(f).map(|stage| (name.clone(), f, stage)));
    let Some((entry_name, entry_func, stage)) = entry else {
        return Err(WgslError::NoEntryPoint {
            source: SourceCode { source: String::new(), name: module.metadata.module_name.clone().unwrap_or_default() },
            position: 0..0,
        }
        .into());
    };

    let mut out = String::new();

    for (name, decl) in module.structs.iter() {
        out.push_str(&format!("struct {name} {{\n"));
        for field in &decl.fields {
            if entry_io_field(module, &entry_name, decl) {
                out.push_str(&io_member(field, &structs));
            } else {
                out.push_str(&format!("\t{}: {},\n", safe_name(&field.name), wgsl_type(&field.ty, &structs)));
            }
        }
        out.push_str("}\n\n");
    }

    for (name, ext) in module.externals.iter() {
        let set = set_of(&ext.attributes);
        let binding = binding_of(&ext.attributes);
        let qualifier = match ext.ty.resolve_alias() {
            ExpressionType::Uniform { .. } => "uniform",
            ExpressionType::Storage { access, .. } => match access {
                TextureAccess::ReadOnly => "storage, read",
                TextureAccess::WriteOnly => "storage, write",
                TextureAccess::ReadWrite => "storage, read_write",
            },
            ExpressionType::Sampler { .. } | ExpressionType::Texture { .. } => "",
            _ => "uniform",
        };
        if qualifier.is_empty() {
            out.push_str(&format!("@group({set}) @binding({binding}) var {name}: {};\n", wgsl_type(&ext.ty, &structs)));
        } else {
            out.push_str(&format!("@group({set}) @binding({binding}) var<{qualifier}> {name}: {};\n", wgsl_type(&ext.ty, &structs)));
        }
    }
    out.push('\n');

    for (name, func) in module.functions.iter() {
        if name == &entry_name {
            continue;
        }
        print_function(&mut out, name, func, &structs);
    }

    out.push_str(&format!("@{stage}\n"));
    print_function(&mut out, &entry_name, entry_func, &structs);

    Ok(out)
}

fn entry_io_field(module: &Module, entry_name: &str, decl: &StructDeclaration) -> bool {
    let Some((_, entry)) = module.functions.iter().find(|(n, _)| n.as_str() == entry_name) else {
        return false;
    };
    entry.parameters.iter().any(|p| matches!(p.ty.resolve_alias(), ExpressionType::Struct { index } if Some(*index) == decl.index))
        || matches!(entry.return_type.as_ref().map(|t| t.resolve_alias()), Some(ExpressionType::Struct { index }) if Some(*index) == decl.index)
}

fn print_function(out: &mut String, name: &str, func: &FunctionDeclaration, structs: &StructNames) {
    let params = func
        .parameters
        .iter()
        .map(|p| format!("{}: {}", safe_name(&p.name), wgsl_type(&p.ty, structs)))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!("fn {name}({params})"));
    if let Some(ret) = &func.return_type {
        out.push_str(&format!(" -> {}", wgsl_type(ret, structs)));
    }
    out.push_str(" {\n");
    let mut printer = BodyPrinter { structs, out };
    printer.print_statement(&func.body, 1);
    out.push_str("}\n\n");
}

struct BodyPrinter<'a> {
    structs: &'a StructNames,
    out: &'a mut String,
}

impl<'a> BodyPrinter<'a> {
    fn indent(&mut self, depth: usize) {
        self.out.push_str(&"\t".repeat(depth));
    }

    fn print_statement(&mut self, stmt: &Statement, depth: usize) {
        match &stmt.kind {
            StatementKind::Multi(list) => {
                for s in list {
                    self.print_statement(s, depth);
                }
            }
            StatementKind::NoOp => {}
            StatementKind::Scoped(inner) => {
                self.indent(depth);
                self.out.push_str("{\n");
                self.print_statement(inner, depth + 1);
                self.indent(depth);
                self.out.push_str("}\n");
            }
            StatementKind::DeclareVariable { name, ty, value, .. } => {
                self.indent(depth);
                self.out.push_str(&format!("var {}", safe_name(name)));
                if let Some(ty) = ty {
                    self.out.push_str(&format!(": {}", wgsl_type(ty, self.structs)));
                }
                if let Some(v) = value {
                    self.out.push_str(&format!(" = {}", self.expr(v)));
                }
                self.out.push_str(";\n");
            }
            StatementKind::Expression(e) => {
                self.indent(depth);
                self.out.push_str(&self.expr(e));
                self.out.push_str(";\n");
            }
            StatementKind::Return(e) => {
                self.indent(depth);
                match e {
                    Some(e) => self.out.push_str(&format!("return {};\n", self.expr(e))),
                    None => self.out.push_str("return;\n"),
                }
            }
            StatementKind::Break => {
                self.indent(depth);
                self.out.push_str("break;\n");
            }
            StatementKind::Continue => {
                self.indent(depth);
                self.out.push_str("continue;\n");
            }
            StatementKind::Discard => {
                self.indent(depth);
                self.out.push_str("discard;\n");
            }
            StatementKind::While { condition, body } => {
                self.indent(depth);
                self.out.push_str(&format!("while ({}) {{\n", self.expr(condition)));
                self.print_statement(body, depth + 1);
                self.indent(depth);
                self.out.push_str("}\n");
            }
            StatementKind::For { variable, from, to, step, body, .. } => {
                self.indent(depth);
                let step_expr = step.as_ref().map(|s| self.expr(s)).unwrap_or_else(|| "1".to_string());
                self.out.push_str(&format!(
                    "for (var {variable} = {}; {variable} < {}; {variable} += {step_expr}) {{\n",
                    self.expr(from),
                    self.expr(to)
                ));
                self.print_statement(body, depth + 1);
                self.indent(depth);
                self.out.push_str("}\n");
            }
            StatementKind::ForEach { body, .. } => self.print_statement(body, depth),
            StatementKind::Branch { arms, else_body } => {
                for (i, arm) in arms.iter().enumerate() {
                    self.indent(depth);
                    if i > 0 {
                        self.out.push_str("else ");
                    }
                    let cond = arm.condition.as_ref().map(|c| self.expr(c)).unwrap_or_default();
                    self.out.push_str(&format!("if ({cond}) {{\n"));
                    self.print_statement(&arm.body, depth + 1);
                    self.indent(depth);
                    self.out.push_str("}\n");
                }
                if let Some(else_body) = else_body {
                    self.indent(depth);
                    self.out.push_str("else {\n");
                    self.print_statement(else_body, depth + 1);
                    self.indent(depth);
                    self.out.push_str("}\n");
                }
            }
            StatementKind::Conditional { truthy, falsy, .. } => {
                self.print_statement(truthy, depth);
                if let Some(falsy) = falsy {
                    self.print_statement(falsy, depth);
                }
            }
            StatementKind::DeclareConst { .. }
            | StatementKind::DeclareAlias { .. }
            | StatementKind::DeclareExternal { .. }
            | StatementKind::DeclareStruct(_)
            | StatementKind::DeclareFunction(_)
            | StatementKind::DeclareOption { .. }
            | StatementKind::Import { .. } => {}
        }
    }

    fn expr(&self, expr: &Expression) -> String {
        use ExpressionKind::*;
        match &expr.kind {
            Constant(c) => constant_str(c),
            Identifier(name) => name.clone(),
            AccessField { expr: inner, field_name, .. } => format!("{}.{}", self.expr(inner), safe_name(field_name)),
            AccessIdentifier { expr: inner, identifiers } => format!("{}.{}", self.expr(inner), identifiers.join(".")),
            AccessIndex { expr: inner, indices } => {
                let idx = indices.iter().map(|i| self.expr(i)).collect::<Vec<_>>().join("][");
                format!("{}[{idx}]", self.expr(inner))
            }
            Assign { target, value } => format!("{} = {}", self.expr(target), self.expr(value)),
            Binary { op, left, right } => format!("({} {} {})", self.expr(left), binary_op_str(*op), self.expr(right)),
            CallFunction { callee, arguments } => format!("{}({})", self.expr(callee), self.arg_list(arguments)),
            CallMethod { object, method, arguments } => format!("{}.{method}({})", self.expr(object), self.arg_list(arguments)),
            Cast { target_type, arguments } => {
                let ty = target_type.ty().map(|t| wgsl_type(t, self.structs)).unwrap_or_else(|| "/* cast */".to_string());
                format!("{ty}({})", self.arg_list(arguments))
            }
            Conditional { condition, true_expr, false_expr } => {
                format!("select({}, {}, {})", self.expr(false_expr), self.expr(true_expr), self.expr(condition))
            }
            Swizzle { expr: inner, components } => format!("{}.{}", self.expr(inner), components.iter().map(|c| swizzle_char(*c)).collect::<String>()),
            Unary { op, expr: inner } => format!("{}{}", unary_op_str(*op), self.expr(inner)),
            Intrinsic { id, arguments } => format!("{}({})", intrinsic_wgsl_name(*id), self.arg_list(arguments)),
            IdentifierValue { .. } | VariableValue { .. } => "v".to_string(),
            ConstantReference { .. } | FunctionReference { .. } | AliasValue { .. } | ModuleReference { .. }
            | NamedExternalBlockReference { .. } | StructTypeReference { .. } | TypeReference { .. }
            | IntrinsicFunctionReference { .. } => "/* ref */".to_string(),
        }
    }

    fn arg_list(&self, args: &[Expression]) -> String {
        args.iter().map(|a| self.expr(a)).collect::<Vec<_>>().join(", ")
    }
}

fn swizzle_char(c: u8) -> char {
    match c {
        0 => 'x',
        1 => 'y',
        2 => 'z',
        3 => 'w',
        _ => '?',
    }
}

fn constant_str(value: &ConstantValue) -> String {
    match value {
        ConstantValue::Single(s) => single_str(s),
        ConstantValue::Array(items) => format!("array({})", items.iter().map(single_str).collect::<Vec<_>>().join(", ")),
    }
}

fn single_str(value: &SingleValue) -> String {
    match value {
        SingleValue::Bool(b) => b.to_string(),
        SingleValue::F32(v) => format!("{v:?}"),
        SingleValue::F64(v) => format!("{v:?}"),
        SingleValue::I32(v) => v.to_string(),
        SingleValue::U32(v) => format!("{v}u"),
        SingleValue::String(s) => format!("{s:?}"),
        SingleValue::IntLiteral(v) => v.to_string(),
        SingleValue::FloatLiteral(v) => format!("{v:?}"),
        SingleValue::Vec2(v) => format!("vec2({}, {})", single_str(&v[0]), single_str(&v[1])),
        SingleValue::Vec3(v) => format!("vec3({}, {}, {})", single_str(&v[0]), single_str(&v[1]), single_str(&v[2])),
        SingleValue::Vec4(v) => format!("vec4({}, {}, {}, {})", single_str(&v[0]), single_str(&v[1]), single_str(&v[2]), single_str(&v[3])),
    }
}

fn binary_op_str(op: BinaryOp) -> &'static str {
    use BinaryOp::*;
    match op {
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div => "/",
        Mod => "%",
        BitAnd => "&",
        BitOr => "|",
        BitXor => "^",
        Shl => "<<",
        Shr => ">>",
        Eq => "==",
        NotEq => "!=",
        Lt => "<",
        Le => "<=",
        Gt => ">",
        Ge => ">=",
        LogicalAnd => "&&",
        LogicalOr => "||",
    }
}

fn unary_op_str(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Negate => "-",
        UnaryOp::Plus => "+",
        UnaryOp::LogicalNot => "!",
        UnaryOp::BitNot => "~",
    }
}

fn intrinsic_wgsl_name(id: IntrinsicId) -> &'static str {
    use IntrinsicId::*;
    match id {
        ArraySize => "arrayLength",
        Abs => "abs",
        Min => "min",
        Max => "max",
        Clamp => "clamp",
        Lerp => "mix",
        Dot => "dot",
        Cross => "cross",
        Length => "length",
        Normalize => "normalize",
        Select => "select",
        Floor => "floor",
        Ceil => "ceil",
        Round => "round",
        Sqrt => "sqrt",
        Pow => "pow",
        Exp => "exp",
        Log => "log",
        SampleTexture => "textureSample",
        Reflect => "reflect",
    }
}
