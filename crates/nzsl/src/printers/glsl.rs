//! C11 — GLSL / GLSL ES printer (spec §4.11, §6.4): "produces a single
//! translation unit per entry point... generated entry function is always
//! `main`... external bindings are linearized when `--gl-bindingmap` is
//! set." Described at the interface level only (spec §1): this transforms
//! the AST to GLSL's textual restrictions rather than reusing the [`super::nzsl`]
//! printer's syntax, but does not attempt the SPIR-V backend's full
//! structured-control-flow lowering — GLSL's `if`/`while`/`for` already say
//! what the AST says.

use std::collections::HashMap;
use std::ops::Range;

use nzsl_diagnostics_core::SourceCode;
use nzsl_diagnostics_macros::Diagnostic;

use crate::ast::*;
use crate::options::CompilerOptions;
use crate::printers::common::{format_type, primitive_name};

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum GlslError {
    #[error("module has no `[entry(...)]` function to emit a GLSL translation unit for")]
    #[diagnostic(code = "glsl::no-entry-point")]
    NoEntryPoint {
        #[source_code]
        source: SourceCode,
        #[label("module declared here")]
        position: Range<usize>,
    },
}

/// GLSL identifiers reserved by the language that a struct field/variable
/// name must not clash with (spec §4.11 "renames struct fields that clash
/// with reserved words").
const RESERVED: &[&str] = &[
    "input", "output", "texture", "sampler", "attribute", "varying", "uniform", "buffer", "struct", "common",
    "partition", "active", "filter", "image", "coherent", "readonly", "writeonly",
];

fn safe_name(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

fn entry_stage(func: &FunctionDeclaration) -> Option<&'static str> {
    let attr = func.attributes.iter().find(|a| a.name == AttributeName::Entry)?;
    let AttributeArg::Identifier(stage) = attr.args.first()? else { return None };
    match stage.as_str() {
        "vert" => Some("vert"),
        "frag" => Some("frag"),
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

fn location_of(attrs: &Attributes) -> Option<i64> {
    attrs.iter().find(|a| a.name == AttributeName::Location).and_then(|a| a.args.first()).and_then(|a| match a {
        AttributeArg::IntegerLiteral(v) => Some(*v),
        _ => None,
    })
}

fn binding_of(attrs: &Attributes) -> Option<i64> {
    attrs.iter().find(|a| a.name == AttributeName::Binding).and_then(|a| a.args.first()).and_then(|a| match a {
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

/// Maps an input builtin to its GLSL built-in variable, where one exists.
fn input_builtin_glsl(name: &str) -> Option<&'static str> {
    match name {
        "frag_coord" => Some("gl_FragCoord"),
        "vertex_index" => Some("gl_VertexID"),
        "instance_index" => Some("gl_InstanceID"),
        "front_facing" => Some("gl_FrontFacing"),
        _ => None,
    }
}

fn output_builtin_glsl(name: &str) -> Option<&'static str> {
    match name {
        "position" => Some("gl_Position"),
        "frag_depth" => Some("gl_FragDepth"),
        _ => None,
    }
}

/// Linearizes `(set, binding)` pairs over every external in declaration
/// order into a flat GLSL binding index, the table `--gl-bindingmap`
/// side-writes as JSON (spec §6.1, §6.4). Exposed so the CLI can reuse the
/// exact same numbering the emitted source uses.
pub fn linearize_bindings(module: &Module) -> Vec<((u32, u32), u32)> {
    let mut out = Vec::new();
    for (i, (_, ext)) in module.externals.iter().enumerate() {
        let set = set_of(&ext.attributes) as u32;
        let binding = binding_of(&ext.attributes).unwrap_or(0) as u32;
        out.push(((set, binding), i as u32));
    }
    out
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

fn glsl_type(ty: &ExpressionType, structs: &StructNames) -> String {
    match ty.resolve_alias() {
        ExpressionType::Primitive(PrimitiveType::Bool) => "bool".to_string(),
        ExpressionType::Primitive(p) => primitive_name(*p).to_string(),
        ExpressionType::Vector { component_count, primitive } => {
            let prefix = match primitive {
                PrimitiveType::I32 => "i",
                PrimitiveType::U32 => "u",
                PrimitiveType::Bool => "b",
                _ => "",
            };
            format!("{prefix}vec{component_count}")
        }
        ExpressionType::Matrix { columns, rows, .. } if columns == rows => format!("mat{columns}"),
        ExpressionType::Matrix { columns, rows, .. } => format!("mat{columns}x{rows}"),
        ExpressionType::Array { element, length } => format!("{}[{length}]", glsl_type(element, structs)),
        ExpressionType::DynArray { element } => format!("{}[]", glsl_type(element, structs)),
        ExpressionType::Struct { index } => structs.get(index.get()),
        ExpressionType::Sampler { dim, sampled_primitive, depth } => {
            let prefix = match sampled_primitive {
                PrimitiveType::I32 => "i",
                PrimitiveType::U32 => "u",
                _ => "",
            };
            let dim_name = match dim {
                SamplerDim::D1 => "1D",
                SamplerDim::D2 => "2D",
                SamplerDim::D3 => "3D",
                SamplerDim::Cube => "Cube",
            };
            if *depth {
                format!("sampler{dim_name}Shadow")
            } else {
                format!("{prefix}sampler{dim_name}")
            }
        }
        other => format_type(other, &|i| structs.get(i), &|_| "Alias".to_string()),
    }
}

/// Generates one GLSL translation unit for the module's (single) entry
/// point, at the stage it declares (spec §6.4 "caller chooses stage" means
/// "the module's entry attribute chooses it" here, since the core has no
/// separate stage selector).
pub fn generate(module: &Module, options: &CompilerOptions) -> Result<String, crate::error::Error> {
    let structs = StructNames::from_module(module);
    let entry = module
        .functions
        .iter()
        .find_map(|(name, f)| entry_stage(f).map(|stage| (name.clone(), f, stage)));

    let Some((entry_name, entry_func, stage)) = entry else {
        return Err(GlslError::NoEntryPoint { source: module_source(module), position: 0..0 }.into());
    };

    let mut out = String::new();
    let version = options.glsl.version;
    if options.glsl.es {
        out.push_str(&format!("#version {version} es\n"));
        out.push_str("precision highp float;\n");
    } else {
        out.push_str(&format!("#version {version}\n"));
    }
    out.push('\n');

    for (name, decl) in module.structs.iter() {
        // Entry parameter/return structs get flattened into in/out
        // variables below rather than emitted as a GLSL `struct`.
        if is_io_struct(module, decl, &entry_name) {
            continue;
        }
        out.push_str(&format!("struct {name} {{\n"));
        for field in &decl.fields {
            out.push_str(&format!("\t{} {};\n", glsl_type(&field.ty, &structs), safe_name(&field.name)));
        }
        out.push_str("};\n\n");
    }

    let mut binding_counter: u32 = 0;
    for (name, ext) in module.externals.iter() {
        let binding = if options.glsl.emit_binding_map {
            let b = binding_counter;
            binding_counter += 1;
            b
        } else {
            binding_of(&ext.attributes).unwrap_or(0) as u32
        };
        match ext.ty.resolve_alias() {
            ExpressionType::Uniform { struct_index } | ExpressionType::Storage { struct_index, .. } => {
                let struct_name = structs.get(struct_index.get());
                out.push_str(&format!("layout(binding = {binding}, std140) uniform {name}_Block {{\n\t{struct_name} {name};\n}};\n"));
            }
            other => {
                out.push_str(&format!("layout(binding = {binding}) uniform {} {name};\n", glsl_type(other, &structs)));
            }
        }
    }
    out.push('\n');

    // Flatten the entry's parameter struct(s) into `in` variables and its
    // return struct into `out` variables.
    let mut input_names: HashMap<String, String> = HashMap::new();
    for param in &entry_func.parameters {
        if let ExpressionType::Struct { index } = param.ty.resolve_alias() {
            if let Some((_, decl)) = module.structs.iter().find(|(_, d)| d.index == Some(*index)) {
                for field in &decl.fields {
                    let builtin = builtin_of(&field.attributes);
                    if let Some(glsl_builtin) = builtin.as_deref().and_then(input_builtin_glsl) {
                        input_names.insert(format!("{}.{}", param.name, field.name), glsl_builtin.to_string());
                        continue;
                    }
                    let loc = location_of(&field.attributes).unwrap_or(0);
                    let var_name = safe_name(&field.name);
                    out.push_str(&format!("layout(location = {loc}) in {} {var_name};\n", glsl_type(&field.ty, &structs)));
                    input_names.insert(format!("{}.{}", param.name, field.name), var_name);
                }
            }
        }
    }

    let mut output_names: HashMap<String, String> = HashMap::new();
    if let Some(ExpressionType::Struct { index }) = entry_func.return_type.as_ref().map(|t| t.resolve_alias().clone()) {
        if let Some((_, decl)) = module.structs.iter().find(|(_, d)| d.index == Some(index)) {
            for field in &decl.fields {
                let builtin = builtin_of(&field.attributes);
                if let Some(glsl_builtin) = builtin.as_deref().and_then(output_builtin_glsl) {
                    output_names.insert(field.name.clone(), glsl_builtin.to_string());
                    continue;
                }
                let loc = location_of(&field.attributes).unwrap_or(0);
                let var_name = safe_name(&field.name);
                out.push_str(&format!("layout(location = {loc}) out {} {var_name};\n", glsl_type(&field.ty, &structs)));
                output_names.insert(field.name.clone(), var_name);
            }
        }
    }
    out.push('\n');

    // All other (non-entry) functions print with their C-style signature;
    // the entry point itself always becomes `void main()` (spec §6.4).
    for (name, func) in module.functions.iter() {
        if name == &entry_name {
            continue;
        }
        print_function(&mut out, func, name, &structs, &input_names, &HashMap::new());
    }

    out.push_str("void main() {\n");
    let mut printer = BodyPrinter { structs: &structs, input_names: &input_names, output_names: &output_names, out: &mut out, return_via_outputs: true };
    printer.print_statement(&entry_func.body, 1);

    if stage == "vert" && options.glsl.flip_y {
        out.push_str("\tgl_Position.y = -gl_Position.y;\n");
    }
    if stage == "vert" && options.glsl.remap_z {
        out.push_str("\tgl_Position.z = (gl_Position.z + gl_Position.w) * 0.5;\n");
    }
    out.push_str("}\n");

    Ok(out)
}

fn module_source(module: &Module) -> SourceCode {
    SourceCode { source: String::new(), name: module.metadata.module_name.clone().unwrap_or_default() }
}

fn is_io_struct(module: &Module, decl: &StructDeclaration, entry_name: &str) -> bool {
    let Some((_, entry)) = module.functions.iter().find(|(n, _)| n.as_str() == entry_name) else {
        return false;
    };
    let is_param = entry.parameters.iter().any(|p| matches!(p.ty.resolve_alias(), ExpressionType::Struct { index } if Some(*index) == decl.index));
    let is_return = matches!(entry.return_type.as_ref().map(|t| t.resolve_alias()), Some(ExpressionType::Struct { index }) if Some(*index) == decl.index);
    is_param || is_return
}

fn print_function(
    out: &mut String,
    func: &FunctionDeclaration,
    name: &str,
    structs: &StructNames,
    input_names: &HashMap<String, String>,
    output_names: &HashMap<String, String>,
) {
    let ret = func.return_type.as_ref().map(|t| glsl_type(t, structs)).unwrap_or_else(|| "void".to_string());
    let params = func
        .parameters
        .iter()
        .map(|p| format!("{} {}", glsl_type(&p.ty, structs), safe_name(&p.name)))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!("{ret} {name}({params}) {{\n"));
    let mut printer = BodyPrinter { structs, input_names, output_names, out, return_via_outputs: false };
    printer.print_statement(&func.body, 1);
    out.push_str("}\n\n");
}

struct BodyPrinter<'a> {
    structs: &'a StructNames,
    input_names: &'a HashMap<String, String>,
    output_names: &'a HashMap<String, String>,
    out: &'a mut String,
    return_via_outputs: bool,
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
                let ty = ty.as_ref().map(|t| glsl_type(t, self.structs)).unwrap_or_else(|| "float".to_string());
                self.out.push_str(&format!("{ty} {}", safe_name(name)));
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
                if self.return_via_outputs {
                    if let Some(e) = e {
                        self.emit_struct_return(e, depth);
                    }
                    self.out.push_str("return;\n");
                } else {
                    match e {
                        Some(e) => self.out.push_str(&format!("return {};\n", self.expr(e))),
                        None => self.out.push_str("return;\n"),
                    }
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
                    "for (int {variable} = {}; {variable} < {}; {variable} += {step_expr}) {{\n",
                    self.expr(from),
                    self.expr(to)
                ));
                self.print_statement(body, depth + 1);
                self.indent(depth);
                self.out.push_str("}\n");
            }
            StatementKind::ForEach { body, .. } => {
                // GLSL has no container iteration; the validator/resolver
                // are expected to have already lowered this away outside
                // this printer's scope (spec §1 "out of scope").
                self.print_statement(body, depth);
            }
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

    fn emit_struct_return(&mut self, expr: &Expression, depth: usize) {
        // Best-effort: only handles the common case of an entry function
        // ending in `return StructName(a, b, c);` by positional construction.
        if let ExpressionKind::Cast { arguments, .. } = &expr.kind {
            let names: Vec<String> = self.output_names.values().cloned().collect();
            for (i, arg) in arguments.iter().enumerate() {
                if let Some(out_name) = names.get(i) {
                    self.indent(depth);
                    self.out.push_str(&format!("{out_name} = {};\n", self.expr(arg)));
                }
            }
        }
    }

    fn expr(&self, expr: &Expression) -> String {
        use ExpressionKind::*;
        match &expr.kind {
            Constant(c) => constant_str(c),
            Identifier(name) => name.clone(),
            AccessField { expr: inner, field_name, .. } => {
                let path = field_path(inner, field_name);
                if let Some(mapped) = self.input_names.get(&path) {
                    mapped.clone()
                } else {
                    format!("{}.{}", self.expr(inner), safe_name(field_name))
                }
            }
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
                let ty = match target_type.ty() {
                    Some(t) => glsl_type(t, self.structs),
                    None => "/* cast */".to_string(),
                };
                format!("{ty}({})", self.arg_list(arguments))
            }
            Conditional { condition, true_expr, false_expr } => {
                format!("({} ? {} : {})", self.expr(condition), self.expr(true_expr), self.expr(false_expr))
            }
            Swizzle { expr: inner, components } => {
                format!("{}.{}", self.expr(inner), components.iter().map(|c| swizzle_char(*c)).collect::<String>())
            }
            Unary { op, expr: inner } => format!("{}{}", unary_op_str(*op), self.expr(inner)),
            Intrinsic { id, arguments } => format!("{}({})", intrinsic_glsl_name(*id), self.arg_list(arguments)),
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

fn field_path(inner: &Expression, field_name: &str) -> String {
    match &inner.kind {
        ExpressionKind::VariableValue { .. } | ExpressionKind::IdentifierValue { .. } | ExpressionKind::Identifier(_) => {
            format!("{}.{field_name}", param_name_of(inner))
        }
        _ => field_name.to_string(),
    }
}

fn param_name_of(expr: &Expression) -> String {
    match &expr.kind {
        ExpressionKind::Identifier(name) => name.clone(),
        _ => String::new(),
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
        ConstantValue::Array(items) => format!("{{{}}}", items.iter().map(single_str).collect::<Vec<_>>().join(", ")),
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

fn intrinsic_glsl_name(id: IntrinsicId) -> &'static str {
    use IntrinsicId::*;
    match id {
        ArraySize => "/* array_size: use .length() */",
        Abs => "abs",
        Min => "min",
        Max => "max",
        Clamp => "clamp",
        Lerp => "mix",
        Dot => "dot",
        Cross => "cross",
        Length => "length",
        Normalize => "normalize",
        Select => "mix",
        Floor => "floor",
        Ceil => "ceil",
        Round => "round",
        Sqrt => "sqrt",
        Pow => "pow",
        Exp => "exp",
        Log => "log",
        SampleTexture => "texture",
        Reflect => "reflect",
    }
}
