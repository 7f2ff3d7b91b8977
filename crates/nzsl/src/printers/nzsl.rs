//! C11 — source-language printer (spec §4.11): a full round trip (modulo
//! whitespace) for a parsed and resolved module. Imported sub-modules are
//! re-emitted as inlined `module <name> { ... }` blocks; attributes print
//! only when `attr.has_value()` (spec §4.2 `ExpressionValue::has_value`).
//!
//! This is the reference the other two printers (`glsl`, `wgsl`) diff
//! against: it is the only one of the three with a round-trip law attached
//! (spec §8 "Parse-print round trip").

use std::collections::HashMap;

use crate::ast::*;
use crate::printers::common::format_type;

pub fn generate(module: &Module) -> String {
    let mut printer = Printer::new(module);
    printer.print_module(module, 0, false);
    printer.out
}

struct Printer<'m> {
    out: String,
    struct_names: HashMap<usize, String>,
    alias_names: HashMap<usize, String>,
    module: &'m Module,
}

impl<'m> Printer<'m> {
    fn new(module: &'m Module) -> Self {
        let mut struct_names = HashMap::new();
        for (name, decl) in module.structs.iter() {
            if let Some(index) = decl.index {
                struct_names.insert(index.get(), name.clone());
            }
        }
        let mut alias_names = HashMap::new();
        for (name, info) in module.aliases.iter() {
            alias_names.insert(info.index.get(), name.clone());
        }
        Self { out: String::new(), struct_names, alias_names, module }
    }

    fn ty(&self, ty: &ExpressionType) -> String {
        format_type(ty, &|i| self.struct_names.get(&i).cloned().unwrap_or_else(|| format!("Struct{i}")), &|i| {
            self.alias_names.get(&i).cloned().unwrap_or_else(|| format!("Alias{i}"))
        })
    }

    fn indent(&mut self, depth: usize) {
        self.out.push_str(&"\t".repeat(depth));
    }

    fn print_module(&mut self, module: &Module, depth: usize, nested: bool) {
        let attrs = module_attrs_string(module);
        if !attrs.is_empty() {
            self.indent(depth);
            self.out.push_str(&attrs);
            self.out.push('\n');
        }
        self.indent(depth);
        if nested {
            self.out.push_str("module ");
            self.out.push_str(module.metadata.module_name.as_deref().unwrap_or(""));
            self.out.push_str(" {\n");
        } else {
            match &module.metadata.module_name {
                Some(name) => self.out.push_str(&format!("module {name};\n")),
                None => self.out.push_str("module;\n"),
            }
        }

        for imported in &module.imports {
            self.indent(depth + nested as usize);
            self.print_module(&imported.module, depth + nested as usize, true);
        }

        self.print_statement(&module.root, depth + nested as usize);

        if nested {
            self.indent(depth);
            self.out.push_str("}\n");
        }
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
            StatementKind::DeclareStruct(decl) => self.print_struct(decl, depth),
            StatementKind::DeclareFunction(func) => self.print_function(func, depth),
            StatementKind::DeclareExternal { name, vars, attributes, .. } => {
                self.indent(depth);
                let attrs = attrs_string(attributes);
                if !attrs.is_empty() {
                    self.out.push_str(&attrs);
                    self.out.push(' ');
                }
                self.out.push_str("external");
                if let Some(name) = name {
                    self.out.push(' ');
                    self.out.push_str(name);
                }
                self.out.push_str(" {\n");
                for var in vars {
                    self.indent(depth + 1);
                    let vattrs = attrs_string(&var.attributes);
                    if !vattrs.is_empty() {
                        self.out.push_str(&vattrs);
                        self.out.push(' ');
                    }
                    self.out.push_str(&format!("{}: {},\n", var.name, self.ty(&var.ty)));
                }
                self.indent(depth);
                self.out.push_str("}\n");
            }
            StatementKind::DeclareAlias { name, target, attributes, .. } => {
                self.indent(depth);
                let attrs = attrs_string(attributes);
                if !attrs.is_empty() {
                    self.out.push_str(&attrs);
                    self.out.push(' ');
                }
                self.out.push_str(&format!("alias {name} = {};\n", self.expr(target)));
            }
            StatementKind::DeclareConst { name, ty, value, expr, .. } => {
                self.indent(depth);
                self.out.push_str("const ");
                self.out.push_str(name);
                if let Some(ty) = ty {
                    self.out.push_str(&format!(": {}", self.ty(ty)));
                }
                self.out.push_str(" = ");
                match (value, expr) {
                    (ExpressionValue::Value(v), _) => self.out.push_str(&self.constant(v)),
                    (_, Some(e)) => self.out.push_str(&self.expr(e)),
                    (ExpressionValue::Expression(e), _) => self.out.push_str(&self.expr(e)),
                    _ => {}
                }
                self.out.push_str(";\n");
            }
            StatementKind::DeclareOption { name, ty, default, default_expr, .. } => {
                self.indent(depth);
                self.out.push_str(&format!("option {name}: {}", self.ty(ty)));
                match (default, default_expr) {
                    (ExpressionValue::Value(v), _) => self.out.push_str(&format!(" = {}", self.constant(v))),
                    (_, Some(e)) => self.out.push_str(&format!(" = {}", self.expr(e))),
                    (ExpressionValue::Expression(e), _) => self.out.push_str(&format!(" = {}", self.expr(e))),
                    _ => {}
                }
                self.out.push_str(";\n");
            }
            StatementKind::DeclareVariable { name, ty, value, .. } => {
                self.indent(depth);
                self.out.push_str("let ");
                self.out.push_str(name);
                if let Some(ty) = ty {
                    self.out.push_str(&format!(": {}", self.ty(ty)));
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
                self.out.push_str(&format!("while ({})\n", self.expr(condition)));
                self.print_statement(body, depth);
            }
            StatementKind::For { variable, from, to, step, body, .. } => {
                self.indent(depth);
                self.out.push_str(&format!("for {variable} in {}..{}", self.expr(from), self.expr(to)));
                if let Some(step) = step {
                    self.out.push_str(&format!(" : {}", self.expr(step)));
                }
                self.out.push('\n');
                self.print_statement(body, depth);
            }
            StatementKind::ForEach { variable, container, body, .. } => {
                self.indent(depth);
                self.out.push_str(&format!("for {variable} in {}\n", self.expr(container)));
                self.print_statement(body, depth);
            }
            StatementKind::Branch { arms, else_body } => {
                for (i, arm) in arms.iter().enumerate() {
                    self.indent(depth);
                    if i > 0 {
                        self.out.push_str("else ");
                    }
                    if arm.is_const {
                        self.out.push_str("const ");
                    }
                    let cond = arm.condition.as_ref().map(|c| self.expr(c)).unwrap_or_default();
                    self.out.push_str(&format!("if ({cond})\n"));
                    self.print_statement(&arm.body, depth);
                }
                if let Some(else_body) = else_body {
                    self.indent(depth);
                    self.out.push_str("else\n");
                    self.print_statement(else_body, depth);
                }
            }
            StatementKind::Conditional { condition, truthy, falsy } => {
                self.indent(depth);
                self.out.push_str(&format!("const if ({})\n", self.expr(condition)));
                self.print_statement(truthy, depth);
                if let Some(falsy) = falsy {
                    self.indent(depth);
                    self.out.push_str("else\n");
                    self.print_statement(falsy, depth);
                }
            }
            StatementKind::Import { module_path, alias, identifiers, .. } => {
                self.indent(depth);
                if identifiers.is_empty() {
                    self.out.push_str(&format!("import {}", module_path.join(".")));
                    if let Some(alias) = alias {
                        self.out.push_str(&format!(" as {alias}"));
                    }
                } else {
                    let names = identifiers
                        .iter()
                        .map(|(name, alias)| match alias {
                            Some(a) => format!("{name} as {a}"),
                            None => name.clone(),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.out.push_str(&format!("import {names} from {}", module_path.join(".")));
                }
                self.out.push_str(";\n");
            }
        }
    }

    fn print_struct(&mut self, decl: &StructDeclaration, depth: usize) {
        self.indent(depth);
        let attrs = attrs_string(&decl.attributes);
        if !attrs.is_empty() {
            self.out.push_str(&attrs);
            self.out.push(' ');
        }
        self.out.push_str(&format!("struct {} {{\n", decl.name));
        for field in &decl.fields {
            self.indent(depth + 1);
            let fattrs = attrs_string(&field.attributes);
            if !fattrs.is_empty() {
                self.out.push_str(&fattrs);
                self.out.push(' ');
            }
            self.out.push_str(&format!("{}: {},\n", field.name, self.ty(&field.ty)));
        }
        self.indent(depth);
        self.out.push_str("}\n");
    }

    fn print_function(&mut self, func: &FunctionDeclaration, depth: usize) {
        self.indent(depth);
        let attrs = attrs_string(&func.attributes);
        if !attrs.is_empty() {
            self.out.push_str(&attrs);
            self.out.push(' ');
        }
        self.out.push_str(&format!("fn {}(", func.name));
        let params = func
            .parameters
            .iter()
            .map(|p| {
                let sem = match p.semantic {
                    ParameterSemantic::In => "",
                    ParameterSemantic::Out => "out ",
                    ParameterSemantic::Inout => "inout ",
                };
                format!("{sem}{}: {}", p.name, self.ty(&p.ty))
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.out.push_str(&params);
        self.out.push(')');
        if let Some(ret) = &func.return_type {
            self.out.push_str(&format!(" -> {}", self.ty(ret)));
        }
        self.out.push('\n');
        self.print_statement(&func.body, depth);
    }

    fn constant(&self, value: &ConstantValue) -> String {
        match value {
            ConstantValue::Single(single) => self.single(single),
            ConstantValue::Array(items) => {
                let inner = items.iter().map(|v| self.single(v)).collect::<Vec<_>>().join(", ");
                format!("[{inner}]")
            }
        }
    }

    fn single(&self, value: &SingleValue) -> String {
        match value {
            SingleValue::Bool(b) => b.to_string(),
            SingleValue::F32(v) => format!("{v:?}"),
            SingleValue::F64(v) => format!("{v:?}"),
            SingleValue::I32(v) => v.to_string(),
            SingleValue::U32(v) => format!("{v}u32"),
            SingleValue::String(s) => format!("{s:?}"),
            SingleValue::IntLiteral(v) => v.to_string(),
            SingleValue::FloatLiteral(v) => format!("{v:?}"),
            SingleValue::Vec2(v) => format!("vec2({}, {})", self.single(&v[0]), self.single(&v[1])),
            SingleValue::Vec3(v) => format!("vec3({}, {}, {})", self.single(&v[0]), self.single(&v[1]), self.single(&v[2])),
            SingleValue::Vec4(v) => format!("vec4({}, {}, {}, {})", self.single(&v[0]), self.single(&v[1]), self.single(&v[2]), self.single(&v[3])),
        }
    }

    fn expr(&self, expr: &Expression) -> String {
        match &expr.kind {
            ExpressionKind::Constant(c) => self.constant(c),
            ExpressionKind::Identifier(name) => name.clone(),
            ExpressionKind::AccessField { expr, field_name, .. } => format!("{}.{field_name}", self.expr(expr)),
            ExpressionKind::AccessIdentifier { expr, identifiers } => {
                format!("{}.{}", self.expr(expr), identifiers.join("."))
            }
            ExpressionKind::AccessIndex { expr, indices } => {
                let idx = indices.iter().map(|i| self.expr(i)).collect::<Vec<_>>().join(", ");
                format!("{}[{idx}]", self.expr(expr))
            }
            ExpressionKind::AliasValue { index } => {
                self.alias_names.get(&index.get()).cloned().unwrap_or_else(|| format!("Alias{}", index.get()))
            }
            ExpressionKind::Assign { target, value } => format!("{} = {}", self.expr(target), self.expr(value)),
            ExpressionKind::Binary { op, left, right } => format!("({} {} {})", self.expr(left), binary_op_str(*op), self.expr(right)),
            ExpressionKind::CallFunction { callee, arguments } => {
                format!("{}({})", self.expr(callee), self.arg_list(arguments))
            }
            ExpressionKind::CallMethod { object, method, arguments } => {
                format!("{}.{method}({})", self.expr(object), self.arg_list(arguments))
            }
            ExpressionKind::Cast { target_type, arguments } => {
                format!("{}({})", self.expr(target_type), self.arg_list(arguments))
            }
            ExpressionKind::Conditional { condition, true_expr, false_expr } => {
                format!("const_select({}, {}, {})", self.expr(condition), self.expr(true_expr), self.expr(false_expr))
            }
            ExpressionKind::ConstantReference { index } => {
                self.module.constants.iter().find(|(_, info)| info.index == *index).map(|(n, _)| n.clone()).unwrap_or_else(|| format!("Const{}", index.get()))
            }
            ExpressionKind::FunctionReference { index } => {
                self.module.functions.iter().find(|(_, f)| f.index == Some(*index)).map(|(n, _)| n.clone()).unwrap_or_else(|| format!("Fn{}", index.get()))
            }
            ExpressionKind::IdentifierValue { index } | ExpressionKind::VariableValue { index } => format!("$v{}", index.get()),
            ExpressionKind::Intrinsic { id, arguments } => format!("{}({})", intrinsic_name(*id), self.arg_list(arguments)),
            ExpressionKind::IntrinsicFunctionReference { id } => intrinsic_name(*id).to_string(),
            ExpressionKind::ModuleReference { index } => format!("$m{}", index.get()),
            ExpressionKind::NamedExternalBlockReference { index } => format!("$ext{}", index.get()),
            ExpressionKind::StructTypeReference { index } => {
                self.struct_names.get(&index.get()).cloned().unwrap_or_else(|| format!("Struct{}", index.get()))
            }
            ExpressionKind::Swizzle { expr, components } => {
                format!("{}.{}", self.expr(expr), components.iter().map(|c| swizzle_char(*c)).collect::<String>())
            }
            ExpressionKind::TypeReference { ty } => self.ty(ty),
            ExpressionKind::Unary { op, expr } => format!("{}{}", unary_op_str(*op), self.expr(expr)),
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

fn intrinsic_name(id: IntrinsicId) -> &'static str {
    use IntrinsicId::*;
    match id {
        ArraySize => "array_size",
        Abs => "abs",
        Min => "min",
        Max => "max",
        Clamp => "clamp",
        Lerp => "lerp",
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
        SampleTexture => "sample",
        Reflect => "reflect",
    }
}

fn attr_arg_string(arg: &AttributeArg) -> String {
    match arg {
        AttributeArg::Identifier(s) => s.clone(),
        AttributeArg::StringLiteral(s) => format!("{s:?}"),
        AttributeArg::IntegerLiteral(v) => v.to_string(),
        AttributeArg::Expression(_) => "<expr>".to_string(),
    }
}

fn attr_name_str(name: &AttributeName) -> &'static str {
    use AttributeName::*;
    match name {
        Author => "author",
        Binding => "binding",
        Builtin => "builtin",
        Cond => "cond",
        DepthWrite => "depth_write",
        Desc => "desc",
        EarlyFragmentTests => "early_fragment_tests",
        Entry => "entry",
        Export => "export",
        Feature => "feature",
        Interp => "interp",
        Layout => "layout",
        License => "license",
        Location => "location",
        NzslVersion => "nzsl_version",
        Set => "set",
        Tag => "tag",
        Unroll => "unroll",
        Workgroup => "workgroup",
        AutoBinding => "auto_binding",
    }
}

/// Prints only attributes with `has_value() == true` (spec §4.11).
fn attrs_string(attrs: &Attributes) -> String {
    let rendered: Vec<String> = attrs
        .iter()
        .filter(|a| a.has_value())
        .map(|a| {
            if a.args.is_empty() {
                attr_name_str(&a.name).to_string()
            } else {
                let args = a.args.iter().map(attr_arg_string).collect::<Vec<_>>().join(", ");
                format!("{}({args})", attr_name_str(&a.name))
            }
        })
        .collect();
    if rendered.is_empty() {
        String::new()
    } else {
        format!("[{}]", rendered.join(", "))
    }
}

fn module_attrs_string(module: &Module) -> String {
    let mut parts = Vec::new();
    if let Some(v) = module.metadata.lang_version {
        parts.push(format!("nzsl_version(\"{}.{}.{}\")", v.major, v.minor, v.patch));
    }
    if let Some(author) = &module.metadata.author {
        parts.push(format!("author({author:?})"));
    }
    if let Some(desc) = &module.metadata.description {
        parts.push(format!("desc({desc:?})"));
    }
    if let Some(license) = &module.metadata.license {
        parts.push(format!("license({license:?})"));
    }
    for feature in &module.metadata.features {
        let name = match feature {
            LanguageFeature::F64 => "f64",
            LanguageFeature::PrimitiveExternals => "primitive_externals",
            LanguageFeature::Texture1D => "texture_1d",
        };
        parts.push(format!("feature({name})"));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("[{}]", parts.join(", "))
    }
}
