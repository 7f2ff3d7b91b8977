//! Type-expression resolution and the operand tables the identifier/type
//! resolver (C6) consults for binary/unary operators and casts (spec §4.6).
//!
//! A type written in source never gets its own grammar: the parser reuses
//! the expression grammar for the right-hand side of `:` everywhere a type
//! is expected (`parser::parse_type_expression`), leaving a raw
//! [`ExpressionType::Unresolved`] expression for this module to
//! reinterpret once imports and declarations are known (spec §3.3).

use crate::ast::*;
use crate::resolve::error::ResolveError;
use crate::resolve::Resolver;

/// Recognizes `vecN[T]`, `matN[T]`, `array[T, N]`, `dynArray[T]`,
/// `uniform[S]`, `storage[S]`, `storage[S, access]`, `push_constant[S]`,
/// `sampler{1D,2D,3D,Cube}[T]`, `sampler{..}Depth[T]`, `textureND[fmt,
/// base, access]`, bare struct/alias names, and `Module.Name` paths.
pub fn resolve_type_expression(resolver: &mut Resolver, expr: &Expression) -> Result<ExpressionType, ResolveError> {
    match &expr.kind {
        ExpressionKind::Identifier(name) => resolve_type_name(resolver, name, expr),
        ExpressionKind::AccessIndex { expr: inner, indices } => resolve_type_index(resolver, inner, indices, expr),
        ExpressionKind::AccessField { expr: inner, field_name, .. } => {
            resolve_type_path(resolver, inner, field_name, expr)
        }
        _ => Err(ResolveError::UnknownType {
            source: resolver.source_code(),
            position: expr.location.position.clone(),
            text: "<complex expression>".to_string(),
        }),
    }
}

fn resolve_type_name(resolver: &mut Resolver, name: &str, expr: &Expression) -> Result<ExpressionType, ResolveError> {
    if let Some(prim) = primitive_from_name(name) {
        return Ok(ExpressionType::Primitive(prim));
    }
    if name == "bool" {
        return Ok(ExpressionType::Primitive(PrimitiveType::Bool));
    }

    match resolver.lookup(name) {
        Some(crate::resolve::Symbol::Struct(index)) => Ok(ExpressionType::Struct { index }),
        Some(crate::resolve::Symbol::Alias(index)) => {
            let target = resolver.alias_target(index);
            Ok(ExpressionType::Alias { index, target: Box::new(target) })
        }
        Some(crate::resolve::Symbol::Module(index)) => Ok(ExpressionType::Module { index }),
        _ => Err(ResolveError::UnknownType {
            source: resolver.source_code(),
            position: expr.location.position.clone(),
            text: name.to_string(),
        }),
    }
}

fn resolve_type_path(resolver: &mut Resolver, inner: &Expression, field_name: &str, expr: &Expression) -> Result<ExpressionType, ResolveError> {
    let ExpressionKind::Identifier(module_alias) = &inner.kind else {
        return Err(ResolveError::UnknownType {
            source: resolver.source_code(),
            position: expr.location.position.clone(),
            text: "<path>".to_string(),
        });
    };

    let module = resolver
        .imported_module(module_alias)
        .ok_or_else(|| ResolveError::UnknownType {
            source: resolver.source_code(),
            position: inner.location.position.clone(),
            text: module_alias.clone(),
        })?;

    match module.structs.get(field_name).and_then(|s| s.index) {
        Some(index) => Ok(ExpressionType::Struct { index }),
        None => Err(ResolveError::UnknownField {
            source: resolver.source_code(),
            position: expr.location.position.clone(),
            field: field_name.to_string(),
        }),
    }
}

fn resolve_type_index(resolver: &mut Resolver, head: &Expression, indices: &[Expression], expr: &Expression) -> Result<ExpressionType, ResolveError> {
    let ExpressionKind::Identifier(name) = &head.kind else {
        return Err(ResolveError::UnknownType {
            source: resolver.source_code(),
            position: expr.location.position.clone(),
            text: "<complex>".to_string(),
        });
    };

    let component_primitive = |resolver: &mut Resolver, idx: &Expression| -> Result<PrimitiveType, ResolveError> {
        match resolve_type_expression(resolver, idx)? {
            ExpressionType::Primitive(p) => Ok(p),
            other => Err(ResolveError::UnknownType {
                source: resolver.source_code(),
                position: idx.location.position.clone(),
                text: format!("{other:?}"),
            }),
        }
    };

    match name.as_str() {
        "vec2" | "vec3" | "vec4" => {
            let n = match name.as_str() {
                "vec2" => 2,
                "vec3" => 3,
                _ => 4,
            };
            let primitive = component_primitive(resolver, &indices[0])?;
            Ok(ExpressionType::Vector { component_count: n, primitive })
        }
        "mat2" | "mat3" | "mat4" => {
            let n = match name.as_str() {
                "mat2" => 2,
                "mat3" => 3,
                _ => 4,
            };
            let primitive = component_primitive(resolver, &indices[0])?;
            Ok(ExpressionType::Matrix { columns: n, rows: n, primitive })
        }
        "array" => {
            let element = resolve_type_expression(resolver, &indices[0])?;
            let length = match indices.get(1).map(|e| &e.kind) {
                Some(ExpressionKind::Constant(ConstantValue::Single(SingleValue::IntLiteral(v)))) => *v as u32,
                Some(ExpressionKind::Constant(ConstantValue::Single(SingleValue::I32(v)))) => *v as u32,
                _ => {
                    return Err(ResolveError::UnknownType {
                        source: resolver.source_code(),
                        position: expr.location.position.clone(),
                        text: "array length must be a constant integer".to_string(),
                    })
                }
            };
            Ok(ExpressionType::Array { element: Box::new(element), length })
        }
        "dynArray" => {
            let element = resolve_type_expression(resolver, &indices[0])?;
            Ok(ExpressionType::DynArray { element: Box::new(element) })
        }
        "uniform" | "storage" | "push_constant" => {
            let target = resolve_type_expression(resolver, &indices[0])?;
            let ExpressionType::Struct { index } = target else {
                return Err(ResolveError::UnknownType {
                    source: resolver.source_code(),
                    position: indices[0].location.position.clone(),
                    text: "expected a struct type".to_string(),
                });
            };
            Ok(match name.as_str() {
                "uniform" => ExpressionType::Uniform { struct_index: index },
                "push_constant" => ExpressionType::PushConstant { struct_index: index },
                _ => {
                    let access = match indices.get(1).map(|e| &e.kind) {
                        Some(ExpressionKind::Identifier(s)) if s == "write" => TextureAccess::WriteOnly,
                        Some(ExpressionKind::Identifier(s)) if s == "readwrite" => TextureAccess::ReadWrite,
                        _ => TextureAccess::ReadOnly,
                    };
                    ExpressionType::Storage { struct_index: index, access }
                }
            })
        }
        "sampler1D" | "sampler2D" | "sampler3D" | "samplerCube" | "sampler1DDepth" | "sampler2DDepth" | "samplerCubeDepth" => {
            let dim = match name.as_str() {
                "sampler1D" | "sampler1DDepth" => SamplerDim::D1,
                "sampler2D" | "sampler2DDepth" => SamplerDim::D2,
                "sampler3D" => SamplerDim::D3,
                _ => SamplerDim::Cube,
            };
            let depth = name.ends_with("Depth");
            let sampled_primitive = component_primitive(resolver, &indices[0])?;
            Ok(ExpressionType::Sampler { dim, sampled_primitive, depth })
        }
        "texture1D" | "texture2D" | "texture3D" | "textureCube" => {
            let dim = match name.as_str() {
                "texture1D" => SamplerDim::D1,
                "texture2D" => SamplerDim::D2,
                "texture3D" => SamplerDim::D3,
                _ => SamplerDim::Cube,
            };
            let base = component_primitive(resolver, &indices[0])?;
            let format = match indices.get(1).map(|e| &e.kind) {
                Some(ExpressionKind::Identifier(s)) if s == "rgba8" => TextureFormat::Rgba8,
                Some(ExpressionKind::Identifier(s)) if s == "rgba32f" => TextureFormat::Rgba32F,
                Some(ExpressionKind::Identifier(s)) if s == "r32f" => TextureFormat::R32F,
                _ => TextureFormat::Unknown,
            };
            let access = match indices.get(2).map(|e| &e.kind) {
                Some(ExpressionKind::Identifier(s)) if s == "write" => TextureAccess::WriteOnly,
                Some(ExpressionKind::Identifier(s)) if s == "readwrite" => TextureAccess::ReadWrite,
                _ => TextureAccess::ReadOnly,
            };
            Ok(ExpressionType::Texture { dim, format, base, access })
        }
        other => Err(ResolveError::UnknownType {
            source: resolver.source_code(),
            position: expr.location.position.clone(),
            text: other.to_string(),
        }),
    }
}

/// Maps a bare call-site name to an intrinsic id (spec §3.4 "intrinsic");
/// the parser has no notion of intrinsics, so every `CallFunction` whose
/// callee resolves through here gets rewritten into `Intrinsic` (C6).
pub fn intrinsic_from_name(name: &str) -> Option<IntrinsicId> {
    use IntrinsicId::*;
    Some(match name {
        "array_size" => ArraySize,
        "abs" => Abs,
        "min" => Min,
        "max" => Max,
        "clamp" => Clamp,
        "lerp" | "mix" => Lerp,
        "dot" => Dot,
        "cross" => Cross,
        "length" => Length,
        "normalize" => Normalize,
        "select" => Select,
        "floor" => Floor,
        "ceil" => Ceil,
        "round" => Round,
        "sqrt" => Sqrt,
        "pow" => Pow,
        "exp" => Exp,
        "log" => Log,
        "sample" => SampleTexture,
        "reflect" => Reflect,
        _ => return None,
    })
}

/// Fixed parameter count per intrinsic (spec §4.7 "per-intrinsic
/// parameter signature"). Every intrinsic here takes a fixed arity; none
/// of the currently-supported ones are variadic.
pub fn intrinsic_arity(id: IntrinsicId) -> usize {
    use IntrinsicId::*;
    match id {
        ArraySize | Length | Normalize | Floor | Ceil | Round | Sqrt | Exp | Log => 1,
        Min | Max | Dot | Cross | Pow | SampleTexture | Reflect => 2,
        Clamp | Lerp | Select => 3,
        Abs => 1,
    }
}

fn primitive_from_name(name: &str) -> Option<PrimitiveType> {
    Some(match name {
        "bool" => PrimitiveType::Bool,
        "f32" => PrimitiveType::F32,
        "f64" => PrimitiveType::F64,
        "i32" => PrimitiveType::I32,
        "u32" => PrimitiveType::U32,
        "string" => PrimitiveType::String,
        _ => return None,
    })
}

// ---------------------------------------------------------------------
// Binary / unary operand tables (spec §4.6, §4.7, §8)
// ---------------------------------------------------------------------

/// Picks the result type of `op` applied to `left`/`right`, coercing an
/// untyped-literal operand to the other operand's concrete type first
/// (spec §4.6). Returns `None` when the pair is unsupported for `op`
/// (spec §8 "permitted operand table").
pub fn binary_result_type(op: BinaryOp, left: &ExpressionType, right: &ExpressionType) -> Option<ExpressionType> {
    let (left, right) = coerce_untyped_pair(left, right);

    use BinaryOp::*;
    match op {
        Eq | NotEq | Lt | Le | Gt | Ge => {
            if types_comparable(&left, &right) {
                Some(ExpressionType::Primitive(PrimitiveType::Bool))
            } else {
                None
            }
        }
        LogicalAnd | LogicalOr => {
            if matches!((&left, &right), (ExpressionType::Primitive(PrimitiveType::Bool), ExpressionType::Primitive(PrimitiveType::Bool))) {
                Some(ExpressionType::Primitive(PrimitiveType::Bool))
            } else {
                None
            }
        }
        Mul | Div | Mod => arithmetic_with_broadcast(op, &left, &right),
        Add | Sub => arithmetic_exact(&left, &right),
        BitAnd | BitOr | BitXor | Shl | Shr => integer_bitwise(&left, &right),
    }
}

fn coerce_untyped_pair(left: &ExpressionType, right: &ExpressionType) -> (ExpressionType, ExpressionType) {
    match (left.as_primitive(), right.as_primitive()) {
        (Some(l), Some(r)) if l.is_untyped() && !r.is_untyped() => (ExpressionType::Primitive(r), right.clone()),
        (Some(l), Some(r)) if r.is_untyped() && !l.is_untyped() => (left.clone(), ExpressionType::Primitive(l)),
        (Some(l), Some(r)) if l.is_untyped() && r.is_untyped() => {
            let narrowed = l.default_concrete();
            (ExpressionType::Primitive(narrowed), ExpressionType::Primitive(narrowed))
        }
        _ => (left.clone(), right.clone()),
    }
}

fn types_comparable(left: &ExpressionType, right: &ExpressionType) -> bool {
    match (left, right) {
        (ExpressionType::Primitive(l), ExpressionType::Primitive(r)) => l.is_numeric() == r.is_numeric() || l == r,
        (ExpressionType::Vector { component_count: lc, primitive: lp }, ExpressionType::Vector { component_count: rc, primitive: rp }) => {
            lc == rc && lp == rp
        }
        _ => left == right,
    }
}

/// `+`/`-`: operand shapes must match exactly (spec §4.7 "`+ -` require
/// matching types").
fn arithmetic_exact(left: &ExpressionType, right: &ExpressionType) -> Option<ExpressionType> {
    match (left, right) {
        (ExpressionType::Primitive(l), ExpressionType::Primitive(r)) if l == r && l.is_numeric() => {
            Some(ExpressionType::Primitive(*l))
        }
        (
            ExpressionType::Vector { component_count: lc, primitive: lp },
            ExpressionType::Vector { component_count: rc, primitive: rp },
        ) if lc == rc && lp == rp && lp.is_numeric() => Some(left.clone()),
        (ExpressionType::Matrix { columns: lc, rows: lr, primitive: lp }, ExpressionType::Matrix { columns: rc, rows: rr, primitive: rp })
            if lc == rc && lr == rr && lp == rp =>
        {
            Some(left.clone())
        }
        _ => None,
    }
}

/// `* / %`: scalar-vs-vector broadcasting is permitted (spec §4.7), plus
/// matrix-vector/matrix-matrix/matrix-scalar dispatch for `*` (spec
/// §4.10.5 picks the concrete opcode; here we only need the result type).
fn arithmetic_with_broadcast(op: BinaryOp, left: &ExpressionType, right: &ExpressionType) -> Option<ExpressionType> {
    match (left, right) {
        (ExpressionType::Primitive(l), ExpressionType::Primitive(r)) if l == r && l.is_numeric() => {
            Some(ExpressionType::Primitive(*l))
        }
        (ExpressionType::Vector { component_count, primitive: vp }, ExpressionType::Primitive(sp)) if vp == sp && vp.is_numeric() => {
            Some(ExpressionType::Vector { component_count: *component_count, primitive: *vp })
        }
        (ExpressionType::Primitive(sp), ExpressionType::Vector { component_count, primitive: vp }) if vp == sp && vp.is_numeric() => {
            Some(ExpressionType::Vector { component_count: *component_count, primitive: *vp })
        }
        (ExpressionType::Vector { component_count: lc, primitive: lp }, ExpressionType::Vector { component_count: rc, primitive: rp })
            if lc == rc && lp == rp && lp.is_numeric() =>
        {
            Some(left.clone())
        }
        (ExpressionType::Matrix { primitive: mp, .. }, ExpressionType::Primitive(sp)) if op == BinaryOp::Mul && mp == sp => {
            Some(left.clone())
        }
        (ExpressionType::Primitive(sp), ExpressionType::Matrix { primitive: mp, .. }) if op == BinaryOp::Mul && mp == sp => {
            Some(right.clone())
        }
        (ExpressionType::Matrix { columns, rows, primitive: mp }, ExpressionType::Vector { component_count, primitive: vp })
            if op == BinaryOp::Mul && mp == vp && columns == component_count =>
        {
            Some(ExpressionType::Vector { component_count: *rows, primitive: *mp })
        }
        (ExpressionType::Vector { component_count, primitive: vp }, ExpressionType::Matrix { columns, rows, primitive: mp })
            if op == BinaryOp::Mul && mp == vp && rows == component_count =>
        {
            Some(ExpressionType::Vector { component_count: *columns, primitive: *mp })
        }
        (ExpressionType::Matrix { columns: lc, rows: lr, primitive: lp }, ExpressionType::Matrix { columns: rc, rows: rr, primitive: rp })
            if op == BinaryOp::Mul && lp == rp && lc == rr =>
        {
            Some(ExpressionType::Matrix { columns: *rc, rows: *lr, primitive: *lp })
        }
        _ => None,
    }
}

fn integer_bitwise(left: &ExpressionType, right: &ExpressionType) -> Option<ExpressionType> {
    match (left, right) {
        (ExpressionType::Primitive(l), ExpressionType::Primitive(r)) if l == r && l.is_integer() => Some(ExpressionType::Primitive(*l)),
        (ExpressionType::Vector { component_count: lc, primitive: lp }, ExpressionType::Vector { component_count: rc, primitive: rp })
            if lc == rc && lp == rp && lp.is_integer() =>
        {
            Some(left.clone())
        }
        _ => None,
    }
}

pub fn unary_result_type(op: UnaryOp, operand: &ExpressionType) -> Option<ExpressionType> {
    let operand = if let Some(p) = operand.as_primitive() {
        ExpressionType::Primitive(p.default_concrete())
    } else {
        operand.clone()
    };

    match op {
        UnaryOp::Negate | UnaryOp::Plus => match &operand {
            ExpressionType::Primitive(p) if p.is_numeric() => Some(operand.clone()),
            ExpressionType::Vector { primitive, .. } if primitive.is_numeric() => Some(operand.clone()),
            _ => None,
        },
        UnaryOp::LogicalNot => match &operand {
            ExpressionType::Primitive(PrimitiveType::Bool) => Some(operand.clone()),
            _ => None,
        },
        UnaryOp::BitNot => match &operand {
            ExpressionType::Primitive(p) if p.is_integer() => Some(operand.clone()),
            ExpressionType::Vector { primitive, .. } if primitive.is_integer() => Some(operand.clone()),
            _ => None,
        },
    }
}

/// Cast validation (spec §4.6): scalar→scalar is numeric↔numeric only;
/// vector construction from a flat scalar sequence, a single same-size
/// vector (with base-type conversion), or a scalar/vector mix whose base
/// types agree; matrix construction from one matrix of the same shape, one
/// vector per column, or a flat `cols*rows` scalar sequence (or a single
/// broadcast scalar).
pub fn validate_cast(target: &ExpressionType, args: &[ExpressionType]) -> Result<(), String> {
    match target {
        ExpressionType::Primitive(t) => {
            if args.len() != 1 {
                return Err(format!("scalar cast to `{t:?}` takes exactly one argument"));
            }
            match args[0].as_primitive() {
                Some(s) if s.is_numeric() && t.is_numeric() => Ok(()),
                Some(PrimitiveType::Bool) if matches!(t, PrimitiveType::Bool) => Ok(()),
                _ => Err(format!("cannot cast {:?} to {:?}", args[0], t)),
            }
        }
        ExpressionType::Vector { component_count, primitive } => validate_vector_cast(*component_count, *primitive, args),
        ExpressionType::Matrix { columns, rows, primitive } => validate_matrix_cast(*columns, *rows, *primitive, args),
        _ => Err("target is not a constructible type".to_string()),
    }
}

fn validate_vector_cast(n: u8, primitive: PrimitiveType, args: &[ExpressionType]) -> Result<(), String> {
    if args.len() == 1 {
        if let ExpressionType::Vector { component_count, primitive: ap } = &args[0] {
            if *component_count == n && (ap.is_numeric() == primitive.is_numeric() || *ap == primitive) {
                return Ok(());
            }
        }
    }

    let mut total = 0u8;
    for a in args {
        match a {
            ExpressionType::Primitive(p) if p.base_base_matches(primitive) => total += 1,
            ExpressionType::Vector { component_count, primitive: ap } if ap.base_base_matches(primitive) => total += component_count,
            _ => return Err("vector constructor argument has the wrong base type".to_string()),
        }
    }
    if total == n {
        Ok(())
    } else {
        Err(format!("vector constructor expects {n} total components, found {total}"))
    }
}

fn validate_matrix_cast(columns: u8, rows: u8, primitive: PrimitiveType, args: &[ExpressionType]) -> Result<(), String> {
    if args.len() == 1 {
        match &args[0] {
            ExpressionType::Matrix { columns: c, rows: r, primitive: p } if *c == columns && *r == rows && *p == primitive => {
                return Ok(())
            }
            ExpressionType::Primitive(p) if p.base_base_matches(primitive) => return Ok(()),
            _ => {}
        }
    }

    if args.len() as u8 == columns && args.iter().all(|a| matches!(a, ExpressionType::Vector { component_count, primitive: p } if *component_count == rows && p.base_base_matches(primitive)))
    {
        return Ok(());
    }

    if args.len() as u8 == columns * rows && args.iter().all(|a| matches!(a, ExpressionType::Primitive(p) if p.base_base_matches(primitive))) {
        return Ok(());
    }

    Err(format!("matrix constructor does not match {columns}x{rows} shape"))
}

trait BaseBaseMatch {
    fn base_base_matches(self, other: PrimitiveType) -> bool;
}
impl BaseBaseMatch for PrimitiveType {
    fn base_base_matches(self, other: PrimitiveType) -> bool {
        self == other || (self.is_untyped() && self.is_numeric() == other.is_numeric())
    }
}
