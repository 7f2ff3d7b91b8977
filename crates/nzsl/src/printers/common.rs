//! Shared helpers the three text emitters (`nzsl`, `glsl`, `wgsl`) all need:
//! turning a resolved [`ExpressionType`] back into a type name, and walking
//! a module's externals/structs/functions in declaration order.

use crate::ast::{ExpressionType, PrimitiveType, SamplerDim, TextureAccess, TextureFormat};

pub fn primitive_name(p: PrimitiveType) -> &'static str {
    match p {
        PrimitiveType::Bool => "bool",
        PrimitiveType::F32 => "f32",
        PrimitiveType::F64 => "f64",
        PrimitiveType::I32 => "i32",
        PrimitiveType::U32 => "u32",
        PrimitiveType::String => "string",
        PrimitiveType::IntLiteral => "i32",
        PrimitiveType::FloatLiteral => "f32",
    }
}

fn sampler_dim_name(dim: SamplerDim, depth: bool) -> &'static str {
    match (dim, depth) {
        (SamplerDim::D1, false) => "sampler1D",
        (SamplerDim::D1, true) => "sampler1DDepth",
        (SamplerDim::D2, false) => "sampler2D",
        (SamplerDim::D2, true) => "sampler2DDepth",
        (SamplerDim::D3, false) => "sampler3D",
        (SamplerDim::D3, true) => "sampler3DDepth",
        (SamplerDim::Cube, false) => "samplerCube",
        (SamplerDim::Cube, true) => "samplerCubeDepth",
    }
}

fn texture_dim_name(dim: SamplerDim) -> &'static str {
    match dim {
        SamplerDim::D1 => "texture1D",
        SamplerDim::D2 => "texture2D",
        SamplerDim::D3 => "texture3D",
        SamplerDim::Cube => "textureCube",
    }
}

fn texture_format_name(fmt: TextureFormat) -> &'static str {
    match fmt {
        TextureFormat::Rgba8 => "rgba8",
        TextureFormat::Rgba32F => "rgba32f",
        TextureFormat::R32F => "r32f",
        TextureFormat::Unknown => "unknown",
    }
}

fn texture_access_name(access: TextureAccess) -> &'static str {
    match access {
        TextureAccess::ReadOnly => "read",
        TextureAccess::WriteOnly => "write",
        TextureAccess::ReadWrite => "readwrite",
    }
}

/// Reconstructs the `nzsl_version`-syntax spelling of a resolved type
/// (`vec3[f32]`, `array[f32, 4]`, `uniform[Block]`, ...), the inverse of
/// `resolve::types::resolve_type_expression`. Struct/alias/module names are
/// looked up by index through the accessors a caller supplies, since the
/// type itself only carries the index.
pub fn format_type(ty: &ExpressionType, struct_name: &impl Fn(usize) -> String, alias_name: &impl Fn(usize) -> String) -> String {
    match ty {
        ExpressionType::NoType => String::new(),
        ExpressionType::Primitive(p) => primitive_name(*p).to_string(),
        ExpressionType::Vector { component_count, primitive } => {
            format!("vec{component_count}[{}]", primitive_name(*primitive))
        }
        ExpressionType::Matrix { columns, rows, primitive } => {
            if columns == rows {
                format!("mat{columns}[{}]", primitive_name(*primitive))
            } else {
                format!("mat{columns}x{rows}[{}]", primitive_name(*primitive))
            }
        }
        ExpressionType::Array { element, length } => {
            format!("array[{}, {length}]", format_type(element, struct_name, alias_name))
        }
        ExpressionType::DynArray { element } => format!("dynArray[{}]", format_type(element, struct_name, alias_name)),
        ExpressionType::Struct { index } => struct_name(index.get()),
        ExpressionType::Alias { index, .. } => alias_name(index.get()),
        ExpressionType::Function { .. } => "<function>".to_string(),
        ExpressionType::Method { .. } => "<method>".to_string(),
        ExpressionType::Intrinsic { .. } => "<intrinsic>".to_string(),
        ExpressionType::Sampler { dim, sampled_primitive, depth } => {
            format!("{}[{}]", sampler_dim_name(*dim, *depth), primitive_name(*sampled_primitive))
        }
        ExpressionType::Texture { dim, format, base, access } => {
            format!(
                "{}[{}, {}, {}]",
                texture_dim_name(*dim),
                primitive_name(*base),
                texture_format_name(*format),
                texture_access_name(*access)
            )
        }
        ExpressionType::Storage { struct_index, access } => {
            format!("storage[{}, {}]", struct_name(struct_index.get()), texture_access_name(*access))
        }
        ExpressionType::Uniform { struct_index } => format!("uniform[{}]", struct_name(struct_index.get())),
        ExpressionType::PushConstant { struct_index } => format!("push_constant[{}]", struct_name(struct_index.get())),
        ExpressionType::Module { .. } => "<module>".to_string(),
        ExpressionType::NamedExternalBlock { .. } => "<external block>".to_string(),
        ExpressionType::Type { index } => format_type(index, struct_name, alias_name),
        ExpressionType::Unresolved(_) => "<unresolved>".to_string(),
        ExpressionType::ImplicitVector { component_count } => format!("<vec{component_count}>"),
        ExpressionType::ImplicitMatrix { columns, rows } => format!("<mat{columns}x{rows}>"),
        ExpressionType::ImplicitArray => "<array>".to_string(),
    }
}
