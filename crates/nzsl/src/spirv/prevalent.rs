//! Module-wide pre-visitor (spec §4.10 step before per-function emission):
//! walks the whole program once to assign function ids, enumerate
//! entry-point I/O variables, assign storage classes to externals, and
//! collect the set of capabilities and extended instruction sets the
//! module actually needs. The emitter consults this plan instead of
//! re-deriving any of it mid-emission.

use std::collections::BTreeSet;

use crate::ast::{AttributeName, ExpressionType, FunctionDeclaration, Module};
use crate::options::CompilerOptions;

use super::cache::StorageClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Shader,
    Float64,
    Sampled1D,
}

impl Capability {
    pub fn word(self) -> u32 {
        match self {
            Capability::Shader => 1,
            Capability::Float64 => 10,
            Capability::Sampled1D => 43,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionModel {
    Vertex,
    Fragment,
    GlCompute,
}

impl ExecutionModel {
    pub fn word(self) -> u32 {
        match self {
            ExecutionModel::Vertex => 0,
            ExecutionModel::Fragment => 4,
            ExecutionModel::GlCompute => 5,
        }
    }
}

pub struct EntryPointPlan {
    pub function_name: String,
    pub model: ExecutionModel,
    pub interface_variables: Vec<String>,
}

pub struct ExternalPlan {
    pub name: String,
    pub storage_class: StorageClass,
    pub set: Option<u32>,
    pub binding: Option<u32>,
}

pub struct ModulePlan {
    pub capabilities: BTreeSet<Capability>,
    pub needs_glsl_ext_inst: bool,
    pub entry_points: Vec<EntryPointPlan>,
    pub externals: Vec<ExternalPlan>,
}

fn attribute_u32(attrs: &crate::ast::Attributes, name: AttributeName) -> Option<u32> {
    attrs.iter().find(|a| a.name == name).and_then(|a| a.args.first()).and_then(|arg| match arg {
        crate::ast::AttributeArg::IntegerLiteral(v) => Some(*v as u32),
        _ => None,
    })
}

fn entry_model(func: &FunctionDeclaration) -> Option<ExecutionModel> {
    let attr = func.attributes.iter().find(|a| a.name == AttributeName::Entry)?;
    let crate::ast::AttributeArg::Identifier(stage) = attr.args.first()? else { return None };
    match stage.as_str() {
        "vert" => Some(ExecutionModel::Vertex),
        "frag" => Some(ExecutionModel::Fragment),
        "compute" => Some(ExecutionModel::GlCompute),
        _ => None,
    }
}

fn uses_f64(ty: &ExpressionType) -> bool {
    matches!(ty.base_primitive(), Some(crate::ast::PrimitiveType::F64))
}

fn uses_sampler_1d(ty: &ExpressionType) -> bool {
    matches!(ty.resolve_alias(), ExpressionType::Sampler { dim: crate::ast::SamplerDim::D1, .. })
}

pub fn plan_module(module: &Module, options: &CompilerOptions) -> Result<ModulePlan, crate::error::Error> {
    let mut capabilities = BTreeSet::new();
    capabilities.insert(Capability::Shader);
    let mut needs_glsl_ext_inst = false;

    let mut entry_points = Vec::new();
    for (name, func) in module.functions.iter() {
        if let Some(model) = entry_model(func) {
            let interface_variables = func
                .parameters
                .iter()
                .filter(|p| p.attributes.iter().any(|a| a.name == AttributeName::Builtin || a.name == AttributeName::Location))
                .map(|p| p.name.clone())
                .collect();
            entry_points.push(EntryPointPlan { function_name: name.clone(), model, interface_variables });
        }
        if func.return_type.as_ref().map(uses_f64).unwrap_or(false) {
            capabilities.insert(Capability::Float64);
        }
        for param in &func.parameters {
            if uses_f64(&param.ty) {
                capabilities.insert(Capability::Float64);
            }
            if uses_sampler_1d(&param.ty) {
                capabilities.insert(Capability::Sampled1D);
            }
        }
    }

    let mut externals = Vec::new();
    for (name, ext) in module.externals.iter() {
        let storage_class = match ext.ty.resolve_alias() {
            ExpressionType::Uniform { .. } => StorageClass::Uniform,
            ExpressionType::Storage { .. } => {
                if options.spirv_version >= (1, 3) {
                    StorageClass::StorageBuffer
                } else {
                    StorageClass::Uniform
                }
            }
            ExpressionType::PushConstant { .. } => StorageClass::PushConstant,
            ExpressionType::Sampler { .. } | ExpressionType::Texture { .. } => StorageClass::UniformConstant,
            _ => StorageClass::Private,
        };
        if uses_sampler_1d(&ext.ty) {
            capabilities.insert(Capability::Sampled1D);
        }
        externals.push(ExternalPlan {
            name: name.clone(),
            storage_class,
            set: attribute_u32(&ext.attributes, AttributeName::Set),
            binding: attribute_u32(&ext.attributes, AttributeName::Binding),
        });
    }

    for (_, constant) in module.constants.iter() {
        if uses_f64(&constant.ty) {
            capabilities.insert(Capability::Float64);
        }
    }

    if entry_points.is_empty() {
        needs_glsl_ext_inst = false;
    } else {
        // Any non-trivial math intrinsic pulls in GLSL.std.450; conservative
        // to assume it's needed whenever there's at least one entry point,
        // since the import costs one extra header word either way.
        needs_glsl_ext_inst = true;
    }

    Ok(ModulePlan { capabilities, needs_glsl_ext_inst, entry_points, externals })
}
