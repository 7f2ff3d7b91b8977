//! Per-function SPIR-V emission (spec §4.10): lowers expressions to value
//! ids through the hash-consed [`super::cache::Cache`], and statements to
//! structured control flow (`OpSelectionMerge`/`OpLoopMerge` pairs, never
//! raw unstructured branches).

use std::collections::HashMap;

use crate::ast::{
    AttributeName, BinaryOp, BranchArm, ConstantValue, Expression, ExpressionKind, ExpressionType, ExternalVar,
    FunctionDeclaration, IntrinsicId, Module, SingleValue, Statement, StatementKind, UnaryOp,
};
use crate::options::CompilerOptions;

use super::cache::{Cache, CacheKey, StorageClass};
use super::prevalent::{Capability, ExecutionModel, ModulePlan};
use super::writer::{decoration, op, Instruction, SpirvModule};
use super::BackendError;

/// A module-scope external variable, planned once (spec §4.10.3 "assign
/// storage classes to externals") and shared read-only by every function's
/// emitter — functions never define their own copy of a global.
#[derive(Clone)]
struct GlobalInfo {
    var_id: u32,
    pointee: CacheKey,
    storage_class: StorageClass,
}

struct FunctionEmitter<'a> {
    cache: &'a mut Cache,
    /// Keyed by `VariableIndex::get()` (parameters and locals share the
    /// same index space — spec §4.4 "dense indices per category").
    locals: HashMap<usize, (u32, CacheKey)>,
    globals: &'a HashMap<usize, GlobalInfo>,
    /// Keyed by `FunctionIndex::get()`, populated once every function in
    /// the module has an id (see `emit_module`) so calls can resolve their
    /// callee before that function's own body has necessarily been emitted.
    functions: &'a HashMap<usize, u32>,
    /// Keyed by `ConstantIndex::get()`: the constant propagator (C7) always
    /// runs before the backend, but a `const` that's only ever read through
    /// an alias or an imported module can still reach here as a bare
    /// `ConstantReference`, so the backend keeps its own copy of resolved
    /// values to materialize those directly (spec §4.6, §4.10).
    constants: &'a HashMap<usize, ConstantValue>,
    body: Vec<Instruction>,
    debug: Vec<Instruction>,
    glsl_ext_inst: u32,
    options: &'a CompilerOptions,
    /// `(merge_label, continue_label)` of every loop currently being
    /// emitted, innermost last — `break`/`continue` branch to the top of
    /// this stack (spec §4.10.6).
    loop_stack: Vec<(u32, u32)>,
    /// Set once the current block has emitted a terminator
    /// (`OpReturn*`/`OpBranch*`/`OpKill`); a new block (the start of an
    /// `if` arm, a loop body, a merge block) resets it. Guards against
    /// emitting unreachable instructions after a block's terminator, which
    /// SPIR-V forbids.
    terminated: bool,
}

impl<'a> FunctionEmitter<'a> {
    fn type_id(&mut self, key: CacheKey) -> u32 {
        let (id, is_new) = self.cache.get_or_assign(key.clone());
        if is_new {
            self.emit_type_definition(id, &key);
        }
        id
    }

    fn emit_type_definition(&mut self, id: u32, key: &CacheKey) {
        let instr = match key {
            CacheKey::Void => Instruction::new(op::TYPE_VOID).operand(id),
            CacheKey::Bool => Instruction::new(op::TYPE_BOOL).operand(id),
            CacheKey::Int { width, signed } => {
                Instruction::new(op::TYPE_INT).operand(id).operand(*width as u32).operand(*signed as u32)
            }
            CacheKey::Float { width } => Instruction::new(op::TYPE_FLOAT).operand(id).operand(*width as u32),
            CacheKey::Vector { component, count } => {
                let component_id = self.type_id((**component).clone());
                Instruction::new(op::TYPE_VECTOR).operand(id).operand(component_id).operand(*count as u32)
            }
            CacheKey::Matrix { column, count } => {
                let column_id = self.type_id((**column).clone());
                Instruction::new(op::TYPE_MATRIX).operand(id).operand(column_id).operand(*count as u32)
            }
            CacheKey::Array { element, length } => {
                let element_id = self.type_id((**element).clone());
                let length_const = self.type_id(CacheKey::ConstInt { width: 32, signed: false, bits: *length as u64 });
                Instruction::new(op::TYPE_ARRAY).operand(id).operand(element_id).operand(length_const)
            }
            CacheKey::RuntimeArray { element } => {
                let element_id = self.type_id((**element).clone());
                Instruction::new(op::TYPE_RUNTIME_ARRAY).operand(id).operand(element_id)
            }
            CacheKey::Struct(members) => {
                let member_ids: Vec<u32> = members.iter().map(|m| self.type_id(m.clone())).collect();
                Instruction::new(op::TYPE_STRUCT).operand(id).operands(member_ids)
            }
            CacheKey::Pointer { storage_class, pointee } => {
                let pointee_id = self.type_id((**pointee).clone());
                Instruction::new(op::TYPE_POINTER).operand(id).operand(storage_class.word()).operand(pointee_id)
            }
            CacheKey::Function { ret, params } => {
                let ret_id = self.type_id((**ret).clone());
                let param_ids: Vec<u32> = params.iter().map(|p| self.type_id(p.clone())).collect();
                Instruction::new(op::TYPE_FUNCTION).operand(id).operand(ret_id).operands(param_ids)
            }
            CacheKey::ConstBool(value) => {
                let bool_ty = self.type_id(CacheKey::Bool);
                let opcode = if *value { op::CONSTANT_TRUE } else { op::CONSTANT_FALSE };
                Instruction::new(opcode).operand(bool_ty).operand(id)
            }
            CacheKey::ConstInt { width, signed, bits } => {
                let ty = self.type_id(CacheKey::Int { width: *width, signed: *signed });
                Instruction::new(op::CONSTANT).operand(ty).operand(id).operand(*bits as u32)
            }
            CacheKey::ConstFloat { width, bits } => {
                let ty = self.type_id(CacheKey::Float { width: *width });
                if *width == 64 {
                    Instruction::new(op::CONSTANT).operand(ty).operand(id).operands([
                        (*bits & 0xFFFF_FFFF) as u32,
                        (*bits >> 32) as u32,
                    ])
                } else {
                    Instruction::new(op::CONSTANT).operand(ty).operand(id).operand(*bits as u32)
                }
            }
            CacheKey::ConstComposite { ty, components } => {
                let ty_id = self.type_id((**ty).clone());
                Instruction::new(op::CONSTANT_COMPOSITE).operand(ty_id).operand(id).operands(components.clone())
            }
        };
        self.body.push(instr);
    }

    fn constant_for_single(&mut self, value: &SingleValue) -> (u32, CacheKey) {
        match value {
            SingleValue::Vec2(lanes) => self.composite_constant(lanes.iter().map(|b| b.as_ref())),
            SingleValue::Vec3(lanes) => self.composite_constant(lanes.iter().map(|b| b.as_ref())),
            SingleValue::Vec4(lanes) => self.composite_constant(lanes.iter().map(|b| b.as_ref())),
            scalar => {
                let key = CacheKey::from_single_value(scalar);
                let id = self.type_id(key.clone());
                (id, key)
            }
        }
    }

    fn composite_constant<'b>(&mut self, lanes: impl Iterator<Item = &'b SingleValue>) -> (u32, CacheKey) {
        let mut component_ids = Vec::new();
        let mut component_key = CacheKey::Void;
        for lane in lanes {
            let (id, key) = self.constant_for_single(lane);
            component_ids.push(id);
            component_key = key;
        }
        let count = component_ids.len() as u8;
        let vector_key = CacheKey::Vector { component: Box::new(component_key), count };
        let key = CacheKey::ConstComposite { ty: Box::new(vector_key), components: component_ids };
        let id = self.type_id(key.clone());
        (id, key)
    }

    fn emit_constant_value(&mut self, value: &ConstantValue) -> (u32, CacheKey) {
        match value {
            ConstantValue::Single(v) => self.constant_for_single(v),
            ConstantValue::Array(items) => self.composite_constant(items.iter()),
        }
    }

    fn binary_opcode(op: BinaryOp, key: &CacheKey) -> Option<u16> {
        use CacheKey::*;
        let is_float = matches!(base_scalar(key), Float { .. });
        let is_signed = matches!(base_scalar(key), Int { signed: true, .. });
        Some(match op {
            BinaryOp::Add if is_float => super::writer::op::F_ADD,
            BinaryOp::Add => super::writer::op::I_ADD,
            BinaryOp::Sub if is_float => super::writer::op::F_SUB,
            BinaryOp::Sub => super::writer::op::I_SUB,
            BinaryOp::Mul if is_float => super::writer::op::F_MUL,
            BinaryOp::Mul => super::writer::op::I_MUL,
            BinaryOp::Div if is_float => super::writer::op::F_DIV,
            BinaryOp::Div if is_signed => super::writer::op::S_DIV,
            BinaryOp::Div => super::writer::op::U_DIV,
            BinaryOp::Mod if is_float => super::writer::op::F_MOD,
            BinaryOp::Mod if is_signed => super::writer::op::S_MOD,
            BinaryOp::Mod => super::writer::op::U_MOD,
            BinaryOp::BitAnd => super::writer::op::BITWISE_AND,
            BinaryOp::BitOr => super::writer::op::BITWISE_OR,
            BinaryOp::BitXor => super::writer::op::BITWISE_XOR,
            BinaryOp::Shl => super::writer::op::SHIFT_LEFT_LOGICAL,
            BinaryOp::Shr if is_signed => super::writer::op::SHIFT_RIGHT_ARITHMETIC,
            BinaryOp::Shr => super::writer::op::SHIFT_RIGHT_LOGICAL,
            BinaryOp::Eq if is_float => super::writer::op::F_ORD_EQUAL,
            BinaryOp::Eq => super::writer::op::I_EQUAL,
            BinaryOp::NotEq if is_float => super::writer::op::F_ORD_NOT_EQUAL,
            BinaryOp::NotEq => super::writer::op::I_NOT_EQUAL,
            BinaryOp::Lt if is_float => super::writer::op::F_ORD_LESS_THAN,
            BinaryOp::Lt if is_signed => super::writer::op::S_LESS_THAN,
            BinaryOp::Lt => super::writer::op::U_LESS_THAN,
            BinaryOp::Le if is_float => super::writer::op::F_ORD_LESS_THAN_EQUAL,
            BinaryOp::Le if is_signed => super::writer::op::S_LESS_THAN_EQUAL,
            BinaryOp::Le => super::writer::op::U_LESS_THAN_EQUAL,
            BinaryOp::Gt if is_float => super::writer::op::F_ORD_GREATER_THAN,
            BinaryOp::Gt if is_signed => super::writer::op::S_GREATER_THAN,
            BinaryOp::Gt => super::writer::op::U_GREATER_THAN,
            BinaryOp::Ge if is_float => super::writer::op::F_ORD_GREATER_THAN_EQUAL,
            BinaryOp::Ge if is_signed => super::writer::op::S_GREATER_THAN_EQUAL,
            BinaryOp::Ge => super::writer::op::U_GREATER_THAN_EQUAL,
            BinaryOp::LogicalAnd => super::writer::op::LOGICAL_AND,
            BinaryOp::LogicalOr => super::writer::op::LOGICAL_OR,
        })
    }

    /// Emits `expr`, returning its SPIR-V result id and the cache key of
    /// its type (needed by the caller to pick the right opcode variant).
    fn emit_expression(&mut self, expr: &Expression) -> Result<(u32, CacheKey), BackendError> {
        let ty = expr.cached_expression_type.as_ref();
        match &expr.kind {
            ExpressionKind::Constant(value) => Ok(self.emit_constant_value(value)),
            ExpressionKind::IdentifierValue { index } | ExpressionKind::VariableValue { index } => {
                self.emit_variable_load(expr, index.get())
            }
            ExpressionKind::Binary { op, left, right } => {
                let (left_id, left_key) = self.emit_expression(left)?;
                let (right_id, _) = self.emit_expression(right)?;
                let result_ty_key = ty.and_then(CacheKey::from_type).unwrap_or_else(|| left_key.clone());
                let result_ty = self.type_id(result_ty_key.clone());
                let opcode = Self::binary_opcode(*op, &left_key).ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: expr.location.file.as_ref().into(),
                    position: expr.location.position.clone(),
                    construct: format!("binary operator {op:?} on this operand type"),
                })?;
                let id = self.cache.fresh_id();
                self.body.push(Instruction::new(opcode).operand(result_ty).operand(id).operand(left_id).operand(right_id));
                Ok((id, result_ty_key))
            }
            ExpressionKind::Unary { op, expr: operand } => {
                let (operand_id, operand_key) = self.emit_expression(operand)?;
                let result_ty_key = ty.and_then(CacheKey::from_type).unwrap_or_else(|| operand_key.clone());
                let result_ty = self.type_id(result_ty_key.clone());
                let id = self.cache.fresh_id();
                let opcode = match op {
                    UnaryOp::Negate if matches!(base_scalar(&operand_key), CacheKey::Float { .. }) => super::writer::op::F_NEGATE,
                    UnaryOp::Negate => super::writer::op::S_NEGATE,
                    UnaryOp::Plus => {
                        return Ok((operand_id, operand_key));
                    }
                    UnaryOp::LogicalNot => super::writer::op::LOGICAL_NOT,
                    UnaryOp::BitNot => super::writer::op::NOT,
                };
                self.body.push(Instruction::new(opcode).operand(result_ty).operand(id).operand(operand_id));
                Ok((id, result_ty_key))
            }
            ExpressionKind::Swizzle { expr: inner, components } => {
                let (inner_id, inner_key) = self.emit_expression(inner)?;
                let result_ty_key = ty.and_then(CacheKey::from_type).unwrap_or_else(|| inner_key.clone());
                if components.len() == 1 {
                    let result_ty = self.type_id(result_ty_key.clone());
                    let id = self.cache.fresh_id();
                    self.body.push(
                        Instruction::new(op::COMPOSITE_EXTRACT)
                            .operand(result_ty)
                            .operand(id)
                            .operand(inner_id)
                            .operand(components[0] as u32),
                    );
                    Ok((id, result_ty_key))
                } else {
                    let result_ty = self.type_id(result_ty_key.clone());
                    let id = self.cache.fresh_id();
                    self.body.push(
                        Instruction::new(op::VECTOR_SHUFFLE)
                            .operand(result_ty)
                            .operand(id)
                            .operand(inner_id)
                            .operand(inner_id)
                            .operands(components.iter().map(|&c| c as u32)),
                    );
                    Ok((id, result_ty_key))
                }
            }
            ExpressionKind::Cast { arguments, .. } => {
                // Single-argument numeric casts go through OpConvert*;
                // multi-argument vector/matrix constructors become
                // OpCompositeConstruct.
                if arguments.len() == 1 {
                    let (arg_id, arg_key) = self.emit_expression(&arguments[0])?;
                    let result_ty_key = ty.and_then(CacheKey::from_type).unwrap_or_else(|| arg_key.clone());
                    let result_ty = self.type_id(result_ty_key.clone());
                    let id = self.cache.fresh_id();
                    let opcode = convert_opcode(&arg_key, &result_ty_key);
                    self.body.push(Instruction::new(opcode).operand(result_ty).operand(id).operand(arg_id));
                    Ok((id, result_ty_key))
                } else {
                    let mut component_ids = Vec::new();
                    for arg in arguments {
                        component_ids.push(self.emit_expression(arg)?.0);
                    }
                    let result_ty_key = ty.and_then(CacheKey::from_type).ok_or_else(|| BackendError::UnsupportedConstruct {
                        source: expr.location.file.as_ref().into(),
                        position: expr.location.position.clone(),
                        construct: "cast with unresolved result type".to_string(),
                    })?;
                    let result_ty = self.type_id(result_ty_key.clone());
                    let id = self.cache.fresh_id();
                    self.body.push(
                        Instruction::new(op::COMPOSITE_CONSTRUCT).operand(result_ty).operand(id).operands(component_ids),
                    );
                    Ok((id, result_ty_key))
                }
            }
            ExpressionKind::CallFunction { callee, arguments } => {
                let ExpressionKind::FunctionReference { index } = &callee.kind else {
                    return Err(BackendError::UnsupportedConstruct {
                        source: expr.location.file.as_ref().into(),
                        position: expr.location.position.clone(),
                        construct: "call through a non-direct-function callee".to_string(),
                    });
                };
                let &callee_id = self.functions.get(&index.get()).ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: expr.location.file.as_ref().into(),
                    position: expr.location.position.clone(),
                    construct: format!("call to unregistered function #{}", index.get()),
                })?;
                let mut arg_ids = Vec::new();
                for arg in arguments {
                    arg_ids.push(self.emit_expression(arg)?.0);
                }
                let result_ty_key = ty.and_then(CacheKey::from_type).unwrap_or(CacheKey::Void);
                let result_ty = self.type_id(result_ty_key.clone());
                let id = self.cache.fresh_id();
                self.body.push(
                    Instruction::new(op::FUNCTION_CALL).operand(result_ty).operand(id).operand(callee_id).operands(arg_ids),
                );
                Ok((id, result_ty_key))
            }
            ExpressionKind::AccessField { .. } | ExpressionKind::AccessIndex { .. } => {
                let (ptr_id, pointee_key, _) = self.emit_lvalue(expr)?;
                let ty_id = self.type_id(pointee_key.clone());
                let id = self.cache.fresh_id();
                self.body.push(Instruction::new(op::LOAD).operand(ty_id).operand(id).operand(ptr_id));
                Ok((id, pointee_key))
            }
            ExpressionKind::Assign { target, value } => {
                let (value_id, value_key) = self.emit_expression(value)?;
                let (ptr_id, _, _) = self.emit_lvalue(target)?;
                self.body.push(Instruction::new(op::STORE).operand(ptr_id).operand(value_id));
                Ok((value_id, value_key))
            }
            ExpressionKind::Intrinsic { id, arguments } => self.emit_intrinsic(*id, arguments, expr),
            ExpressionKind::ConstantReference { index } => {
                let value = self.constants.get(&index.get()).cloned().ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: expr.location.file.as_ref().into(),
                    position: expr.location.position.clone(),
                    construct: format!("reference to unresolved constant #{}", index.get()),
                })?;
                Ok(self.emit_constant_value(&value))
            }
            _ => Err(BackendError::UnsupportedConstruct {
                source: expr.location.file.as_ref().into(),
                position: expr.location.position.clone(),
                construct: format!("{:?}", expr.kind).split_whitespace().next().unwrap_or("expression").to_string(),
            }),
        }
    }

    fn emit_variable_load(&mut self, expr: &Expression, index: usize) -> Result<(u32, CacheKey), BackendError> {
        let (ptr_id, pointee_key, _) = self.lookup_variable(expr, index)?;
        let ty_id = self.type_id(pointee_key.clone());
        let id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::LOAD).operand(ty_id).operand(id).operand(ptr_id));
        Ok((id, pointee_key))
    }

    /// Resolves an `IdentifierValue`/`VariableValue` index to its pointer,
    /// checking function-local allocations first and module-scope globals
    /// (externals) second — both share the same dense index space.
    fn lookup_variable(&self, expr: &Expression, index: usize) -> Result<(u32, CacheKey, StorageClass), BackendError> {
        if let Some((id, key)) = self.locals.get(&index) {
            return Ok((*id, key.clone(), StorageClass::Function));
        }
        if let Some(global) = self.globals.get(&index) {
            return Ok((global.var_id, global.pointee.clone(), global.storage_class));
        }
        Err(BackendError::UnsupportedConstruct {
            source: expr.location.file.as_ref().into(),
            position: expr.location.position.clone(),
            construct: format!("reference to unregistered local/parameter/external #{index}"),
        })
    }

    /// Resolves `expr` to a pointer id instead of loading it, walking
    /// `AccessField`/`AccessIndex` chains with `OpAccessChain` (spec
    /// §4.10.5 "Cast"/struct-member access is the same shape for both
    /// locals and externals since both live behind a pointer).
    fn emit_lvalue(&mut self, expr: &Expression) -> Result<(u32, CacheKey, StorageClass), BackendError> {
        match &expr.kind {
            ExpressionKind::IdentifierValue { index } | ExpressionKind::VariableValue { index } => {
                self.lookup_variable(expr, index.get())
            }
            ExpressionKind::AccessField { expr: inner, field_index, .. } => {
                let (base_ptr, base_key, storage_class) = self.emit_lvalue(inner)?;
                let field_index = field_index.ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: expr.location.file.as_ref().into(),
                    position: expr.location.position.clone(),
                    construct: "field access with no resolved index".to_string(),
                })?;
                let member_key = match &base_key {
                    CacheKey::Struct(members) => members.get(field_index).cloned().ok_or_else(|| BackendError::UnsupportedConstruct {
                        source: expr.location.file.as_ref().into(),
                        position: expr.location.position.clone(),
                        construct: "struct field index out of range".to_string(),
                    })?,
                    _ => {
                        return Err(BackendError::UnsupportedConstruct {
                            source: expr.location.file.as_ref().into(),
                            position: expr.location.position.clone(),
                            construct: "field access on a non-struct value".to_string(),
                        })
                    }
                };
                let index_const = self.constant_u32(field_index as u32);
                let ptr_ty = self.type_id(CacheKey::Pointer { storage_class, pointee: Box::new(member_key.clone()) });
                let id = self.cache.fresh_id();
                self.body.push(
                    Instruction::new(op::ACCESS_CHAIN).operand(ptr_ty).operand(id).operand(base_ptr).operand(index_const),
                );
                Ok((id, member_key, storage_class))
            }
            ExpressionKind::AccessIndex { expr: inner, indices } => {
                let (base_ptr, base_key, storage_class) = self.emit_lvalue(inner)?;
                let element_key = match &base_key {
                    CacheKey::Array { element, .. } | CacheKey::RuntimeArray { element } => (**element).clone(),
                    CacheKey::Vector { component, .. } => (**component).clone(),
                    _ => {
                        return Err(BackendError::UnsupportedConstruct {
                            source: expr.location.file.as_ref().into(),
                            position: expr.location.position.clone(),
                            construct: "index access on a non-indexable value".to_string(),
                        })
                    }
                };
                let mut index_ids = Vec::new();
                for idx in indices {
                    index_ids.push(self.emit_expression(idx)?.0);
                }
                let ptr_ty = self.type_id(CacheKey::Pointer { storage_class, pointee: Box::new(element_key.clone()) });
                let id = self.cache.fresh_id();
                self.body.push(
                    Instruction::new(op::ACCESS_CHAIN).operand(ptr_ty).operand(id).operand(base_ptr).operands(index_ids),
                );
                Ok((id, element_key, storage_class))
            }
            _ => Err(BackendError::UnsupportedConstruct {
                source: expr.location.file.as_ref().into(),
                position: expr.location.position.clone(),
                construct: "expression is not an lvalue".to_string(),
            }),
        }
    }

    fn constant_u32(&mut self, value: u32) -> u32 {
        let key = CacheKey::ConstInt { width: 32, signed: false, bits: value as u64 };
        self.type_id(key)
    }

    fn emit_ext_inst(&mut self, glsl_opcode: u32, result_key: CacheKey, arg_ids: Vec<u32>) -> (u32, CacheKey) {
        let result_ty = self.type_id(result_key.clone());
        let id = self.cache.fresh_id();
        let instr = Instruction::new(op::EXT_INST)
            .operand(result_ty)
            .operand(id)
            .operand(self.glsl_ext_inst)
            .operand(glsl_opcode)
            .operands(arg_ids);
        self.body.push(instr);
        (id, result_key)
    }

    /// Dispatches an intrinsic call by id (spec §4.10.5 "Intrinsics"): most
    /// become a single `GLSL.std.450` extended instruction, `Dot`/`Select`
    /// are core SPIR-V opcodes, and `ArraySize` is the one "custom code
    /// generator" entry, compiling to `OpArrayLength` against the struct
    /// pointer behind the array's owning external.
    fn emit_intrinsic(
        &mut self,
        id: IntrinsicId,
        arguments: &[Expression],
        expr: &Expression,
    ) -> Result<(u32, CacheKey), BackendError> {
        let unsupported = |name: &str| BackendError::UnsupportedConstruct {
            source: expr.location.file.as_ref().into(),
            position: expr.location.position.clone(),
            construct: format!("intrinsic {name}"),
        };

        if id == IntrinsicId::ArraySize {
            let ExpressionKind::AccessField { expr: base, field_index: Some(field_index), .. } = &arguments[0].kind else {
                return Err(unsupported("ArraySize on an expression that is not a direct struct member"));
            };
            let (struct_ptr, _, _) = self.emit_lvalue(base)?;
            let result_key = CacheKey::Int { width: 32, signed: false };
            let result_ty = self.type_id(result_key.clone());
            let out_id = self.cache.fresh_id();
            self.body.push(
                Instruction::new(op::ARRAY_LENGTH)
                    .operand(result_ty)
                    .operand(out_id)
                    .operand(struct_ptr)
                    .operand(*field_index as u32),
            );
            return Ok((out_id, result_key));
        }
        if id == IntrinsicId::SampleTexture {
            return Err(unsupported("SampleTexture (sampler/texture types are not modeled by this backend)"));
        }

        let ty = expr.cached_expression_type.as_ref();
        let mut arg_ids = Vec::new();
        let mut arg_keys = Vec::new();
        for arg in arguments {
            let (arg_id, arg_key) = self.emit_expression(arg)?;
            arg_ids.push(arg_id);
            arg_keys.push(arg_key);
        }
        let result_key = ty.and_then(CacheKey::from_type).unwrap_or_else(|| arg_keys[0].clone());
        let scalar = base_scalar(&arg_keys[0]);
        let is_float = matches!(scalar, CacheKey::Float { .. });
        let is_signed = matches!(scalar, CacheKey::Int { signed: true, .. });

        match id {
            IntrinsicId::Abs => Ok(self.emit_ext_inst(if is_float { 4 } else { 5 }, result_key, arg_ids)),
            IntrinsicId::Floor => Ok(self.emit_ext_inst(8, result_key, arg_ids)),
            IntrinsicId::Ceil => Ok(self.emit_ext_inst(9, result_key, arg_ids)),
            IntrinsicId::Round => Ok(self.emit_ext_inst(1, result_key, arg_ids)),
            IntrinsicId::Sqrt => Ok(self.emit_ext_inst(31, result_key, arg_ids)),
            IntrinsicId::Exp => Ok(self.emit_ext_inst(27, result_key, arg_ids)),
            IntrinsicId::Log => Ok(self.emit_ext_inst(28, result_key, arg_ids)),
            IntrinsicId::Pow => Ok(self.emit_ext_inst(26, result_key, arg_ids)),
            IntrinsicId::Normalize => Ok(self.emit_ext_inst(69, result_key, arg_ids)),
            IntrinsicId::Length => Ok(self.emit_ext_inst(66, result_key, arg_ids)),
            IntrinsicId::Cross => Ok(self.emit_ext_inst(68, result_key, arg_ids)),
            IntrinsicId::Reflect => Ok(self.emit_ext_inst(71, result_key, arg_ids)),
            IntrinsicId::Min => Ok(self.emit_ext_inst(if is_float { 37 } else if is_signed { 39 } else { 38 }, result_key, arg_ids)),
            IntrinsicId::Max => Ok(self.emit_ext_inst(if is_float { 40 } else if is_signed { 42 } else { 41 }, result_key, arg_ids)),
            IntrinsicId::Clamp => Ok(self.emit_ext_inst(if is_float { 43 } else if is_signed { 45 } else { 44 }, result_key, arg_ids)),
            IntrinsicId::Lerp => Ok(self.emit_ext_inst(46, result_key, arg_ids)),
            IntrinsicId::Dot => {
                let result_ty = self.type_id(result_key.clone());
                let out_id = self.cache.fresh_id();
                self.body.push(
                    Instruction::new(op::DOT).operand(result_ty).operand(out_id).operand(arg_ids[0]).operand(arg_ids[1]),
                );
                Ok((out_id, result_key))
            }
            IntrinsicId::Select => {
                let result_ty = self.type_id(result_key.clone());
                let out_id = self.cache.fresh_id();
                self.body.push(
                    Instruction::new(op::SELECT)
                        .operand(result_ty)
                        .operand(out_id)
                        .operand(arg_ids[0])
                        .operand(arg_ids[1])
                        .operand(arg_ids[2]),
                );
                Ok((out_id, result_key))
            }
            IntrinsicId::ArraySize | IntrinsicId::SampleTexture => unreachable!("handled above"),
        }
    }

    fn emit_statement(&mut self, stmt: &Statement) -> Result<(), BackendError> {
        match &stmt.kind {
            StatementKind::Return(expr) => {
                if let Some(expr) = expr {
                    let (id, _) = self.emit_expression(expr)?;
                    self.body.push(Instruction::new(op::RETURN_VALUE).operand(id));
                } else {
                    self.body.push(Instruction::new(op::RETURN));
                }
                self.terminated = true;
                Ok(())
            }
            StatementKind::Discard => {
                self.body.push(Instruction::new(op::KILL));
                self.terminated = true;
                Ok(())
            }
            StatementKind::Expression(expr) => {
                self.emit_expression(expr)?;
                Ok(())
            }
            StatementKind::DeclareVariable { name, ty, value, index } => {
                let key = ty
                    .as_ref()
                    .and_then(CacheKey::from_type)
                    .or_else(|| value.as_ref()?.cached_expression_type.as_ref().and_then(CacheKey::from_type))
                    .ok_or_else(|| BackendError::UnsupportedConstruct {
                        source: stmt.location.file.as_ref().into(),
                        position: stmt.location.position.clone(),
                        construct: format!("local `{name}` with unresolved type"),
                    })?;
                let index = index.ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: stmt.location.file.as_ref().into(),
                    position: stmt.location.position.clone(),
                    construct: format!("local `{name}` with no resolved index"),
                })?;
                let pointer_key = CacheKey::Pointer { storage_class: StorageClass::Function, pointee: Box::new(key.clone()) };
                let pointer_ty = self.type_id(pointer_key);
                let var_id = self.cache.fresh_id();
                self.body.push(Instruction::new(op::VARIABLE).operand(pointer_ty).operand(var_id).operand(StorageClass::Function.word()));
                self.locals.insert(index.get(), (var_id, key));
                if let Some(value) = value {
                    let (value_id, _) = self.emit_expression(value)?;
                    self.body.push(Instruction::new(op::STORE).operand(var_id).operand(value_id));
                }
                Ok(())
            }
            StatementKind::Scoped(inner) => self.emit_statement(inner),
            StatementKind::Multi(statements) => {
                for s in statements {
                    if self.terminated {
                        break;
                    }
                    self.emit_statement(s)?;
                }
                Ok(())
            }
            StatementKind::NoOp | StatementKind::DeclareStruct(_) | StatementKind::DeclareFunction(_)
            | StatementKind::DeclareConst { .. } | StatementKind::DeclareAlias { .. } | StatementKind::DeclareExternal { .. }
            | StatementKind::DeclareOption { .. } | StatementKind::Import { .. } => Ok(()),
            StatementKind::Conditional { condition, truthy, falsy } => self.emit_if(condition, truthy, falsy.as_deref()),
            StatementKind::Branch { arms, else_body } => {
                // Already-resolved `const if` chains fold away before this
                // point (C7); a surviving `Branch` is ordinary run-time `if`
                // (or `if`/`else if`/`else` chain) and is lowered arm-by-arm
                // as nested `OpSelectionMerge`s, recursing over the
                // remaining arms for each `else if`.
                self.emit_branch_arms(stmt, arms, else_body.as_deref())
            }
            StatementKind::While { condition, body } => self.emit_while(condition, body),
            StatementKind::Break => {
                let &(merge, _) = self.loop_stack.last().ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: stmt.location.file.as_ref().into(),
                    position: stmt.location.position.clone(),
                    construct: "break outside of a loop".to_string(),
                })?;
                self.body.push(Instruction::new(op::BRANCH).operand(merge));
                self.terminated = true;
                Ok(())
            }
            StatementKind::Continue => {
                let &(_, continue_target) = self.loop_stack.last().ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: stmt.location.file.as_ref().into(),
                    position: stmt.location.position.clone(),
                    construct: "continue outside of a loop".to_string(),
                })?;
                self.body.push(Instruction::new(op::BRANCH).operand(continue_target));
                self.terminated = true;
                Ok(())
            }
            StatementKind::For { from, to, step, body, variable_index, .. } => {
                let index = variable_index.ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: stmt.location.file.as_ref().into(),
                    position: stmt.location.position.clone(),
                    construct: "for loop with no resolved induction variable".to_string(),
                })?;
                self.emit_for(stmt, index, from, to, step.as_deref(), body)
            }
            StatementKind::ForEach { container, body, variable_index, .. } => {
                let index = variable_index.ok_or_else(|| BackendError::UnsupportedConstruct {
                    source: stmt.location.file.as_ref().into(),
                    position: stmt.location.position.clone(),
                    construct: "for-each loop with no resolved element variable".to_string(),
                })?;
                self.emit_for_each(stmt, index, container, body)
            }
        }
    }

    fn emit_if(&mut self, condition: &Expression, truthy: &Statement, falsy: Option<&Statement>) -> Result<(), BackendError> {
        let (cond_id, _) = self.emit_expression(condition)?;
        let then_label = self.cache.fresh_id();
        let merge_label = self.cache.fresh_id();
        let else_label = if falsy.is_some() { self.cache.fresh_id() } else { merge_label };

        self.body.push(Instruction::new(op::SELECTION_MERGE).operand(merge_label).operand(0));
        self.body.push(Instruction::new(op::BRANCH_CONDITIONAL).operand(cond_id).operand(then_label).operand(else_label));
        self.body.push(Instruction::new(op::LABEL).operand(then_label));
        self.terminated = false;
        self.emit_statement(truthy)?;
        if !self.terminated {
            self.body.push(Instruction::new(op::BRANCH).operand(merge_label));
        }
        if let Some(falsy) = falsy {
            self.body.push(Instruction::new(op::LABEL).operand(else_label));
            self.terminated = false;
            self.emit_statement(falsy)?;
            if !self.terminated {
                self.body.push(Instruction::new(op::BRANCH).operand(merge_label));
            }
        }
        self.body.push(Instruction::new(op::LABEL).operand(merge_label));
        self.terminated = false;
        Ok(())
    }

    fn emit_while(&mut self, condition: &Expression, body: &Statement) -> Result<(), BackendError> {
        let header_label = self.cache.fresh_id();
        let merge_label = self.cache.fresh_id();
        let continue_label = self.cache.fresh_id();
        let body_label = self.cache.fresh_id();

        self.body.push(Instruction::new(op::BRANCH).operand(header_label));
        self.body.push(Instruction::new(op::LABEL).operand(header_label));
        self.body.push(Instruction::new(op::LOOP_MERGE).operand(merge_label).operand(continue_label).operand(0));
        let (cond_id, _) = self.emit_expression(condition)?;
        self.body.push(Instruction::new(op::BRANCH_CONDITIONAL).operand(cond_id).operand(body_label).operand(merge_label));
        self.body.push(Instruction::new(op::LABEL).operand(body_label));
        self.terminated = false;
        self.loop_stack.push((merge_label, continue_label));
        self.emit_statement(body)?;
        self.loop_stack.pop();
        if !self.terminated {
            self.body.push(Instruction::new(op::BRANCH).operand(continue_label));
        }
        self.body.push(Instruction::new(op::LABEL).operand(continue_label));
        self.terminated = false;
        self.body.push(Instruction::new(op::BRANCH).operand(header_label));
        self.body.push(Instruction::new(op::LABEL).operand(merge_label));
        self.terminated = false;
        Ok(())
    }

    /// Lowers an `if`/`else if`/`else` chain to nested `OpSelectionMerge`
    /// blocks, recursing on the remaining arms for each `else if` (spec
    /// §4.10.6). A bare `if` with no further arms is just [`Self::emit_if`].
    fn emit_branch_arms(&mut self, stmt: &Statement, arms: &[BranchArm], else_body: Option<&Statement>) -> Result<(), BackendError> {
        let Some((first, rest)) = arms.split_first() else {
            return match else_body {
                Some(else_body) => self.emit_statement(else_body),
                None => Ok(()),
            };
        };
        let cond = first.condition.as_ref().ok_or_else(|| BackendError::UnsupportedConstruct {
            source: stmt.location.file.as_ref().into(),
            position: stmt.location.position.clone(),
            construct: "branch arm without a condition".to_string(),
        })?;

        if rest.is_empty() {
            return self.emit_if(cond, &first.body, else_body);
        }

        let (cond_id, _) = self.emit_expression(cond)?;
        let then_label = self.cache.fresh_id();
        let else_label = self.cache.fresh_id();
        let merge_label = self.cache.fresh_id();

        self.body.push(Instruction::new(op::SELECTION_MERGE).operand(merge_label).operand(0));
        self.body.push(Instruction::new(op::BRANCH_CONDITIONAL).operand(cond_id).operand(then_label).operand(else_label));
        self.body.push(Instruction::new(op::LABEL).operand(then_label));
        self.terminated = false;
        self.emit_statement(&first.body)?;
        if !self.terminated {
            self.body.push(Instruction::new(op::BRANCH).operand(merge_label));
        }
        self.body.push(Instruction::new(op::LABEL).operand(else_label));
        self.terminated = false;
        self.emit_branch_arms(stmt, rest, else_body)?;
        if !self.terminated {
            self.body.push(Instruction::new(op::BRANCH).operand(merge_label));
        }
        self.body.push(Instruction::new(op::LABEL).operand(merge_label));
        self.terminated = false;
        Ok(())
    }

    fn constant_i32(&mut self, value: i32) -> u32 {
        let key = CacheKey::ConstInt { width: 32, signed: true, bits: value as i64 as u64 };
        self.type_id(key)
    }

    /// Lowers a numeric `for` loop to the usual four-block structured form
    /// (header/check/body/continue, spec §4.10.6): a `Function`-storage
    /// counter variable, checked against `to` before every iteration and
    /// advanced by `step` (default `1`) at the end of each one.
    fn emit_for(
        &mut self,
        stmt: &Statement,
        variable_index: crate::ast::VariableIndex,
        from: &Expression,
        to: &Expression,
        step: Option<&Expression>,
        body: &Statement,
    ) -> Result<(), BackendError> {
        let int_key = CacheKey::Int { width: 32, signed: true };
        let (from_id, _) = self.emit_expression(from)?;
        let (to_id, _) = self.emit_expression(to)?;
        let step_id = match step {
            Some(s) => self.emit_expression(s)?.0,
            None => self.constant_i32(1),
        };

        let pointer_key = CacheKey::Pointer { storage_class: StorageClass::Function, pointee: Box::new(int_key.clone()) };
        let pointer_ty = self.type_id(pointer_key);
        let var_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::VARIABLE).operand(pointer_ty).operand(var_id).operand(StorageClass::Function.word()));
        self.locals.insert(variable_index.get(), (var_id, int_key.clone()));
        self.body.push(Instruction::new(op::STORE).operand(var_id).operand(from_id));

        let header_label = self.cache.fresh_id();
        let check_label = self.cache.fresh_id();
        let body_label = self.cache.fresh_id();
        let continue_label = self.cache.fresh_id();
        let merge_label = self.cache.fresh_id();
        let int_ty = self.type_id(int_key.clone());
        let bool_ty = self.type_id(CacheKey::Bool);

        self.body.push(Instruction::new(op::BRANCH).operand(header_label));
        self.body.push(Instruction::new(op::LABEL).operand(header_label));
        self.body.push(Instruction::new(op::LOOP_MERGE).operand(merge_label).operand(continue_label).operand(0));
        self.body.push(Instruction::new(op::BRANCH).operand(check_label));
        self.body.push(Instruction::new(op::LABEL).operand(check_label));
        let cur_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::LOAD).operand(int_ty).operand(cur_id).operand(var_id));
        let cond_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::S_LESS_THAN).operand(bool_ty).operand(cond_id).operand(cur_id).operand(to_id));
        self.body.push(Instruction::new(op::BRANCH_CONDITIONAL).operand(cond_id).operand(body_label).operand(merge_label));
        self.body.push(Instruction::new(op::LABEL).operand(body_label));
        self.terminated = false;
        self.loop_stack.push((merge_label, continue_label));
        let _ = stmt;
        self.emit_statement(body)?;
        self.loop_stack.pop();
        if !self.terminated {
            self.body.push(Instruction::new(op::BRANCH).operand(continue_label));
        }
        self.body.push(Instruction::new(op::LABEL).operand(continue_label));
        self.terminated = false;
        let cur2_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::LOAD).operand(int_ty).operand(cur2_id).operand(var_id));
        let next_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::I_ADD).operand(int_ty).operand(next_id).operand(cur2_id).operand(step_id));
        self.body.push(Instruction::new(op::STORE).operand(var_id).operand(next_id));
        self.body.push(Instruction::new(op::BRANCH).operand(header_label));
        self.body.push(Instruction::new(op::LABEL).operand(merge_label));
        self.terminated = false;
        Ok(())
    }

    /// Lowers `for elem in container { ... }` over a fixed-length array to
    /// the same four-block structured loop as [`Self::emit_for`], with an
    /// `i32` index counter driving an `OpAccessChain` into `container` each
    /// iteration; the loaded element is copied into its own `Function`
    /// variable so the body sees `elem` as an ordinary local (spec §4.10.6).
    /// A `DynArray` container has no compile-time trip count and isn't
    /// modeled (see DESIGN.md — matches this backend's existing stance on
    /// unsized containers).
    fn emit_for_each(
        &mut self,
        stmt: &Statement,
        variable_index: crate::ast::VariableIndex,
        container: &Expression,
        body: &Statement,
    ) -> Result<(), BackendError> {
        let length = match container.cached_expression_type.as_ref().map(|t| t.resolve_alias()) {
            Some(ExpressionType::Array { length, .. }) => *length,
            _ => {
                return Err(BackendError::UnsupportedConstruct {
                    source: stmt.location.file.as_ref().into(),
                    position: stmt.location.position.clone(),
                    construct: "for-each over a container without a compile-time-known length".to_string(),
                })
            }
        };

        let (container_ptr, container_key, storage_class) = self.emit_lvalue(container)?;
        let element_key = match &container_key {
            CacheKey::Array { element, .. } | CacheKey::RuntimeArray { element } => (**element).clone(),
            _ => {
                return Err(BackendError::UnsupportedConstruct {
                    source: stmt.location.file.as_ref().into(),
                    position: stmt.location.position.clone(),
                    construct: "for-each over a non-array value".to_string(),
                })
            }
        };

        let int_key = CacheKey::Int { width: 32, signed: false };
        let int_ty = self.type_id(int_key.clone());
        let zero_id = self.constant_u32(0);
        let length_id = self.constant_u32(length);
        let one_id = self.constant_u32(1);

        let counter_pointer_key = CacheKey::Pointer { storage_class: StorageClass::Function, pointee: Box::new(int_key.clone()) };
        let counter_pointer_ty = self.type_id(counter_pointer_key);
        let counter_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::VARIABLE).operand(counter_pointer_ty).operand(counter_id).operand(StorageClass::Function.word()));
        self.body.push(Instruction::new(op::STORE).operand(counter_id).operand(zero_id));

        let element_pointer_key = CacheKey::Pointer { storage_class: StorageClass::Function, pointee: Box::new(element_key.clone()) };
        let element_pointer_ty = self.type_id(element_pointer_key);
        let element_var_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::VARIABLE).operand(element_pointer_ty).operand(element_var_id).operand(StorageClass::Function.word()));
        self.locals.insert(variable_index.get(), (element_var_id, element_key.clone()));

        let header_label = self.cache.fresh_id();
        let check_label = self.cache.fresh_id();
        let body_label = self.cache.fresh_id();
        let continue_label = self.cache.fresh_id();
        let merge_label = self.cache.fresh_id();
        let bool_ty = self.type_id(CacheKey::Bool);

        self.body.push(Instruction::new(op::BRANCH).operand(header_label));
        self.body.push(Instruction::new(op::LABEL).operand(header_label));
        self.body.push(Instruction::new(op::LOOP_MERGE).operand(merge_label).operand(continue_label).operand(0));
        self.body.push(Instruction::new(op::BRANCH).operand(check_label));
        self.body.push(Instruction::new(op::LABEL).operand(check_label));
        let cur_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::LOAD).operand(int_ty).operand(cur_id).operand(counter_id));
        let cond_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::U_LESS_THAN).operand(bool_ty).operand(cond_id).operand(cur_id).operand(length_id));
        self.body.push(Instruction::new(op::BRANCH_CONDITIONAL).operand(cond_id).operand(body_label).operand(merge_label));
        self.body.push(Instruction::new(op::LABEL).operand(body_label));
        self.terminated = false;

        let element_ty = self.type_id(element_key.clone());
        let elem_ptr_ty = self.type_id(CacheKey::Pointer { storage_class, pointee: Box::new(element_key) });
        let elem_ptr_id = self.cache.fresh_id();
        self.body.push(
            Instruction::new(op::ACCESS_CHAIN).operand(elem_ptr_ty).operand(elem_ptr_id).operand(container_ptr).operand(cur_id),
        );
        let elem_value_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::LOAD).operand(element_ty).operand(elem_value_id).operand(elem_ptr_id));
        self.body.push(Instruction::new(op::STORE).operand(element_var_id).operand(elem_value_id));

        self.loop_stack.push((merge_label, continue_label));
        self.emit_statement(body)?;
        self.loop_stack.pop();
        if !self.terminated {
            self.body.push(Instruction::new(op::BRANCH).operand(continue_label));
        }
        self.body.push(Instruction::new(op::LABEL).operand(continue_label));
        self.terminated = false;
        let cur2_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::LOAD).operand(int_ty).operand(cur2_id).operand(counter_id));
        let next_id = self.cache.fresh_id();
        self.body.push(Instruction::new(op::I_ADD).operand(int_ty).operand(next_id).operand(cur2_id).operand(one_id));
        self.body.push(Instruction::new(op::STORE).operand(counter_id).operand(next_id));
        self.body.push(Instruction::new(op::BRANCH).operand(header_label));
        self.body.push(Instruction::new(op::LABEL).operand(merge_label));
        self.terminated = false;
        Ok(())
    }
}

fn base_scalar(key: &CacheKey) -> &CacheKey {
    match key {
        CacheKey::Vector { component, .. } => base_scalar(component),
        CacheKey::Matrix { column, .. } => base_scalar(column),
        other => other,
    }
}

fn convert_opcode(from: &CacheKey, to: &CacheKey) -> u16 {
    let from_scalar = base_scalar(from);
    let to_scalar = base_scalar(to);
    match (from_scalar, to_scalar) {
        (CacheKey::Float { .. }, CacheKey::Int { signed: false, .. }) => op::CONVERT_F_TO_U,
        (CacheKey::Float { .. }, CacheKey::Int { signed: true, .. }) => op::CONVERT_F_TO_S,
        (CacheKey::Int { signed: true, .. }, CacheKey::Float { .. }) => op::CONVERT_S_TO_F,
        (CacheKey::Int { signed: false, .. }, CacheKey::Float { .. }) => op::CONVERT_U_TO_F,
        _ => op::BITCAST,
    }
}

pub fn emit_module(module: &Module, plan: &ModulePlan, options: &CompilerOptions) -> Result<SpirvModule, crate::error::Error> {
    let mut cache = Cache::new(1);
    let version_word = ((options.spirv_version.0 as u32) << 16) | ((options.spirv_version.1 as u32) << 8);
    let mut out = SpirvModule::new(version_word);

    for cap in &plan.capabilities {
        out.capabilities.push(Instruction::new(op::CAPABILITY).operand(cap_word(*cap)));
    }

    let glsl_ext_inst = if plan.needs_glsl_ext_inst {
        let id = cache.fresh_id();
        out.ext_inst_imports.push(Instruction::new(op::EXT_INST_IMPORT).operand(id).string("GLSL.std.450"));
        id
    } else {
        0
    };

    out.memory_model.push(Instruction::new(op::MEMORY_MODEL).operand(0).operand(1)); // Logical, GLSL450

    let mut constants: HashMap<usize, ConstantValue> = HashMap::new();
    for entry in module.constants.values() {
        if let Some(value) = &entry.value {
            constants.insert(entry.index.get(), value.clone());
        }
    }

    let globals = emit_globals(module, options, &mut cache, &mut out, &constants)?;

    // Two maps over the same ids: one by name (entry points are looked up by
    // source name), one by dense `FunctionIndex` (calls reference callees by
    // index — see `ExpressionKind::CallFunction`). Both are populated before
    // any function body is emitted so forward and mutually-recursive-looking
    // calls (forbidden by C6, but the backend doesn't re-check) resolve.
    let mut function_ids_by_name = HashMap::new();
    let mut function_ids_by_index = HashMap::new();
    for (name, func) in module.functions.iter() {
        let id = cache.fresh_id();
        function_ids_by_name.insert(name.clone(), id);
        if let Some(index) = func.index {
            function_ids_by_index.insert(index.get(), id);
        }
    }

    for (name, func) in module.functions.iter() {
        let &function_id = function_ids_by_name.get(name).expect("registered above");
        emit_function(func, function_id, &mut cache, &globals, &function_ids_by_index, &constants, &mut out, glsl_ext_inst, options)?;
    }

    for entry in &plan.entry_points {
        let Some(&function_id) = function_ids_by_name.get(&entry.function_name) else { continue };
        out.entry_points.push(
            Instruction::new(op::ENTRY_POINT)
                .operand(entry.model.word())
                .operand(function_id)
                .string(&entry.function_name),
        );
        if matches!(entry.model, ExecutionModel::Fragment) {
            out.execution_modes.push(Instruction::new(op::EXECUTION_MODE).operand(function_id).operand(7)); // OriginUpperLeft
        }
    }

    if options.debug_level >= crate::options::DebugLevel::Minimal {
        for (name, _) in module.functions.iter() {
            if let Some(&id) = function_ids_by_name.get(name) {
                out.debug_info.push(Instruction::new(op::NAME).operand(id).string(name));
            }
        }
    }

    out.bound = cache.bound();
    Ok(out)
}

fn cap_word(cap: Capability) -> u32 {
    cap.word()
}

fn external_attr_u32(ext: &ExternalVar, name: AttributeName) -> Option<u32> {
    ext.attributes.iter().find(|a| a.name == name).and_then(|a| a.args.first()).and_then(|arg| match arg {
        crate::ast::AttributeArg::IntegerLiteral(v) => Some(*v as u32),
        _ => None,
    })
}

/// `(size, alignment)` of `ty` under std140 packing (spec §4.10.2 "Struct
/// layouts are materialized via a `FieldOffsets` helper"). Simplified to
/// the common scalar/vector/matrix/array shapes external blocks use; a
/// nested struct member falls back to `(0, 4)` (unsupported, see
/// DESIGN.md).
fn std140_size_align(ty: &ExpressionType) -> (u32, u32) {
    match ty.resolve_alias() {
        ExpressionType::Primitive(_) => (4, 4),
        ExpressionType::Vector { component_count: 2, .. } => (8, 8),
        ExpressionType::Vector { .. } => (16, 16),
        ExpressionType::Matrix { columns, .. } => (16 * *columns as u32, 16),
        ExpressionType::Array { element, length } => {
            let (elem_size, _) = std140_size_align(element);
            let stride = round_up(elem_size, 16).max(16);
            (stride * *length, 16)
        }
        _ => (0, 4),
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Emits every external as a module-scope `OpVariable` decorated per spec
/// §4.10.2/§6.3 (`Block`, per-member `Offset`, `DescriptorSet`/`Binding` on
/// the variable) and returns the index → [`GlobalInfo`] map the per-function
/// emitters resolve `IdentifierValue`/`AccessField` chains against. Runs
/// once, before any function body, mirroring the pre-visitor's "assign
/// storage classes to externals" step (spec §4.10.3).
fn emit_globals(
    module: &Module,
    options: &CompilerOptions,
    cache: &mut Cache,
    out: &mut SpirvModule,
    constants: &HashMap<usize, ConstantValue>,
) -> Result<HashMap<usize, GlobalInfo>, crate::error::Error> {
    let empty_globals: HashMap<usize, GlobalInfo> = HashMap::new();
    let empty_functions: HashMap<usize, u32> = HashMap::new();
    let mut entries: Vec<(usize, GlobalInfo)> = Vec::new();
    let body;
    {
        let mut genv = FunctionEmitter {
            cache,
            locals: HashMap::new(),
            globals: &empty_globals,
            functions: &empty_functions,
            constants,
            body: Vec::new(),
            debug: Vec::new(),
            glsl_ext_inst: 0,
            options,
            loop_stack: Vec::new(),
            terminated: false,
        };

        for (_, ext) in module.externals.iter() {
            let Some(var_index) = ext.index else { continue };
            let resolved = ext.ty.resolve_alias();
            let (struct_index, storage_class) = match resolved {
                ExpressionType::Uniform { struct_index } => (*struct_index, StorageClass::Uniform),
                ExpressionType::Storage { struct_index, .. } => {
                    let sc = if options.spirv_version >= (1, 3) { StorageClass::StorageBuffer } else { StorageClass::Uniform };
                    (*struct_index, sc)
                }
                ExpressionType::PushConstant { struct_index } => (*struct_index, StorageClass::PushConstant),
                // Samplers/textures/arrays thereof aren't modeled by this
                // backend's type cache (DESIGN.md) — skip rather than fail
                // the whole module, matching how unsupported expressions
                // are reported lazily at point of use.
                _ => continue,
            };
            let Some(decl) = module.struct_by_index(struct_index) else { continue };
            let member_keys: Vec<CacheKey> = decl.fields.iter().filter_map(|f| CacheKey::from_type(&f.ty)).collect();
            if member_keys.len() != decl.fields.len() {
                continue;
            }
            let struct_key = CacheKey::Struct(member_keys);
            let struct_ty_id = genv.type_id(struct_key.clone());

            let mut offset = 0u32;
            for (i, field) in decl.fields.iter().enumerate() {
                let (size, align) = std140_size_align(&field.ty);
                offset = round_up(offset, align);
                genv.body.push(
                    Instruction::new(op::MEMBER_DECORATE).operand(struct_ty_id).operand(i as u32).operand(decoration::OFFSET).operand(offset),
                );
                if matches!(field.ty.resolve_alias(), ExpressionType::Matrix { .. }) {
                    genv.body.push(
                        Instruction::new(op::MEMBER_DECORATE).operand(struct_ty_id).operand(i as u32).operand(decoration::COL_MAJOR),
                    );
                    genv.body.push(
                        Instruction::new(op::MEMBER_DECORATE)
                            .operand(struct_ty_id)
                            .operand(i as u32)
                            .operand(decoration::MATRIX_STRIDE)
                            .operand(16),
                    );
                }
                offset += size;
            }
            genv.body.push(Instruction::new(op::DECORATE).operand(struct_ty_id).operand(decoration::BLOCK));

            let pointer_key = CacheKey::Pointer { storage_class, pointee: Box::new(struct_key.clone()) };
            let pointer_ty_id = genv.type_id(pointer_key);
            let var_id = genv.cache.fresh_id();
            genv.body.push(Instruction::new(op::VARIABLE).operand(pointer_ty_id).operand(var_id).operand(storage_class.word()));

            if storage_class != StorageClass::PushConstant {
                let set = external_attr_u32(ext, AttributeName::Set).unwrap_or(0);
                genv.body.push(Instruction::new(op::DECORATE).operand(var_id).operand(decoration::DESCRIPTOR_SET).operand(set));
                if let Some(binding) = external_attr_u32(ext, AttributeName::Binding) {
                    genv.body.push(Instruction::new(op::DECORATE).operand(var_id).operand(decoration::BINDING).operand(binding));
                }
            }

            entries.push((var_index.get(), GlobalInfo { var_id, pointee: struct_key, storage_class }));
        }

        body = genv.body;
    }
    for instr in body {
        out.constants_and_globals.push(instr);
    }
    let globals: HashMap<usize, GlobalInfo> = entries.into_iter().collect();
    Ok(globals)
}

fn emit_function(
    func: &FunctionDeclaration,
    function_id: u32,
    cache: &mut Cache,
    globals: &HashMap<usize, GlobalInfo>,
    functions: &HashMap<usize, u32>,
    constants: &HashMap<usize, ConstantValue>,
    out: &mut SpirvModule,
    glsl_ext_inst: u32,
    options: &CompilerOptions,
) -> Result<(), crate::error::Error> {
    let return_key = func
        .return_type
        .as_ref()
        .and_then(CacheKey::from_type)
        .unwrap_or(CacheKey::Void);

    let mut emitter = FunctionEmitter {
        cache,
        locals: HashMap::new(),
        globals,
        functions,
        constants,
        body: Vec::new(),
        debug: Vec::new(),
        glsl_ext_inst,
        options,
        loop_stack: Vec::new(),
        terminated: false,
    };

    let param_keys: Vec<CacheKey> = func
        .parameters
        .iter()
        .map(|p| CacheKey::from_type(&p.ty).unwrap_or(CacheKey::Void))
        .collect();
    let fn_type_key = CacheKey::Function { ret: Box::new(return_key.clone()), params: param_keys.clone() };
    let fn_type_id = emitter.type_id(fn_type_key);
    let return_ty_id = emitter.type_id(return_key);

    emitter.body.push(Instruction::new(op::FUNCTION).operand(return_ty_id).operand(function_id).operand(0).operand(fn_type_id));

    for (param, key) in func.parameters.iter().zip(param_keys.into_iter()) {
        let param_ty = emitter.type_id(key.clone());
        let param_id = emitter.cache.fresh_id();
        emitter.body.push(Instruction::new(op::FUNCTION_PARAMETER).operand(param_ty).operand(param_id));
        if let Some(index) = param.index {
            emitter.locals.insert(index.get(), (param_id, key));
        }
    }

    let entry_label = emitter.cache.fresh_id();
    emitter.body.push(Instruction::new(op::LABEL).operand(entry_label));
    emitter.emit_statement(&func.body).map_err(crate::error::Error::from)?;
    // A `void` function whose body doesn't end in an explicit `return` still
    // needs a terminator before `OpFunctionEnd` (spec §4.10.6 "every block
    // ends in exactly one terminator").
    if !emitter.terminated {
        emitter.body.push(Instruction::new(op::RETURN));
    }
    emitter.body.push(Instruction::new(op::FUNCTION_END));

    for instr in emitter.body {
        out.functions.push(instr);
    }
    for instr in emitter.debug {
        out.debug_info.push(instr);
    }
    Ok(())
}
