//! Hash-consed type/constant cache (spec §4.10 "shared cache"): SPIR-V
//! forbids emitting the same `OpTypeXxx`/`OpConstant` twice with distinct
//! result ids, so every type or constant the emitter needs is looked up
//! here first and only actually written the first time it's requested.

use std::collections::HashMap;

use crate::ast::{ExpressionType, PrimitiveType, SingleValue};

/// A type or constant shape, normalized enough to use as a hash-map key
/// (floats compared bit-for-bit, matching SPIR-V's requirement that
/// `OpConstant` values be bit-identical to dedupe, not merely `==`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Void,
    Bool,
    Int { width: u8, signed: bool },
    Float { width: u8 },
    Vector { component: Box<CacheKey>, count: u8 },
    Matrix { column: Box<CacheKey>, count: u8 },
    Array { element: Box<CacheKey>, length: u32 },
    RuntimeArray { element: Box<CacheKey> },
    Struct(Vec<CacheKey>),
    Pointer { storage_class: StorageClass, pointee: Box<CacheKey> },
    Function { ret: Box<CacheKey>, params: Vec<CacheKey> },
    ConstBool(bool),
    ConstInt { width: u8, signed: bool, bits: u64 },
    ConstFloat { width: u8, bits: u64 },
    ConstComposite { ty: Box<CacheKey>, components: Vec<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    UniformConstant,
    Input,
    Uniform,
    Output,
    Function,
    Private,
    PushConstant,
    StorageBuffer,
}

impl StorageClass {
    /// SPIR-V's numeric `StorageClass` operand value.
    pub fn word(self) -> u32 {
        match self {
            StorageClass::UniformConstant => 0,
            StorageClass::Input => 1,
            StorageClass::Uniform => 2,
            StorageClass::Output => 3,
            StorageClass::Private => 6,
            StorageClass::Function => 7,
            StorageClass::PushConstant => 9,
            StorageClass::StorageBuffer => 12,
        }
    }
}

impl CacheKey {
    pub fn from_primitive(p: PrimitiveType) -> CacheKey {
        match p {
            PrimitiveType::Bool => CacheKey::Bool,
            PrimitiveType::F32 => CacheKey::Float { width: 32 },
            PrimitiveType::F64 => CacheKey::Float { width: 64 },
            PrimitiveType::I32 => CacheKey::Int { width: 32, signed: true },
            PrimitiveType::U32 => CacheKey::Int { width: 32, signed: false },
            PrimitiveType::IntLiteral => CacheKey::Int { width: 32, signed: true },
            PrimitiveType::FloatLiteral => CacheKey::Float { width: 32 },
            PrimitiveType::String => CacheKey::Void,
        }
    }

    pub fn from_type(ty: &ExpressionType) -> Option<CacheKey> {
        Some(match ty.resolve_alias() {
            ExpressionType::NoType => CacheKey::Void,
            ExpressionType::Primitive(p) => CacheKey::from_primitive(*p),
            ExpressionType::Vector { component_count, primitive } => CacheKey::Vector {
                component: Box::new(CacheKey::from_primitive(*primitive)),
                count: *component_count,
            },
            ExpressionType::Matrix { columns, rows, primitive } => CacheKey::Matrix {
                column: Box::new(CacheKey::Vector {
                    component: Box::new(CacheKey::from_primitive(*primitive)),
                    count: *rows,
                }),
                count: *columns,
            },
            ExpressionType::Array { element, length } => {
                CacheKey::Array { element: Box::new(CacheKey::from_type(element)?), length: *length }
            }
            ExpressionType::DynArray { element } => {
                CacheKey::RuntimeArray { element: Box::new(CacheKey::from_type(element)?) }
            }
            _ => return None,
        })
    }

    pub fn from_single_value(value: &SingleValue) -> CacheKey {
        match value {
            SingleValue::Bool(v) => CacheKey::ConstBool(*v),
            SingleValue::F32(v) => CacheKey::ConstFloat { width: 32, bits: v.to_bits() as u64 },
            SingleValue::F64(v) => CacheKey::ConstFloat { width: 64, bits: v.to_bits() },
            SingleValue::I32(v) => CacheKey::ConstInt { width: 32, signed: true, bits: *v as u32 as u64 },
            SingleValue::U32(v) => CacheKey::ConstInt { width: 32, signed: false, bits: *v as u64 },
            SingleValue::IntLiteral(v) => CacheKey::ConstInt { width: 32, signed: true, bits: *v as u32 as u64 },
            SingleValue::FloatLiteral(v) => CacheKey::ConstFloat { width: 32, bits: (*v as f32).to_bits() as u64 },
            SingleValue::Vec2(_) | SingleValue::Vec3(_) | SingleValue::Vec4(_) => {
                // Composite constants are keyed by their already-resolved
                // component ids (see `Cache::constant_for_single`), not
                // re-derived here.
                CacheKey::Void
            }
        }
    }
}

/// Maps a cache key to the SPIR-V result id that was assigned the first
/// time it was requested.
#[derive(Default)]
pub struct Cache {
    ids: HashMap<CacheKey, u32>,
    next_id: u32,
}

impl Cache {
    pub fn new(first_id: u32) -> Self {
        Self { ids: HashMap::new(), next_id: first_id }
    }

    pub fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn bound(&self) -> u32 {
        self.next_id
    }

    /// Returns `(id, is_new)`: `is_new` tells the caller whether it still
    /// needs to emit the defining instruction.
    pub fn get_or_assign(&mut self, key: CacheKey) -> (u32, bool) {
        if let Some(&id) = self.ids.get(&key) {
            (id, false)
        } else {
            let id = self.fresh_id();
            self.ids.insert(key, id);
            (id, true)
        }
    }
}
