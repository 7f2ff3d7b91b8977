//! C2 — AST data model: expression/statement/type sum types,
//! [`ExpressionValue<T>`] (either a constant or an unresolved AST
//! expression), and constant values (spec §3.3–§3.7).
//!
//! Everything here is owned (no borrowed `&str`): a [`Module`] must survive
//! unchanged through resolution, constant folding, validation, the binary
//! serializer and every backend, so nodes don't carry a lifetime the way
//! the teacher's expression/statement nodes do over `Span<'base>`.

use std::sync::Arc;

use crate::map::OrderedMap;
use crate::nom_tools::SourceLocation;

pub type Index = usize;

macro_rules! index_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Index);

        impl $name {
            pub const UNDEFINED: Self = $name(usize::MAX);

            pub fn get(self) -> Index {
                self.0
            }
        }

        impl From<Index> for $name {
            fn from(value: Index) -> Self {
                $name(value)
            }
        }
    };
}

index_newtype!(AliasIndex);
index_newtype!(ConstantIndex);
index_newtype!(ExternalIndex);
index_newtype!(FunctionIndex);
index_newtype!(ModuleIndex);
index_newtype!(StructIndex);
index_newtype!(VariableIndex);
index_newtype!(OptionIndex);

// ---------------------------------------------------------------------
// Primitive / scalar kinds
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    F32,
    F64,
    I32,
    U32,
    String,
    /// Untyped integer literal (source version >= 1.2), narrows to a
    /// concrete numeric type at first use (spec §4.3, §4.7).
    IntLiteral,
    /// Untyped float literal, narrows to `f32`/`f64` at first use.
    FloatLiteral,
}

impl PrimitiveType {
    pub fn is_untyped(self) -> bool {
        matches!(self, PrimitiveType::IntLiteral | PrimitiveType::FloatLiteral)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::IntLiteral)
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveType::F32 | PrimitiveType::F64 | PrimitiveType::FloatLiteral)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// The concrete type an untyped literal narrows to absent any other
    /// constraint (spec §4.7: `i32` for integers, `f32` for floats).
    pub fn default_concrete(self) -> PrimitiveType {
        match self {
            PrimitiveType::IntLiteral => PrimitiveType::I32,
            PrimitiveType::FloatLiteral => PrimitiveType::F32,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerDim {
    D1,
    D2,
    D3,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba32F,
    R32F,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

// ---------------------------------------------------------------------
// Expression types (spec §3.3)
// ---------------------------------------------------------------------

/// `Eq`/`Hash` dropped (rather than `PartialEq`-only everywhere else) once
/// `Unresolved` started carrying a full `Expression`, which itself only
/// derives `PartialEq` (its `location`/`cached_expression_type` fields make
/// `Eq` awkward to mean anything useful).
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionType {
    NoType,
    Primitive(PrimitiveType),
    Vector { component_count: u8, primitive: PrimitiveType },
    Matrix { columns: u8, rows: u8, primitive: PrimitiveType },
    Array { element: Box<ExpressionType>, length: u32 },
    DynArray { element: Box<ExpressionType> },
    Struct { index: StructIndex },
    Alias { index: AliasIndex, target: Box<ExpressionType> },
    Function { index: FunctionIndex },
    Method { object_type: Box<ExpressionType>, method_index: usize },
    Intrinsic { intrinsic_id: IntrinsicId },
    Sampler { dim: SamplerDim, sampled_primitive: PrimitiveType, depth: bool },
    Texture { dim: SamplerDim, format: TextureFormat, base: PrimitiveType, access: TextureAccess },
    Storage { struct_index: StructIndex, access: TextureAccess },
    Uniform { struct_index: StructIndex },
    PushConstant { struct_index: StructIndex },
    Module { index: ModuleIndex },
    NamedExternalBlock { index: ExternalIndex },
    Type { index: Box<ExpressionType> },
    /// A type written in source that the parser could not resolve itself
    /// (anything beyond a bare primitive name): the raw expression syntax
    /// (`vec3[f32]`, `Foo.Bar`, `array[f32, 4]`, ...), reinterpreted by the
    /// identifier/type resolver (C6) once imports and declarations are
    /// known. No `Unresolved` survives past resolution (spec §3.3 invariant).
    Unresolved(Box<Expression>),
    /// Implicit partial types that only ever appear mid-inference; the
    /// resolver's invariant (spec §3.3) is that none survive into a
    /// `cached_expression_type` after resolution completes.
    ImplicitVector { component_count: u8 },
    ImplicitMatrix { columns: u8, rows: u8 },
    ImplicitArray,
}

impl ExpressionType {
    pub fn is_implicit(&self) -> bool {
        matches!(
            self,
            ExpressionType::ImplicitVector { .. }
                | ExpressionType::ImplicitMatrix { .. }
                | ExpressionType::ImplicitArray
        ) || matches!(self, ExpressionType::Primitive(p) if p.is_untyped())
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            ExpressionType::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn base_primitive(&self) -> Option<PrimitiveType> {
        match self {
            ExpressionType::Primitive(p) => Some(*p),
            ExpressionType::Vector { primitive, .. } => Some(*primitive),
            ExpressionType::Matrix { primitive, .. } => Some(*primitive),
            _ => None,
        }
    }

    pub fn component_count(&self) -> Option<u8> {
        match self {
            ExpressionType::Primitive(_) => Some(1),
            ExpressionType::Vector { component_count, .. } => Some(*component_count),
            ExpressionType::ImplicitVector { component_count } => Some(*component_count),
            _ => None,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, ExpressionType::Vector { .. })
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, ExpressionType::Matrix { .. })
    }

    /// Follows an `Alias`'s `target` chain to the first non-alias type
    /// (spec §3.3 invariant: idempotent under `resolve_alias`).
    pub fn resolve_alias(&self) -> &ExpressionType {
        let mut current = self;
        while let ExpressionType::Alias { target, .. } = current {
            current = target;
        }
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicId {
    ArraySize,
    Abs,
    Min,
    Max,
    Clamp,
    Lerp,
    Dot,
    Cross,
    Length,
    Normalize,
    Select,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Pow,
    Exp,
    Log,
    SampleTexture,
    Reflect,
}

// ---------------------------------------------------------------------
// Constant values (spec §3.7)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SingleValue {
    Bool(bool),
    F32(f32),
    F64(f64),
    I32(i32),
    U32(u32),
    String(String),
    IntLiteral(i64),
    FloatLiteral(f64),
    Vec2([Box<SingleValue>; 2]),
    Vec3([Box<SingleValue>; 3]),
    Vec4([Box<SingleValue>; 4]),
}

/// The 30-entry type-index order the binary serializer encodes constants
/// with (spec §3.7, §4.9). Order here is the authoritative tag order.
pub const SINGLE_VALUE_TAG_COUNT: u32 = 30;

impl SingleValue {
    pub fn type_tag(&self) -> u32 {
        match self {
            SingleValue::Bool(_) => 0,
            SingleValue::F32(_) => 1,
            SingleValue::F64(_) => 2,
            SingleValue::I32(_) => 3,
            SingleValue::U32(_) => 4,
            SingleValue::String(_) => 5,
            SingleValue::IntLiteral(_) => 6,
            SingleValue::FloatLiteral(_) => 7,
            SingleValue::Vec2(v) => 8 + v[0].scalar_tag_offset(),
            SingleValue::Vec3(v) => 14 + v[0].scalar_tag_offset(),
            SingleValue::Vec4(v) => 20 + v[0].scalar_tag_offset(),
        }
    }

    fn scalar_tag_offset(&self) -> u32 {
        match self {
            SingleValue::Bool(_) => 0,
            SingleValue::F32(_) => 1,
            SingleValue::F64(_) => 2,
            SingleValue::I32(_) => 3,
            SingleValue::U32(_) => 4,
            SingleValue::String(_) => 5,
            _ => 0,
        }
    }

    pub fn expression_type(&self) -> ExpressionType {
        match self {
            SingleValue::Bool(_) => ExpressionType::Primitive(PrimitiveType::Bool),
            SingleValue::F32(_) => ExpressionType::Primitive(PrimitiveType::F32),
            SingleValue::F64(_) => ExpressionType::Primitive(PrimitiveType::F64),
            SingleValue::I32(_) => ExpressionType::Primitive(PrimitiveType::I32),
            SingleValue::U32(_) => ExpressionType::Primitive(PrimitiveType::U32),
            SingleValue::String(_) => ExpressionType::Primitive(PrimitiveType::String),
            SingleValue::IntLiteral(_) => ExpressionType::Primitive(PrimitiveType::IntLiteral),
            SingleValue::FloatLiteral(_) => ExpressionType::Primitive(PrimitiveType::FloatLiteral),
            SingleValue::Vec2(v) => ExpressionType::Vector { component_count: 2, primitive: v[0].expression_type().as_primitive().unwrap_or(PrimitiveType::F32) },
            SingleValue::Vec3(v) => ExpressionType::Vector { component_count: 3, primitive: v[0].expression_type().as_primitive().unwrap_or(PrimitiveType::F32) },
            SingleValue::Vec4(v) => ExpressionType::Vector { component_count: 4, primitive: v[0].expression_type().as_primitive().unwrap_or(PrimitiveType::F32) },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Single(SingleValue),
    Array(Vec<SingleValue>),
}

impl ConstantValue {
    pub fn expression_type(&self) -> ExpressionType {
        match self {
            ConstantValue::Single(s) => s.expression_type(),
            ConstantValue::Array(items) => ExpressionType::Array {
                element: Box::new(items.first().map(|v| v.expression_type()).unwrap_or(ExpressionType::NoType)),
                length: items.len() as u32,
            },
        }
    }
}

// ---------------------------------------------------------------------
// ExpressionValue<T> — spec §3.4, §4.2, §9
// ---------------------------------------------------------------------

/// A place that is "a constant once resolved, an expression until then".
/// Used for option defaults, array lengths, and anywhere the language
/// demands a constant but the parser only has an AST expression yet.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionValue<T> {
    Absent,
    Value(T),
    Expression(Box<Expression>),
}

impl<T> ExpressionValue<T> {
    pub fn has_value(&self) -> bool {
        !matches!(self, ExpressionValue::Absent)
    }

    pub fn is_resulting_value(&self) -> bool {
        matches!(self, ExpressionValue::Value(_))
    }

    pub fn get_resulting_value(&self) -> Option<&T> {
        match self {
            ExpressionValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_expression(&self) -> Option<&Expression> {
        match self {
            ExpressionValue::Expression(e) => Some(e),
            _ => None,
        }
    }
}

impl<T> From<T> for ExpressionValue<T> {
    fn from(value: T) -> Self {
        ExpressionValue::Value(value)
    }
}

// ---------------------------------------------------------------------
// Attributes (spec §4.3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeName {
    Author,
    Binding,
    Builtin,
    Cond,
    DepthWrite,
    Desc,
    EarlyFragmentTests,
    Entry,
    Export,
    Feature,
    Interp,
    Layout,
    License,
    Location,
    NzslVersion,
    Set,
    Tag,
    Unroll,
    Workgroup,
    AutoBinding,
}

impl AttributeName {
    pub fn from_str(s: &str) -> Option<Self> {
        use AttributeName::*;
        Some(match s {
            "author" => Author,
            "binding" => Binding,
            "builtin" => Builtin,
            "cond" => Cond,
            "depth_write" => DepthWrite,
            "desc" => Desc,
            "early_fragment_tests" => EarlyFragmentTests,
            "entry" => Entry,
            "export" => Export,
            "feature" => Feature,
            "interp" => Interp,
            "layout" => Layout,
            "license" => License,
            "location" => Location,
            "nzsl_version" => NzslVersion,
            "set" => Set,
            "tag" => Tag,
            "unroll" => Unroll,
            "workgroup" => Workgroup,
            "auto_binding" => AutoBinding,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeArg {
    Identifier(String),
    StringLiteral(String),
    IntegerLiteral(i64),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: AttributeName,
    pub args: Vec<AttributeArg>,
    pub location: SourceLocation,
}

impl Attribute {
    pub fn has_value(&self) -> bool {
        !self.args.is_empty()
    }
}

pub type Attributes = Vec<Attribute>;

// ---------------------------------------------------------------------
// Expressions (spec §3.4)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Plus,
    LogicalNot,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub location: SourceLocation,
    /// Absent until the identifier/type resolver (C6) runs; invariant:
    /// never implicit nor an untyped literal once resolution is complete
    /// (spec §3.3, §8).
    pub cached_expression_type: Option<ExpressionType>,
}

impl Expression {
    pub fn new(kind: ExpressionKind, location: SourceLocation) -> Self {
        Self { kind, location, cached_expression_type: None }
    }

    pub fn ty(&self) -> Option<&ExpressionType> {
        self.cached_expression_type.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// Scalar or array literal constant, as written in source.
    Constant(ConstantValue),
    /// A bare identifier before resolution rewrites it into one of the
    /// reference kinds below.
    Identifier(String),
    AccessField { expr: Box<Expression>, field_name: String, field_index: Option<usize> },
    AccessIdentifier { expr: Box<Expression>, identifiers: Vec<String> },
    AccessIndex { expr: Box<Expression>, indices: Vec<Expression> },
    /// Resolved alias reference (post-resolution rewrite of `Identifier`).
    AliasValue { index: AliasIndex },
    Assign { target: Box<Expression>, value: Box<Expression> },
    Binary { op: BinaryOp, left: Box<Expression>, right: Box<Expression> },
    CallFunction { callee: Box<Expression>, arguments: Vec<Expression> },
    CallMethod { object: Box<Expression>, method: String, arguments: Vec<Expression> },
    Cast { target_type: Box<Expression>, arguments: Vec<Expression> },
    /// `const_select(cond, a, b)`.
    Conditional { condition: Box<Expression>, true_expr: Box<Expression>, false_expr: Box<Expression> },
    ConstantReference { index: ConstantIndex },
    FunctionReference { index: FunctionIndex },
    /// Unified post-resolution reference to a local/parameter variable.
    IdentifierValue { index: VariableIndex },
    Intrinsic { id: IntrinsicId, arguments: Vec<Expression> },
    IntrinsicFunctionReference { id: IntrinsicId },
    ModuleReference { index: ModuleIndex },
    NamedExternalBlockReference { index: ExternalIndex },
    StructTypeReference { index: StructIndex },
    Swizzle { expr: Box<Expression>, components: Vec<u8> },
    TypeReference { ty: Box<ExpressionType> },
    Unary { op: UnaryOp, expr: Box<Expression> },
    VariableValue { index: VariableIndex },
}

// ---------------------------------------------------------------------
// Statements (spec §3.4)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BranchArm {
    pub condition: Option<Expression>,
    pub body: Box<Statement>,
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: ExpressionType,
    pub attributes: Attributes,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    pub name: String,
    pub ty: ExpressionType,
    pub semantic: ParameterSemantic,
    pub location: SourceLocation,
    /// Assigned by the identifier/type resolver (C6), shared with the
    /// function body's own locals (spec §4.4 "dense indices per
    /// category"): parameter references inside the body resolve to the
    /// same `VariableIndex` stored here.
    pub index: Option<VariableIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSemantic {
    In,
    Out,
    Inout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: SourceLocation,
}

impl Statement {
    pub fn new(kind: StatementKind, location: SourceLocation) -> Self {
        Self { kind, location }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Branch { arms: Vec<BranchArm>, else_body: Option<Box<Statement>> },
    Break,
    /// A statically-resolved `if (const)` wrapper the resolver applies
    /// (spec §3.4) before the constant propagator eliminates the dead arm.
    Conditional { condition: Expression, truthy: Box<Statement>, falsy: Option<Box<Statement>> },
    Continue,
    DeclareAlias { name: String, target: Box<Expression>, attributes: Attributes, index: Option<AliasIndex> },
    DeclareConst { name: String, ty: Option<ExpressionType>, value: ExpressionValue<ConstantValue>, expr: Option<Box<Expression>>, index: Option<ConstantIndex> },
    DeclareExternal { name: Option<String>, vars: Vec<ExternalVar>, attributes: Attributes, index: Option<ExternalIndex> },
    DeclareFunction(Box<FunctionDeclaration>),
    DeclareOption { name: String, ty: ExpressionType, default: ExpressionValue<ConstantValue>, default_expr: Option<Box<Expression>>, index: Option<OptionIndex> },
    DeclareStruct(Box<StructDeclaration>),
    DeclareVariable { name: String, ty: Option<ExpressionType>, value: Option<Box<Expression>>, index: Option<VariableIndex> },
    Discard,
    Expression(Box<Expression>),
    For { variable: String, from: Box<Expression>, to: Box<Expression>, step: Option<Box<Expression>>, body: Box<Statement>, variable_index: Option<VariableIndex> },
    ForEach { variable: String, container: Box<Expression>, body: Box<Statement>, variable_index: Option<VariableIndex> },
    Import { module_path: Vec<String>, alias: Option<String>, identifiers: Vec<(String, Option<String>)>, module_index: Option<ModuleIndex> },
    Multi(Vec<Statement>),
    NoOp,
    Return(Option<Box<Expression>>),
    Scoped(Box<Statement>),
    While { condition: Box<Expression>, body: Box<Statement> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalVar {
    pub name: String,
    pub ty: ExpressionType,
    pub attributes: Attributes,
    pub location: SourceLocation,
    pub index: Option<VariableIndex>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDeclaration {
    pub name: String,
    pub fields: OrderedFields,
    pub attributes: Attributes,
    pub location: SourceLocation,
    pub index: Option<StructIndex>,
}

pub type OrderedFields = Vec<StructField>;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Option<ExpressionType>,
    pub body: Statement,
    pub attributes: Attributes,
    pub location: SourceLocation,
    pub index: Option<FunctionIndex>,
}

// ---------------------------------------------------------------------
// Module (spec §3.5)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFeature {
    F64,
    PrimitiveExternals,
    Texture1D,
}

impl LanguageFeature {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "f64" => Some(LanguageFeature::F64),
            "primitive_externals" => Some(LanguageFeature::PrimitiveExternals),
            "texture_1d" => Some(LanguageFeature::Texture1D),
            _ => None,
        }
    }

    pub fn bit(self) -> u32 {
        match self {
            LanguageFeature::F64 => 1 << 0,
            LanguageFeature::PrimitiveExternals => 1 << 1,
            LanguageFeature::Texture1D => 1 << 2,
        }
    }
}

/// Source-language version, packed 24-bit major.minor.patch (spec §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LangVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl LangVersion {
    pub const CURRENT_MAX: LangVersion = LangVersion { major: 1, minor: 3, patch: 0 };
    /// Literals before this version default to concrete `i32`/`f32`
    /// instead of untyped (spec §4.3).
    pub const UNTYPED_LITERALS_SINCE: LangVersion = LangVersion { major: 1, minor: 2, patch: 0 };
    /// Storage buffers require this version (spec §4.10.3).
    pub const STORAGE_BUFFERS_SINCE: LangVersion = LangVersion { major: 1, minor: 3, patch: 0 };

    pub fn pack(self) -> u32 {
        ((self.major as u32) << 16) | ((self.minor as u32) << 8) | (self.patch as u32)
    }

    pub fn unpack(packed: u32) -> Self {
        Self {
            major: ((packed >> 16) & 0xFF) as u8,
            minor: ((packed >> 8) & 0xFF) as u8,
            patch: (packed & 0xFF) as u8,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    pub module_name: Option<String>,
    pub lang_version: Option<LangVersion>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub features: Vec<LanguageFeature>,
}

impl ModuleMetadata {
    pub fn feature_bitmask(&self) -> u32 {
        self.features.iter().fold(0, |acc, f| acc | f.bit())
    }

    pub fn has_feature(&self, feature: LanguageFeature) -> bool {
        self.features.contains(&feature)
    }
}

#[derive(Debug, Clone)]
pub struct ImportedModule {
    pub identifier: String,
    pub module: Arc<Module>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub metadata: ModuleMetadata,
    pub imports: Vec<ImportedModule>,
    pub root: Statement,

    // Resolved registries, populated by C6 forward registration. Absent
    // (empty) in a freshly parsed, unresolved module.
    pub structs: OrderedMap<String, StructDeclaration>,
    pub functions: OrderedMap<String, FunctionDeclaration>,
    pub constants: OrderedMap<String, ConstantDeclarationInfo>,
    pub externals: OrderedMap<String, ExternalVar>,
    pub aliases: OrderedMap<String, AliasInfo>,
    pub options: OrderedMap<String, OptionInfo>,
}

#[derive(Debug, Clone)]
pub struct ConstantDeclarationInfo {
    pub index: ConstantIndex,
    pub ty: ExpressionType,
    pub value: Option<ConstantValue>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct AliasInfo {
    pub index: AliasIndex,
    pub target: ExpressionType,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct OptionInfo {
    pub index: OptionIndex,
    pub ty: ExpressionType,
    pub default: Option<ConstantValue>,
    pub location: SourceLocation,
    /// FNV-1a hash of the option's dotted identifier, used to key
    /// compile-time overrides (spec §4.6 "option hash collision", GLOSSARY).
    pub hash: u64,
}

pub fn option_hash(dotted_name: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in dotted_name.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl Module {
    /// Looks up a struct declaration by its resolved dense index (spec §3.6
    /// "symbol tables and indices"). Used by backends that only carry an
    /// `ExpressionType::Struct`/`Uniform`/`Storage`/`PushConstant` index and
    /// need the field list behind it.
    ///
    /// Falls back to imported modules when `index` isn't one of this
    /// module's own structs, since `M.Block`'s `StructIndex` is assigned in
    /// `M`'s own index space, not renumbered on import. This can't
    /// disambiguate two distinct structs that happen to share a raw index
    /// across different modules; see DESIGN.md.
    pub fn struct_by_index(&self, index: StructIndex) -> Option<&StructDeclaration> {
        self.structs.values().find(|s| s.index == Some(index)).or_else(|| {
            self.imports.iter().find_map(|imported| imported.module.struct_by_index(index))
        })
    }

    pub fn empty(metadata: ModuleMetadata) -> Self {
        Self {
            metadata,
            imports: Vec::new(),
            root: Statement::new(StatementKind::Multi(Vec::new()), dummy_location()),
            structs: OrderedMap::new(),
            functions: OrderedMap::new(),
            constants: OrderedMap::new(),
            externals: OrderedMap::new(),
            aliases: OrderedMap::new(),
            options: OrderedMap::new(),
        }
    }
}

/// A placeholder location for synthetic nodes (e.g. an empty root before
/// parsing populates it). The validator treats a statically-dead node with
/// no real location as diagnosable only if something still references it
/// after constant elimination (spec §3.1 "missing locations... diagnosed
/// only by the validator").
pub fn dummy_location() -> SourceLocation {
    use crate::file::SourceFile;
    SourceLocation {
        file: Arc::new(SourceFile::new(vec!["<synthetic>".into()], String::new())),
        start_line: 0,
        start_column: 0,
        end_line: 0,
        end_column: 0,
        position: 0..0,
    }
}
