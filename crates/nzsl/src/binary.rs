//! C9 — versioned binary (de)serializer (spec §4.9, §6.2).
//!
//! Stream shape: `u32 magic (0x4E534852); u32 version; <module>`. A writer
//! always emits [`CURRENT_VERSION`]; a reader accepts any version <=
//! current and branches on it for the handful of fields whose layout moved
//! (language-version packing changed in v14, the feature set moved from a
//! length-prefixed string list to a bitmask in v16). Strings are written
//! through a first-use table so repeated names (type names, field names)
//! cost one index after their first occurrence. Constant single values are
//! tagged by the 30-entry index in [`crate::ast::SingleValue::type_tag`];
//! types by the 22-entry tag below. An unrecognized tag is always an error,
//! never silently skipped.

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nzsl_diagnostics_macros::Diagnostic;

use crate::ast::{
    AliasInfo, Attribute, AttributeArg, AttributeName, BinaryOp, ConstantDeclarationInfo, ConstantValue,
    Expression, ExpressionKind, ExpressionType, ExpressionValue, ExternalVar, FunctionDeclaration,
    FunctionParameter, IntrinsicId, LangVersion, LanguageFeature, Module, ModuleMetadata, OptionInfo,
    ParameterSemantic, PrimitiveType, SamplerDim, SingleValue, Statement, StatementKind, StructDeclaration,
    StructField, TextureAccess, TextureFormat, UnaryOp,
};
use crate::file::SourceFile;
use crate::nom_tools::SourceLocation;

pub const MAGIC: u32 = 0x4E53_4852;
pub const CURRENT_VERSION: u32 = 16;
/// Feature set switched from a length-prefixed string list to a bitmask at
/// this version (spec §4.9).
const FEATURE_BITMASK_SINCE: u32 = 16;
/// Language version switched from three separate bytes to the packed 24-bit
/// `major.minor.patch` word at this version (spec §4.9).
const PACKED_LANG_VERSION_SINCE: u32 = 14;

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum BinaryError {
    #[error("bad magic number: expected {expected:#010x}, found {found:#010x}")]
    #[diagnostic(code = "binary::bad-magic")]
    BadMagic { expected: u32, found: u32 },

    #[error("unsupported binary format version {found} (reader supports up to {max})")]
    #[diagnostic(code = "binary::unsupported-version")]
    UnsupportedVersion { found: u32, max: u32 },

    #[error("unknown constant type tag {tag}")]
    #[diagnostic(code = "binary::unknown-constant-tag")]
    UnknownConstantTag { tag: u32 },

    #[error("unknown type tag {tag}")]
    #[diagnostic(code = "binary::unknown-type-tag")]
    UnknownTypeTag { tag: u32 },

    #[error("string table reference {index} out of range (table has {len} entries)")]
    #[diagnostic(code = "binary::bad-string-ref")]
    BadStringRef { index: u32, len: usize },

    #[error("malformed binary stream: {reason}")]
    #[diagnostic(code = "binary::malformed")]
    Malformed { reason: String },

    #[error("file table reference {index} out of range (table has {len} entries)")]
    #[diagnostic(code = "binary::bad-file-ref")]
    BadFileRef { index: u32, len: usize },

    #[error("i/o error while (de)serializing: {0}")]
    #[diagnostic(code = "binary::io")]
    Io(String),
}

impl From<std::io::Error> for BinaryError {
    fn from(e: std::io::Error) -> Self {
        BinaryError::Io(e.to_string())
    }
}

/// First-use string table shared by the writer and reader: a string is
/// either a fresh one (written/read in full and appended) or a back
/// reference by index (spec §6.2 `bool hasValue, bool isNew, ...`).
#[derive(Default)]
struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    fn write<W: Write>(&mut self, w: &mut W, value: &str) -> Result<(), BinaryError> {
        w.write_u8(1)?; // hasValue
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            w.write_u8(0)?; // isNew = false
            w.write_u32::<LittleEndian>(index as u32)?;
        } else {
            w.write_u8(1)?; // isNew = true
            let bytes = value.as_bytes();
            w.write_u32::<LittleEndian>(bytes.len() as u32)?;
            w.write_all(bytes)?;
            self.strings.push(value.to_string());
        }
        Ok(())
    }

    fn write_option<W: Write>(&mut self, w: &mut W, value: Option<&str>) -> Result<(), BinaryError> {
        match value {
            Some(v) => self.write(w, v),
            None => Ok(w.write_u8(0)?),
        }
    }

    fn read<R: Read>(&mut self, r: &mut R) -> Result<Option<String>, BinaryError> {
        if r.read_u8()? == 0 {
            return Ok(None);
        }
        if r.read_u8()? == 0 {
            let index = r.read_u32::<LittleEndian>()? as usize;
            let s = self
                .strings
                .get(index)
                .cloned()
                .ok_or(BinaryError::BadStringRef { index: index as u32, len: self.strings.len() })?;
            Ok(Some(s))
        } else {
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            let s = String::from_utf8(buf).map_err(|e| BinaryError::Malformed { reason: e.to_string() })?;
            self.strings.push(s.clone());
            Ok(Some(s))
        }
    }

    fn read_required<R: Read>(&mut self, r: &mut R) -> Result<String, BinaryError> {
        self.read(r)?.ok_or_else(|| BinaryError::Malformed { reason: "expected a string, found none".to_string() })
    }
}

/// First-use table for `SourceLocation`'s backing [`SourceFile`] (spec §3.1):
/// every node in a resolved module shares a handful of file identities (the
/// module itself plus each import), so the file's path and full text are
/// only written once per distinct file and referenced by index afterwards,
/// the same scheme [`StringTable`] uses for identifier text.
#[derive(Default)]
struct FileTable {
    files: Vec<Arc<SourceFile>>,
}

impl FileTable {
    fn write<W: Write>(&mut self, w: &mut W, strings: &mut StringTable, file: &Arc<SourceFile>) -> Result<(), BinaryError> {
        if let Some(index) = self.files.iter().position(|f| f.path == file.path && f.code == file.code) {
            w.write_u8(0)?; // isNew = false
            w.write_u32::<LittleEndian>(index as u32)?;
        } else {
            w.write_u8(1)?; // isNew = true
            w.write_u32::<LittleEndian>(file.path.len() as u32)?;
            for component in file.path.iter() {
                strings.write(w, component)?;
            }
            let bytes = file.code.as_bytes();
            w.write_u32::<LittleEndian>(bytes.len() as u32)?;
            w.write_all(bytes)?;
            self.files.push(file.clone());
        }
        Ok(())
    }

    fn read<R: Read>(&mut self, r: &mut R, strings: &mut StringTable) -> Result<Arc<SourceFile>, BinaryError> {
        if r.read_u8()? == 0 {
            let index = r.read_u32::<LittleEndian>()? as usize;
            return self
                .files
                .get(index)
                .cloned()
                .ok_or(BinaryError::BadFileRef { index: index as u32, len: self.files.len() });
        }
        let component_count = r.read_u32::<LittleEndian>()?;
        let mut path = Vec::with_capacity(component_count as usize);
        for _ in 0..component_count {
            path.push(strings.read_required(r)?);
        }
        let len = r.read_u32::<LittleEndian>()? as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        let code = String::from_utf8(buf).map_err(|e| BinaryError::Malformed { reason: e.to_string() })?;
        let file = Arc::new(SourceFile::new(path, code));
        self.files.push(file.clone());
        Ok(file)
    }
}

/// The 22-entry type tag order (spec §4.9, §6.2). Kept here rather than on
/// `ExpressionType` itself since only fully-resolved shapes (no
/// `Unresolved`/implicit variants) are ever serialized.
fn type_tag(ty: &ExpressionType) -> Option<u32> {
    use ExpressionType::*;
    Some(match ty {
        NoType => 0,
        Primitive(PrimitiveType::Bool) => 1,
        Primitive(PrimitiveType::F32) => 2,
        Primitive(PrimitiveType::F64) => 3,
        Primitive(PrimitiveType::I32) => 4,
        Primitive(PrimitiveType::U32) => 5,
        Primitive(PrimitiveType::String) => 6,
        Vector { .. } => 7,
        Matrix { .. } => 8,
        Array { .. } => 9,
        DynArray { .. } => 10,
        Struct { .. } => 11,
        Alias { .. } => 12,
        Function { .. } => 13,
        Sampler { .. } => 14,
        Texture { .. } => 15,
        Storage { .. } => 16,
        Uniform { .. } => 17,
        PushConstant { .. } => 18,
        Module { .. } => 19,
        NamedExternalBlock { .. } => 20,
        Type { .. } => 21,
        Primitive(PrimitiveType::IntLiteral) | Primitive(PrimitiveType::FloatLiteral) => return None,
        Intrinsic { .. } | Method { .. } | Unresolved(_) | ImplicitVector { .. } | ImplicitMatrix { .. } | ImplicitArray => {
            return None
        }
    })
}

fn attribute_name_tag(name: &AttributeName) -> u8 {
    use AttributeName::*;
    match name {
        Author => 0,
        Binding => 1,
        Builtin => 2,
        Cond => 3,
        DepthWrite => 4,
        Desc => 5,
        EarlyFragmentTests => 6,
        Entry => 7,
        Export => 8,
        Feature => 9,
        Interp => 10,
        Layout => 11,
        License => 12,
        Location => 13,
        NzslVersion => 14,
        Set => 15,
        Tag => 16,
        Unroll => 17,
        Workgroup => 18,
        AutoBinding => 19,
    }
}

fn attribute_name_from_tag(tag: u8) -> Option<AttributeName> {
    use AttributeName::*;
    Some(match tag {
        0 => Author,
        1 => Binding,
        2 => Builtin,
        3 => Cond,
        4 => DepthWrite,
        5 => Desc,
        6 => EarlyFragmentTests,
        7 => Entry,
        8 => Export,
        9 => Feature,
        10 => Interp,
        11 => Layout,
        12 => License,
        13 => Location,
        14 => NzslVersion,
        15 => Set,
        16 => Tag,
        17 => Unroll,
        18 => Workgroup,
        19 => AutoBinding,
        _ => return None,
    })
}

fn binary_op_tag(op: BinaryOp) -> u8 {
    use BinaryOp::*;
    match op {
        Add => 0,
        Sub => 1,
        Mul => 2,
        Div => 3,
        Mod => 4,
        BitAnd => 5,
        BitOr => 6,
        BitXor => 7,
        Shl => 8,
        Shr => 9,
        Eq => 10,
        NotEq => 11,
        Lt => 12,
        Le => 13,
        Gt => 14,
        Ge => 15,
        LogicalAnd => 16,
        LogicalOr => 17,
    }
}

fn binary_op_from_tag(tag: u8) -> Option<BinaryOp> {
    use BinaryOp::*;
    Some(match tag {
        0 => Add,
        1 => Sub,
        2 => Mul,
        3 => Div,
        4 => Mod,
        5 => BitAnd,
        6 => BitOr,
        7 => BitXor,
        8 => Shl,
        9 => Shr,
        10 => Eq,
        11 => NotEq,
        12 => Lt,
        13 => Le,
        14 => Gt,
        15 => Ge,
        16 => LogicalAnd,
        17 => LogicalOr,
        _ => return None,
    })
}

fn unary_op_tag(op: UnaryOp) -> u8 {
    use UnaryOp::*;
    match op {
        Negate => 0,
        Plus => 1,
        LogicalNot => 2,
        BitNot => 3,
    }
}

fn unary_op_from_tag(tag: u8) -> Option<UnaryOp> {
    use UnaryOp::*;
    Some(match tag {
        0 => Negate,
        1 => Plus,
        2 => LogicalNot,
        3 => BitNot,
        _ => return None,
    })
}

fn intrinsic_id_tag(id: IntrinsicId) -> u8 {
    use IntrinsicId::*;
    match id {
        ArraySize => 0,
        Abs => 1,
        Min => 2,
        Max => 3,
        Clamp => 4,
        Lerp => 5,
        Dot => 6,
        Cross => 7,
        Length => 8,
        Normalize => 9,
        Select => 10,
        Floor => 11,
        Ceil => 12,
        Round => 13,
        Sqrt => 14,
        Pow => 15,
        Exp => 16,
        Log => 17,
        SampleTexture => 18,
        Reflect => 19,
    }
}

fn intrinsic_id_from_tag(tag: u8) -> Option<IntrinsicId> {
    use IntrinsicId::*;
    Some(match tag {
        0 => ArraySize,
        1 => Abs,
        2 => Min,
        3 => Max,
        4 => Clamp,
        5 => Lerp,
        6 => Dot,
        7 => Cross,
        8 => Length,
        9 => Normalize,
        10 => Select,
        11 => Floor,
        12 => Ceil,
        13 => Round,
        14 => Sqrt,
        15 => Pow,
        16 => Exp,
        17 => Log,
        18 => SampleTexture,
        19 => Reflect,
        _ => return None,
    })
}

fn parameter_semantic_tag(semantic: ParameterSemantic) -> u8 {
    match semantic {
        ParameterSemantic::In => 0,
        ParameterSemantic::Out => 1,
        ParameterSemantic::Inout => 2,
    }
}

fn parameter_semantic_from_tag(tag: u8) -> Option<ParameterSemantic> {
    Some(match tag {
        0 => ParameterSemantic::In,
        1 => ParameterSemantic::Out,
        2 => ParameterSemantic::Inout,
        _ => return None,
    })
}

pub struct Writer<'a> {
    strings: StringTable,
    files: FileTable,
    options: &'a crate::options::CompilerOptions,
}

impl<'a> Writer<'a> {
    pub fn new(options: &'a crate::options::CompilerOptions) -> Self {
        Self { strings: StringTable::default(), files: FileTable::default(), options }
    }

    pub fn write_module<W: Write>(&mut self, w: &mut W, module: &Module) -> Result<(), BinaryError> {
        w.write_u32::<LittleEndian>(MAGIC)?;
        w.write_u32::<LittleEndian>(CURRENT_VERSION)?;
        self.write_module_body(w, module)
    }

    /// Writes everything but the magic/version header: used both for the
    /// top-level module and, recursively, for each imported module (spec §3.5
    /// "imported modules are fully resolved before the importing module").
    fn write_module_body<W: Write>(&mut self, w: &mut W, module: &Module) -> Result<(), BinaryError> {
        self.write_metadata(w, &module.metadata)?;

        w.write_u32::<LittleEndian>(module.imports.len() as u32)?;
        for imp in &module.imports {
            self.strings.write(w, &imp.identifier)?;
            self.write_module_body(w, &imp.module)?;
        }

        w.write_u32::<LittleEndian>(module.structs.len() as u32)?;
        for decl in module.structs.values() {
            self.write_struct_declaration(w, decl)?;
        }

        w.write_u32::<LittleEndian>(module.constants.len() as u32)?;
        for (name, info) in module.constants.iter() {
            self.strings.write(w, name)?;
            self.write_constant_decl_info(w, info)?;
        }

        w.write_u32::<LittleEndian>(module.externals.len() as u32)?;
        for var in module.externals.values() {
            self.write_external_var(w, var)?;
        }

        w.write_u32::<LittleEndian>(module.aliases.len() as u32)?;
        for (name, info) in module.aliases.iter() {
            self.strings.write(w, name)?;
            self.write_alias_info(w, info)?;
        }

        w.write_u32::<LittleEndian>(module.options.len() as u32)?;
        for (name, info) in module.options.iter() {
            self.strings.write(w, name)?;
            self.write_option_info(w, info)?;
        }

        w.write_u32::<LittleEndian>(module.functions.len() as u32)?;
        for decl in module.functions.values() {
            self.write_function_declaration(w, decl)?;
        }

        self.write_statement(w, &module.root)?;

        Ok(())
    }

    fn write_location<W: Write>(&mut self, w: &mut W, location: &SourceLocation) -> Result<(), BinaryError> {
        self.files.write(w, &mut self.strings, &location.file)?;
        w.write_u32::<LittleEndian>(location.start_line)?;
        w.write_u32::<LittleEndian>(location.start_column)?;
        w.write_u32::<LittleEndian>(location.end_line)?;
        w.write_u32::<LittleEndian>(location.end_column)?;
        w.write_u32::<LittleEndian>(location.position.start as u32)?;
        w.write_u32::<LittleEndian>(location.position.end as u32)?;
        Ok(())
    }

    fn write_attributes<W: Write>(&mut self, w: &mut W, attrs: &[Attribute]) -> Result<(), BinaryError> {
        w.write_u32::<LittleEndian>(attrs.len() as u32)?;
        for attr in attrs {
            w.write_u8(attribute_name_tag(&attr.name))?;
            self.write_location(w, &attr.location)?;
            w.write_u32::<LittleEndian>(attr.args.len() as u32)?;
            for arg in &attr.args {
                self.write_attribute_arg(w, arg)?;
            }
        }
        Ok(())
    }

    fn write_attribute_arg<W: Write>(&mut self, w: &mut W, arg: &AttributeArg) -> Result<(), BinaryError> {
        match arg {
            AttributeArg::Identifier(s) => {
                w.write_u8(0)?;
                self.strings.write(w, s)?;
            }
            AttributeArg::StringLiteral(s) => {
                w.write_u8(1)?;
                self.strings.write(w, s)?;
            }
            AttributeArg::IntegerLiteral(v) => {
                w.write_u8(2)?;
                w.write_i64::<LittleEndian>(*v)?;
            }
            AttributeArg::Expression(e) => {
                w.write_u8(3)?;
                self.write_expression(w, e)?;
            }
        }
        Ok(())
    }

    fn write_expression<W: Write>(&mut self, w: &mut W, expr: &Expression) -> Result<(), BinaryError> {
        self.write_location(w, &expr.location)?;
        match &expr.cached_expression_type {
            Some(ty) => {
                w.write_u8(1)?;
                self.write_type(w, ty)?;
            }
            None => w.write_u8(0)?,
        }
        self.write_expression_kind(w, &expr.kind)
    }

    fn write_expression_kind<W: Write>(&mut self, w: &mut W, kind: &ExpressionKind) -> Result<(), BinaryError> {
        match kind {
            ExpressionKind::Constant(value) => {
                w.write_u8(0)?;
                self.write_constant_value(w, value)?;
            }
            ExpressionKind::Identifier(name) => {
                w.write_u8(1)?;
                self.strings.write(w, name)?;
            }
            ExpressionKind::AccessField { expr, field_name, field_index } => {
                w.write_u8(2)?;
                self.write_expression(w, expr)?;
                self.strings.write(w, field_name)?;
                self.write_option_u32(w, field_index.map(|v| v as u32))?;
            }
            ExpressionKind::AccessIdentifier { expr, identifiers } => {
                w.write_u8(3)?;
                self.write_expression(w, expr)?;
                w.write_u32::<LittleEndian>(identifiers.len() as u32)?;
                for id in identifiers {
                    self.strings.write(w, id)?;
                }
            }
            ExpressionKind::AccessIndex { expr, indices } => {
                w.write_u8(4)?;
                self.write_expression(w, expr)?;
                w.write_u32::<LittleEndian>(indices.len() as u32)?;
                for index in indices {
                    self.write_expression(w, index)?;
                }
            }
            ExpressionKind::AliasValue { index } => {
                w.write_u8(5)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
            ExpressionKind::Assign { target, value } => {
                w.write_u8(6)?;
                self.write_expression(w, target)?;
                self.write_expression(w, value)?;
            }
            ExpressionKind::Binary { op, left, right } => {
                w.write_u8(7)?;
                w.write_u8(binary_op_tag(*op))?;
                self.write_expression(w, left)?;
                self.write_expression(w, right)?;
            }
            ExpressionKind::CallFunction { callee, arguments } => {
                w.write_u8(8)?;
                self.write_expression(w, callee)?;
                self.write_expression_list(w, arguments)?;
            }
            ExpressionKind::CallMethod { object, method, arguments } => {
                w.write_u8(9)?;
                self.write_expression(w, object)?;
                self.strings.write(w, method)?;
                self.write_expression_list(w, arguments)?;
            }
            ExpressionKind::Cast { target_type, arguments } => {
                w.write_u8(10)?;
                self.write_expression(w, target_type)?;
                self.write_expression_list(w, arguments)?;
            }
            ExpressionKind::Conditional { condition, true_expr, false_expr } => {
                w.write_u8(11)?;
                self.write_expression(w, condition)?;
                self.write_expression(w, true_expr)?;
                self.write_expression(w, false_expr)?;
            }
            ExpressionKind::ConstantReference { index } => {
                w.write_u8(12)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
            ExpressionKind::FunctionReference { index } => {
                w.write_u8(13)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
            ExpressionKind::IdentifierValue { index } => {
                w.write_u8(14)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
            ExpressionKind::Intrinsic { id, arguments } => {
                w.write_u8(15)?;
                w.write_u8(intrinsic_id_tag(*id))?;
                self.write_expression_list(w, arguments)?;
            }
            ExpressionKind::IntrinsicFunctionReference { id } => {
                w.write_u8(16)?;
                w.write_u8(intrinsic_id_tag(*id))?;
            }
            ExpressionKind::ModuleReference { index } => {
                w.write_u8(17)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
            ExpressionKind::NamedExternalBlockReference { index } => {
                w.write_u8(18)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
            ExpressionKind::StructTypeReference { index } => {
                w.write_u8(19)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
            ExpressionKind::Swizzle { expr, components } => {
                w.write_u8(20)?;
                self.write_expression(w, expr)?;
                w.write_u32::<LittleEndian>(components.len() as u32)?;
                for c in components {
                    w.write_u8(*c)?;
                }
            }
            ExpressionKind::TypeReference { ty } => {
                w.write_u8(21)?;
                self.write_type(w, ty)?;
            }
            ExpressionKind::Unary { op, expr } => {
                w.write_u8(22)?;
                w.write_u8(unary_op_tag(*op))?;
                self.write_expression(w, expr)?;
            }
            ExpressionKind::VariableValue { index } => {
                w.write_u8(23)?;
                w.write_u32::<LittleEndian>(index.get() as u32)?;
            }
        }
        Ok(())
    }

    fn write_expression_list<W: Write>(&mut self, w: &mut W, list: &[Expression]) -> Result<(), BinaryError> {
        w.write_u32::<LittleEndian>(list.len() as u32)?;
        for expr in list {
            self.write_expression(w, expr)?;
        }
        Ok(())
    }

    fn write_option_u32<W: Write>(&mut self, w: &mut W, value: Option<u32>) -> Result<(), BinaryError> {
        match value {
            Some(v) => {
                w.write_u8(1)?;
                w.write_u32::<LittleEndian>(v)?;
            }
            None => w.write_u8(0)?,
        }
        Ok(())
    }

    fn write_option_expression<W: Write>(&mut self, w: &mut W, value: &Option<Box<Expression>>) -> Result<(), BinaryError> {
        match value {
            Some(e) => {
                w.write_u8(1)?;
                self.write_expression(w, e)?;
            }
            None => w.write_u8(0)?,
        }
        Ok(())
    }

    fn write_constant_expr_value<W: Write>(&mut self, w: &mut W, value: &ExpressionValue<ConstantValue>) -> Result<(), BinaryError> {
        match value {
            ExpressionValue::Absent => w.write_u8(0)?,
            ExpressionValue::Value(v) => {
                w.write_u8(1)?;
                self.write_constant_value(w, v)?;
            }
            ExpressionValue::Expression(e) => {
                w.write_u8(2)?;
                self.write_expression(w, e)?;
            }
        }
        Ok(())
    }

    fn write_statement<W: Write>(&mut self, w: &mut W, stmt: &Statement) -> Result<(), BinaryError> {
        self.write_location(w, &stmt.location)?;
        self.write_statement_kind(w, &stmt.kind)
    }

    fn write_statement_kind<W: Write>(&mut self, w: &mut W, kind: &StatementKind) -> Result<(), BinaryError> {
        match kind {
            StatementKind::Branch { arms, else_body } => {
                w.write_u8(0)?;
                w.write_u32::<LittleEndian>(arms.len() as u32)?;
                for arm in arms {
                    match &arm.condition {
                        Some(cond) => {
                            w.write_u8(1)?;
                            self.write_expression(w, cond)?;
                        }
                        None => w.write_u8(0)?,
                    }
                    w.write_u8(arm.is_const as u8)?;
                    self.write_statement(w, &arm.body)?;
                }
                match else_body {
                    Some(body) => {
                        w.write_u8(1)?;
                        self.write_statement(w, body)?;
                    }
                    None => w.write_u8(0)?,
                }
            }
            StatementKind::Break => w.write_u8(1)?,
            StatementKind::Conditional { condition, truthy, falsy } => {
                w.write_u8(2)?;
                self.write_expression(w, condition)?;
                self.write_statement(w, truthy)?;
                match falsy {
                    Some(body) => {
                        w.write_u8(1)?;
                        self.write_statement(w, body)?;
                    }
                    None => w.write_u8(0)?,
                }
            }
            StatementKind::Continue => w.write_u8(3)?,
            StatementKind::DeclareAlias { name, target, attributes, index } => {
                w.write_u8(4)?;
                self.strings.write(w, name)?;
                self.write_expression(w, target)?;
                self.write_attributes(w, attributes)?;
                self.write_option_u32(w, index.map(|i| i.get() as u32))?;
            }
            StatementKind::DeclareConst { name, ty, value, expr, index } => {
                w.write_u8(5)?;
                self.strings.write(w, name)?;
                match ty {
                    Some(t) => {
                        w.write_u8(1)?;
                        self.write_type(w, t)?;
                    }
                    None => w.write_u8(0)?,
                }
                self.write_constant_expr_value(w, value)?;
                self.write_option_expression(w, expr)?;
                self.write_option_u32(w, index.map(|i| i.get() as u32))?;
            }
            StatementKind::DeclareExternal { name, vars, attributes, index } => {
                w.write_u8(6)?;
                self.strings.write_option(w, name.as_deref())?;
                w.write_u32::<LittleEndian>(vars.len() as u32)?;
                for var in vars {
                    self.write_external_var(w, var)?;
                }
                self.write_attributes(w, attributes)?;
                self.write_option_u32(w, index.map(|i| i.get() as u32))?;
            }
            StatementKind::DeclareFunction(decl) => {
                w.write_u8(7)?;
                self.write_function_declaration(w, decl)?;
            }
            StatementKind::DeclareOption { name, ty, default, default_expr, index } => {
                w.write_u8(8)?;
                self.strings.write(w, name)?;
                self.write_type(w, ty)?;
                self.write_constant_expr_value(w, default)?;
                self.write_option_expression(w, default_expr)?;
                self.write_option_u32(w, index.map(|i| i.get() as u32))?;
            }
            StatementKind::DeclareStruct(decl) => {
                w.write_u8(9)?;
                self.write_struct_declaration(w, decl)?;
            }
            StatementKind::DeclareVariable { name, ty, value, index } => {
                w.write_u8(10)?;
                self.strings.write(w, name)?;
                match ty {
                    Some(t) => {
                        w.write_u8(1)?;
                        self.write_type(w, t)?;
                    }
                    None => w.write_u8(0)?,
                }
                self.write_option_expression(w, value)?;
                self.write_option_u32(w, index.map(|i| i.get() as u32))?;
            }
            StatementKind::Discard => w.write_u8(11)?,
            StatementKind::Expression(expr) => {
                w.write_u8(12)?;
                self.write_expression(w, expr)?;
            }
            StatementKind::For { variable, from, to, step, body, variable_index } => {
                w.write_u8(13)?;
                self.strings.write(w, variable)?;
                self.write_expression(w, from)?;
                self.write_expression(w, to)?;
                self.write_option_expression(w, step)?;
                self.write_statement(w, body)?;
                self.write_option_u32(w, variable_index.map(|i| i.get() as u32))?;
            }
            StatementKind::ForEach { variable, container, body, variable_index } => {
                w.write_u8(14)?;
                self.strings.write(w, variable)?;
                self.write_expression(w, container)?;
                self.write_statement(w, body)?;
                self.write_option_u32(w, variable_index.map(|i| i.get() as u32))?;
            }
            StatementKind::Import { module_path, alias, identifiers, module_index } => {
                w.write_u8(15)?;
                w.write_u32::<LittleEndian>(module_path.len() as u32)?;
                for segment in module_path {
                    self.strings.write(w, segment)?;
                }
                self.strings.write_option(w, alias.as_deref())?;
                w.write_u32::<LittleEndian>(identifiers.len() as u32)?;
                for (name, rename) in identifiers {
                    self.strings.write(w, name)?;
                    self.strings.write_option(w, rename.as_deref())?;
                }
                self.write_option_u32(w, module_index.map(|i| i.get() as u32))?;
            }
            StatementKind::Multi(stmts) => {
                w.write_u8(16)?;
                w.write_u32::<LittleEndian>(stmts.len() as u32)?;
                for s in stmts {
                    self.write_statement(w, s)?;
                }
            }
            StatementKind::NoOp => w.write_u8(17)?,
            StatementKind::Return(value) => {
                w.write_u8(18)?;
                self.write_option_expression(w, value)?;
            }
            StatementKind::Scoped(inner) => {
                w.write_u8(19)?;
                self.write_statement(w, inner)?;
            }
            StatementKind::While { condition, body } => {
                w.write_u8(20)?;
                self.write_expression(w, condition)?;
                self.write_statement(w, body)?;
            }
        }
        Ok(())
    }

    fn write_external_var<W: Write>(&mut self, w: &mut W, var: &ExternalVar) -> Result<(), BinaryError> {
        self.strings.write(w, &var.name)?;
        self.write_type(w, &var.ty)?;
        self.write_attributes(w, &var.attributes)?;
        self.write_location(w, &var.location)?;
        self.write_option_u32(w, var.index.map(|i| i.get() as u32))?;
        Ok(())
    }

    fn write_struct_declaration<W: Write>(&mut self, w: &mut W, decl: &StructDeclaration) -> Result<(), BinaryError> {
        self.strings.write(w, &decl.name)?;
        w.write_u32::<LittleEndian>(decl.fields.len() as u32)?;
        for field in &decl.fields {
            self.write_struct_field(w, field)?;
        }
        self.write_attributes(w, &decl.attributes)?;
        self.write_location(w, &decl.location)?;
        self.write_option_u32(w, decl.index.map(|i| i.get() as u32))?;
        Ok(())
    }

    fn write_struct_field<W: Write>(&mut self, w: &mut W, field: &StructField) -> Result<(), BinaryError> {
        self.strings.write(w, &field.name)?;
        self.write_type(w, &field.ty)?;
        self.write_attributes(w, &field.attributes)?;
        self.write_location(w, &field.location)?;
        Ok(())
    }

    fn write_function_declaration<W: Write>(&mut self, w: &mut W, decl: &FunctionDeclaration) -> Result<(), BinaryError> {
        self.strings.write(w, &decl.name)?;
        w.write_u32::<LittleEndian>(decl.parameters.len() as u32)?;
        for param in &decl.parameters {
            self.write_function_parameter(w, param)?;
        }
        match &decl.return_type {
            Some(t) => {
                w.write_u8(1)?;
                self.write_type(w, t)?;
            }
            None => w.write_u8(0)?,
        }
        self.write_statement(w, &decl.body)?;
        self.write_attributes(w, &decl.attributes)?;
        self.write_location(w, &decl.location)?;
        self.write_option_u32(w, decl.index.map(|i| i.get() as u32))?;
        Ok(())
    }

    fn write_function_parameter<W: Write>(&mut self, w: &mut W, param: &FunctionParameter) -> Result<(), BinaryError> {
        self.strings.write(w, &param.name)?;
        self.write_type(w, &param.ty)?;
        w.write_u8(parameter_semantic_tag(param.semantic))?;
        self.write_location(w, &param.location)?;
        self.write_option_u32(w, param.index.map(|i| i.get() as u32))?;
        Ok(())
    }

    fn write_constant_decl_info<W: Write>(&mut self, w: &mut W, info: &ConstantDeclarationInfo) -> Result<(), BinaryError> {
        self.write_type(w, &info.ty)?;
        match &info.value {
            Some(value) => {
                w.write_u8(1)?;
                self.write_constant_value(w, value)?;
            }
            None => w.write_u8(0)?,
        }
        self.write_location(w, &info.location)?;
        w.write_u32::<LittleEndian>(info.index.get() as u32)?;
        Ok(())
    }

    fn write_alias_info<W: Write>(&mut self, w: &mut W, info: &AliasInfo) -> Result<(), BinaryError> {
        self.write_type(w, &info.target)?;
        self.write_location(w, &info.location)?;
        w.write_u32::<LittleEndian>(info.index.get() as u32)?;
        Ok(())
    }

    fn write_option_info<W: Write>(&mut self, w: &mut W, info: &OptionInfo) -> Result<(), BinaryError> {
        self.write_type(w, &info.ty)?;
        match &info.default {
            Some(value) => {
                w.write_u8(1)?;
                self.write_constant_value(w, value)?;
            }
            None => w.write_u8(0)?,
        }
        self.write_location(w, &info.location)?;
        w.write_u32::<LittleEndian>(info.index.get() as u32)?;
        w.write_u64::<LittleEndian>(info.hash)?;
        Ok(())
    }

    fn write_metadata<W: Write>(&mut self, w: &mut W, metadata: &ModuleMetadata) -> Result<(), BinaryError> {
        self.strings.write_option(w, metadata.module_name.as_deref())?;

        let lang_version = metadata.lang_version.unwrap_or(LangVersion { major: 1, minor: 0, patch: 0 });
        if CURRENT_VERSION >= PACKED_LANG_VERSION_SINCE {
            w.write_u32::<LittleEndian>(lang_version.pack())?;
        } else {
            w.write_u8(lang_version.major)?;
            w.write_u8(lang_version.minor)?;
            w.write_u8(lang_version.patch)?;
        }

        self.strings.write_option(w, metadata.author.as_deref())?;
        self.strings.write_option(w, metadata.description.as_deref())?;
        self.strings.write_option(w, metadata.license.as_deref())?;

        if CURRENT_VERSION >= FEATURE_BITMASK_SINCE {
            w.write_u32::<LittleEndian>(metadata.feature_bitmask())?;
        } else {
            w.write_u32::<LittleEndian>(metadata.features.len() as u32)?;
            for feature in &metadata.features {
                let name = match feature {
                    LanguageFeature::F64 => "f64",
                    LanguageFeature::PrimitiveExternals => "primitive_externals",
                    LanguageFeature::Texture1D => "texture_1d",
                };
                self.strings.write(w, name)?;
            }
        }
        Ok(())
    }

    fn write_type<W: Write>(&mut self, w: &mut W, ty: &ExpressionType) -> Result<(), BinaryError> {
        let tag = type_tag(ty).ok_or_else(|| BinaryError::Malformed {
            reason: format!("cannot serialize an unresolved/implicit type: {ty:?}"),
        })?;
        w.write_u32::<LittleEndian>(tag)?;
        match ty {
            ExpressionType::Vector { component_count, primitive } => {
                w.write_u8(*component_count)?;
                self.write_primitive(w, *primitive)?;
            }
            ExpressionType::Matrix { columns, rows, primitive } => {
                w.write_u8(*columns)?;
                w.write_u8(*rows)?;
                self.write_primitive(w, *primitive)?;
            }
            ExpressionType::Array { element, length } => {
                self.write_type(w, element)?;
                w.write_u32::<LittleEndian>(*length)?;
            }
            ExpressionType::DynArray { element } => self.write_type(w, element)?,
            ExpressionType::Struct { index } => w.write_u32::<LittleEndian>(index.get() as u32)?,
            ExpressionType::Alias { index, target } => {
                w.write_u32::<LittleEndian>(index.get() as u32)?;
                self.write_type(w, target)?;
            }
            ExpressionType::Function { index } => w.write_u32::<LittleEndian>(index.get() as u32)?,
            ExpressionType::Sampler { dim, sampled_primitive, depth } => {
                self.write_sampler_dim(w, *dim)?;
                self.write_primitive(w, *sampled_primitive)?;
                w.write_u8(*depth as u8)?;
            }
            ExpressionType::Texture { dim, format, base, access } => {
                self.write_sampler_dim(w, *dim)?;
                self.write_texture_format(w, *format)?;
                self.write_primitive(w, *base)?;
                self.write_texture_access(w, *access)?;
            }
            ExpressionType::Storage { struct_index, access } => {
                w.write_u32::<LittleEndian>(struct_index.get() as u32)?;
                self.write_texture_access(w, *access)?;
            }
            ExpressionType::Uniform { struct_index } | ExpressionType::PushConstant { struct_index } => {
                w.write_u32::<LittleEndian>(struct_index.get() as u32)?;
            }
            ExpressionType::Module { index } => w.write_u32::<LittleEndian>(index.get() as u32)?,
            ExpressionType::NamedExternalBlock { index } => w.write_u32::<LittleEndian>(index.get() as u32)?,
            ExpressionType::Type { index } => self.write_type(w, index)?,
            ExpressionType::NoType | ExpressionType::Primitive(_) => {}
            _ => unreachable!("unresolved/implicit types are filtered out by type_tag"),
        }
        Ok(())
    }

    fn write_primitive<W: Write>(&mut self, w: &mut W, p: PrimitiveType) -> Result<(), BinaryError> {
        let code = match p {
            PrimitiveType::Bool => 0u8,
            PrimitiveType::F32 => 1,
            PrimitiveType::F64 => 2,
            PrimitiveType::I32 => 3,
            PrimitiveType::U32 => 4,
            PrimitiveType::String => 5,
            PrimitiveType::IntLiteral => 6,
            PrimitiveType::FloatLiteral => 7,
        };
        Ok(w.write_u8(code)?)
    }

    fn write_sampler_dim<W: Write>(&mut self, w: &mut W, dim: SamplerDim) -> Result<(), BinaryError> {
        let code = match dim {
            SamplerDim::D1 => 0u8,
            SamplerDim::D2 => 1,
            SamplerDim::D3 => 2,
            SamplerDim::Cube => 3,
        };
        Ok(w.write_u8(code)?)
    }

    fn write_texture_format<W: Write>(&mut self, w: &mut W, fmt: TextureFormat) -> Result<(), BinaryError> {
        let code = match fmt {
            TextureFormat::Rgba8 => 0u8,
            TextureFormat::Rgba32F => 1,
            TextureFormat::R32F => 2,
            TextureFormat::Unknown => 3,
        };
        Ok(w.write_u8(code)?)
    }

    fn write_texture_access<W: Write>(&mut self, w: &mut W, access: TextureAccess) -> Result<(), BinaryError> {
        let code = match access {
            TextureAccess::ReadOnly => 0u8,
            TextureAccess::WriteOnly => 1,
            TextureAccess::ReadWrite => 2,
        };
        Ok(w.write_u8(code)?)
    }

    fn write_single_value<W: Write>(&mut self, w: &mut W, value: &SingleValue) -> Result<(), BinaryError> {
        w.write_u32::<LittleEndian>(value.type_tag())?;
        match value {
            SingleValue::Bool(v) => w.write_u8(*v as u8)?,
            SingleValue::F32(v) => w.write_f32::<LittleEndian>(*v)?,
            SingleValue::F64(v) => w.write_f64::<LittleEndian>(*v)?,
            SingleValue::I32(v) => w.write_i32::<LittleEndian>(*v)?,
            SingleValue::U32(v) => w.write_u32::<LittleEndian>(*v)?,
            SingleValue::String(v) => {
                self.strings.write(w, v)?;
            }
            SingleValue::IntLiteral(v) => w.write_i64::<LittleEndian>(*v)?,
            SingleValue::FloatLiteral(v) => w.write_f64::<LittleEndian>(*v)?,
            SingleValue::Vec2(v) => {
                self.write_single_value(w, &v[0])?;
                self.write_single_value(w, &v[1])?;
            }
            SingleValue::Vec3(v) => {
                for lane in v {
                    self.write_single_value(w, lane)?;
                }
            }
            SingleValue::Vec4(v) => {
                for lane in v {
                    self.write_single_value(w, lane)?;
                }
            }
        }
        Ok(())
    }

    fn write_constant_value<W: Write>(&mut self, w: &mut W, value: &ConstantValue) -> Result<(), BinaryError> {
        match value {
            ConstantValue::Single(v) => {
                w.write_u8(0)?;
                self.write_single_value(w, v)?;
            }
            ConstantValue::Array(items) => {
                w.write_u8(1)?;
                w.write_u32::<LittleEndian>(items.len() as u32)?;
                for item in items {
                    self.write_single_value(w, item)?;
                }
            }
        }
        Ok(())
    }
}

pub struct Reader<'a> {
    strings: StringTable,
    files: FileTable,
    version: u32,
    options: &'a crate::options::CompilerOptions,
}

impl<'a> Reader<'a> {
    pub fn new(options: &'a crate::options::CompilerOptions) -> Self {
        Self { strings: StringTable::default(), files: FileTable::default(), version: CURRENT_VERSION, options }
    }

    pub fn read_header<R: Read>(&mut self, r: &mut R) -> Result<u32, BinaryError> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(BinaryError::BadMagic { expected: MAGIC, found: magic });
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version > CURRENT_VERSION {
            return Err(BinaryError::UnsupportedVersion { found: version, max: CURRENT_VERSION });
        }
        self.version = version;
        Ok(version)
    }

    fn read_metadata<R: Read>(&mut self, r: &mut R) -> Result<ModuleMetadata, BinaryError> {
        let module_name = self.strings.read(r)?;

        let lang_version = if self.version >= PACKED_LANG_VERSION_SINCE {
            Some(LangVersion::unpack(r.read_u32::<LittleEndian>()?))
        } else {
            let major = r.read_u8()?;
            let minor = r.read_u8()?;
            let patch = r.read_u8()?;
            Some(LangVersion { major, minor, patch })
        };

        let author = self.strings.read(r)?;
        let description = self.strings.read(r)?;
        let license = self.strings.read(r)?;

        let features = if self.version >= FEATURE_BITMASK_SINCE {
            let mask = r.read_u32::<LittleEndian>()?;
            [LanguageFeature::F64, LanguageFeature::PrimitiveExternals, LanguageFeature::Texture1D]
                .into_iter()
                .filter(|f| mask & f.bit() != 0)
                .collect()
        } else {
            let count = r.read_u32::<LittleEndian>()?;
            let mut features = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = self.strings.read_required(r)?;
                if let Some(f) = LanguageFeature::from_str(&name) {
                    features.push(f);
                }
            }
            features
        };

        Ok(ModuleMetadata { module_name, lang_version, author, description, license, features })
    }

    fn read_primitive<R: Read>(&mut self, r: &mut R) -> Result<PrimitiveType, BinaryError> {
        Ok(match r.read_u8()? {
            0 => PrimitiveType::Bool,
            1 => PrimitiveType::F32,
            2 => PrimitiveType::F64,
            3 => PrimitiveType::I32,
            4 => PrimitiveType::U32,
            5 => PrimitiveType::String,
            6 => PrimitiveType::IntLiteral,
            7 => PrimitiveType::FloatLiteral,
            other => return Err(BinaryError::Malformed { reason: format!("bad primitive code {other}") }),
        })
    }

    fn read_sampler_dim<R: Read>(&mut self, r: &mut R) -> Result<SamplerDim, BinaryError> {
        Ok(match r.read_u8()? {
            0 => SamplerDim::D1,
            1 => SamplerDim::D2,
            2 => SamplerDim::D3,
            3 => SamplerDim::Cube,
            other => return Err(BinaryError::Malformed { reason: format!("bad sampler dim code {other}") }),
        })
    }

    fn read_texture_format<R: Read>(&mut self, r: &mut R) -> Result<TextureFormat, BinaryError> {
        Ok(match r.read_u8()? {
            0 => TextureFormat::Rgba8,
            1 => TextureFormat::Rgba32F,
            2 => TextureFormat::R32F,
            3 => TextureFormat::Unknown,
            other => return Err(BinaryError::Malformed { reason: format!("bad texture format code {other}") }),
        })
    }

    fn read_texture_access<R: Read>(&mut self, r: &mut R) -> Result<TextureAccess, BinaryError> {
        Ok(match r.read_u8()? {
            0 => TextureAccess::ReadOnly,
            1 => TextureAccess::WriteOnly,
            2 => TextureAccess::ReadWrite,
            other => return Err(BinaryError::Malformed { reason: format!("bad texture access code {other}") }),
        })
    }

    fn read_type<R: Read>(&mut self, r: &mut R) -> Result<ExpressionType, BinaryError> {
        let tag = r.read_u32::<LittleEndian>()?;
        Ok(match tag {
            0 => ExpressionType::NoType,
            1 => ExpressionType::Primitive(PrimitiveType::Bool),
            2 => ExpressionType::Primitive(PrimitiveType::F32),
            3 => ExpressionType::Primitive(PrimitiveType::F64),
            4 => ExpressionType::Primitive(PrimitiveType::I32),
            5 => ExpressionType::Primitive(PrimitiveType::U32),
            6 => ExpressionType::Primitive(PrimitiveType::String),
            7 => {
                let component_count = r.read_u8()?;
                let primitive = self.read_primitive(r)?;
                ExpressionType::Vector { component_count, primitive }
            }
            8 => {
                let columns = r.read_u8()?;
                let rows = r.read_u8()?;
                let primitive = self.read_primitive(r)?;
                ExpressionType::Matrix { columns, rows, primitive }
            }
            9 => {
                let element = Box::new(self.read_type(r)?);
                let length = r.read_u32::<LittleEndian>()?;
                ExpressionType::Array { element, length }
            }
            10 => ExpressionType::DynArray { element: Box::new(self.read_type(r)?) },
            11 => ExpressionType::Struct { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            12 => {
                let index = (r.read_u32::<LittleEndian>()? as usize).into();
                let target = Box::new(self.read_type(r)?);
                ExpressionType::Alias { index, target }
            }
            13 => ExpressionType::Function { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            14 => {
                let dim = self.read_sampler_dim(r)?;
                let sampled_primitive = self.read_primitive(r)?;
                let depth = r.read_u8()? != 0;
                ExpressionType::Sampler { dim, sampled_primitive, depth }
            }
            15 => {
                let dim = self.read_sampler_dim(r)?;
                let format = self.read_texture_format(r)?;
                let base = self.read_primitive(r)?;
                let access = self.read_texture_access(r)?;
                ExpressionType::Texture { dim, format, base, access }
            }
            16 => {
                let struct_index = (r.read_u32::<LittleEndian>()? as usize).into();
                let access = self.read_texture_access(r)?;
                ExpressionType::Storage { struct_index, access }
            }
            17 => ExpressionType::Uniform { struct_index: (r.read_u32::<LittleEndian>()? as usize).into() },
            18 => ExpressionType::PushConstant { struct_index: (r.read_u32::<LittleEndian>()? as usize).into() },
            19 => ExpressionType::Module { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            20 => ExpressionType::NamedExternalBlock { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            21 => ExpressionType::Type { index: Box::new(self.read_type(r)?) },
            other => return Err(BinaryError::UnknownTypeTag { tag: other }),
        })
    }

    fn read_single_value<R: Read>(&mut self, r: &mut R) -> Result<SingleValue, BinaryError> {
        let tag = r.read_u32::<LittleEndian>()?;
        Ok(match tag {
            0 => SingleValue::Bool(r.read_u8()? != 0),
            1 => SingleValue::F32(r.read_f32::<LittleEndian>()?),
            2 => SingleValue::F64(r.read_f64::<LittleEndian>()?),
            3 => SingleValue::I32(r.read_i32::<LittleEndian>()?),
            4 => SingleValue::U32(r.read_u32::<LittleEndian>()?),
            5 => SingleValue::String(self.strings.read_required(r)?),
            6 => SingleValue::IntLiteral(r.read_i64::<LittleEndian>()?),
            7 => SingleValue::FloatLiteral(r.read_f64::<LittleEndian>()?),
            8..=13 => {
                let a = Box::new(self.read_single_value(r)?);
                let b = Box::new(self.read_single_value(r)?);
                SingleValue::Vec2([a, b])
            }
            14..=19 => {
                let a = Box::new(self.read_single_value(r)?);
                let b = Box::new(self.read_single_value(r)?);
                let c = Box::new(self.read_single_value(r)?);
                SingleValue::Vec3([a, b, c])
            }
            20..=25 => {
                let a = Box::new(self.read_single_value(r)?);
                let b = Box::new(self.read_single_value(r)?);
                let c = Box::new(self.read_single_value(r)?);
                let d = Box::new(self.read_single_value(r)?);
                SingleValue::Vec4([a, b, c, d])
            }
            other => return Err(BinaryError::UnknownConstantTag { tag: other }),
        })
    }

    fn read_constant_value<R: Read>(&mut self, r: &mut R) -> Result<ConstantValue, BinaryError> {
        Ok(match r.read_u8()? {
            0 => ConstantValue::Single(self.read_single_value(r)?),
            1 => {
                let count = r.read_u32::<LittleEndian>()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.read_single_value(r)?);
                }
                ConstantValue::Array(items)
            }
            other => return Err(BinaryError::Malformed { reason: format!("bad constant-value discriminant {other}") }),
        })
    }

    /// Reads a full module: header, metadata, imports (recursively), every
    /// symbol table, and the root AST (spec §4.9 round-trip law). Mirrors
    /// [`Writer::write_module`] field for field.
    pub fn read_module<R: Read>(&mut self, r: &mut R) -> Result<Module, BinaryError> {
        self.read_header(r)?;
        self.read_module_body(r)
    }

    fn read_module_body<R: Read>(&mut self, r: &mut R) -> Result<Module, BinaryError> {
        let metadata = self.read_metadata(r)?;

        let import_count = r.read_u32::<LittleEndian>()?;
        let mut imports = Vec::with_capacity(import_count as usize);
        for _ in 0..import_count {
            let identifier = self.strings.read_required(r)?;
            let module = self.read_module_body(r)?;
            imports.push(crate::ast::ImportedModule { identifier, module: Arc::new(module) });
        }

        let struct_count = r.read_u32::<LittleEndian>()?;
        let mut structs = crate::map::OrderedMap::new();
        for _ in 0..struct_count {
            let decl = self.read_struct_declaration(r)?;
            structs.insert(decl.name.clone(), decl);
        }

        let constant_count = r.read_u32::<LittleEndian>()?;
        let mut constants = crate::map::OrderedMap::new();
        for _ in 0..constant_count {
            let name = self.strings.read_required(r)?;
            let info = self.read_constant_decl_info(r)?;
            constants.insert(name, info);
        }

        let external_count = r.read_u32::<LittleEndian>()?;
        let mut externals = crate::map::OrderedMap::new();
        for _ in 0..external_count {
            let var = self.read_external_var(r)?;
            externals.insert(var.name.clone(), var);
        }

        let alias_count = r.read_u32::<LittleEndian>()?;
        let mut aliases = crate::map::OrderedMap::new();
        for _ in 0..alias_count {
            let name = self.strings.read_required(r)?;
            let info = self.read_alias_info(r)?;
            aliases.insert(name, info);
        }

        let option_count = r.read_u32::<LittleEndian>()?;
        let mut options = crate::map::OrderedMap::new();
        for _ in 0..option_count {
            let name = self.strings.read_required(r)?;
            let info = self.read_option_info(r)?;
            options.insert(name, info);
        }

        let function_count = r.read_u32::<LittleEndian>()?;
        let mut functions = crate::map::OrderedMap::new();
        for _ in 0..function_count {
            let decl = self.read_function_declaration(r)?;
            functions.insert(decl.name.clone(), decl);
        }

        let root = self.read_statement(r)?;

        Ok(Module { metadata, imports, root, structs, functions, constants, externals, aliases, options })
    }

    fn read_location<R: Read>(&mut self, r: &mut R) -> Result<SourceLocation, BinaryError> {
        let file = self.files.read(r, &mut self.strings)?;
        let start_line = r.read_u32::<LittleEndian>()?;
        let start_column = r.read_u32::<LittleEndian>()?;
        let end_line = r.read_u32::<LittleEndian>()?;
        let end_column = r.read_u32::<LittleEndian>()?;
        let start = r.read_u32::<LittleEndian>()? as usize;
        let end = r.read_u32::<LittleEndian>()? as usize;
        Ok(SourceLocation { file, start_line, start_column, end_line, end_column, position: start..end })
    }

    fn read_attributes<R: Read>(&mut self, r: &mut R) -> Result<Vec<Attribute>, BinaryError> {
        let count = r.read_u32::<LittleEndian>()?;
        let mut attrs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = r.read_u8()?;
            let name = attribute_name_from_tag(tag)
                .ok_or_else(|| BinaryError::Malformed { reason: format!("bad attribute name tag {tag}") })?;
            let location = self.read_location(r)?;
            let arg_count = r.read_u32::<LittleEndian>()?;
            let mut args = Vec::with_capacity(arg_count as usize);
            for _ in 0..arg_count {
                args.push(self.read_attribute_arg(r)?);
            }
            attrs.push(Attribute { name, args, location });
        }
        Ok(attrs)
    }

    fn read_attribute_arg<R: Read>(&mut self, r: &mut R) -> Result<AttributeArg, BinaryError> {
        Ok(match r.read_u8()? {
            0 => AttributeArg::Identifier(self.strings.read_required(r)?),
            1 => AttributeArg::StringLiteral(self.strings.read_required(r)?),
            2 => AttributeArg::IntegerLiteral(r.read_i64::<LittleEndian>()?),
            3 => AttributeArg::Expression(self.read_expression(r)?),
            other => return Err(BinaryError::Malformed { reason: format!("bad attribute-arg discriminant {other}") }),
        })
    }

    fn read_expression<R: Read>(&mut self, r: &mut R) -> Result<Expression, BinaryError> {
        let location = self.read_location(r)?;
        let cached_expression_type = if r.read_u8()? != 0 { Some(self.read_type(r)?) } else { None };
        let kind = self.read_expression_kind(r)?;
        Ok(Expression { kind, location, cached_expression_type })
    }

    fn read_expression_kind<R: Read>(&mut self, r: &mut R) -> Result<ExpressionKind, BinaryError> {
        Ok(match r.read_u8()? {
            0 => ExpressionKind::Constant(self.read_constant_value(r)?),
            1 => ExpressionKind::Identifier(self.strings.read_required(r)?),
            2 => {
                let expr = Box::new(self.read_expression(r)?);
                let field_name = self.strings.read_required(r)?;
                let field_index = self.read_option_u32(r)?.map(|v| v as usize);
                ExpressionKind::AccessField { expr, field_name, field_index }
            }
            3 => {
                let expr = Box::new(self.read_expression(r)?);
                let count = r.read_u32::<LittleEndian>()?;
                let mut identifiers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    identifiers.push(self.strings.read_required(r)?);
                }
                ExpressionKind::AccessIdentifier { expr, identifiers }
            }
            4 => {
                let expr = Box::new(self.read_expression(r)?);
                let count = r.read_u32::<LittleEndian>()?;
                let mut indices = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    indices.push(self.read_expression(r)?);
                }
                ExpressionKind::AccessIndex { expr, indices }
            }
            5 => ExpressionKind::AliasValue { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            6 => {
                let target = Box::new(self.read_expression(r)?);
                let value = Box::new(self.read_expression(r)?);
                ExpressionKind::Assign { target, value }
            }
            7 => {
                let tag = r.read_u8()?;
                let op = binary_op_from_tag(tag)
                    .ok_or_else(|| BinaryError::Malformed { reason: format!("bad binary-op tag {tag}") })?;
                let left = Box::new(self.read_expression(r)?);
                let right = Box::new(self.read_expression(r)?);
                ExpressionKind::Binary { op, left, right }
            }
            8 => {
                let callee = Box::new(self.read_expression(r)?);
                let arguments = self.read_expression_list(r)?;
                ExpressionKind::CallFunction { callee, arguments }
            }
            9 => {
                let object = Box::new(self.read_expression(r)?);
                let method = self.strings.read_required(r)?;
                let arguments = self.read_expression_list(r)?;
                ExpressionKind::CallMethod { object, method, arguments }
            }
            10 => {
                let target_type = Box::new(self.read_expression(r)?);
                let arguments = self.read_expression_list(r)?;
                ExpressionKind::Cast { target_type, arguments }
            }
            11 => {
                let condition = Box::new(self.read_expression(r)?);
                let true_expr = Box::new(self.read_expression(r)?);
                let false_expr = Box::new(self.read_expression(r)?);
                ExpressionKind::Conditional { condition, true_expr, false_expr }
            }
            12 => ExpressionKind::ConstantReference { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            13 => ExpressionKind::FunctionReference { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            14 => ExpressionKind::IdentifierValue { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            15 => {
                let tag = r.read_u8()?;
                let id = intrinsic_id_from_tag(tag)
                    .ok_or_else(|| BinaryError::Malformed { reason: format!("bad intrinsic tag {tag}") })?;
                let arguments = self.read_expression_list(r)?;
                ExpressionKind::Intrinsic { id, arguments }
            }
            16 => {
                let tag = r.read_u8()?;
                let id = intrinsic_id_from_tag(tag)
                    .ok_or_else(|| BinaryError::Malformed { reason: format!("bad intrinsic tag {tag}") })?;
                ExpressionKind::IntrinsicFunctionReference { id }
            }
            17 => ExpressionKind::ModuleReference { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            18 => ExpressionKind::NamedExternalBlockReference { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            19 => ExpressionKind::StructTypeReference { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            20 => {
                let expr = Box::new(self.read_expression(r)?);
                let count = r.read_u32::<LittleEndian>()?;
                let mut components = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    components.push(r.read_u8()?);
                }
                ExpressionKind::Swizzle { expr, components }
            }
            21 => ExpressionKind::TypeReference { ty: Box::new(self.read_type(r)?) },
            22 => {
                let tag = r.read_u8()?;
                let op = unary_op_from_tag(tag)
                    .ok_or_else(|| BinaryError::Malformed { reason: format!("bad unary-op tag {tag}") })?;
                let expr = Box::new(self.read_expression(r)?);
                ExpressionKind::Unary { op, expr }
            }
            23 => ExpressionKind::VariableValue { index: (r.read_u32::<LittleEndian>()? as usize).into() },
            other => return Err(BinaryError::Malformed { reason: format!("bad expression-kind discriminant {other}") }),
        })
    }

    fn read_expression_list<R: Read>(&mut self, r: &mut R) -> Result<Vec<Expression>, BinaryError> {
        let count = r.read_u32::<LittleEndian>()?;
        let mut list = Vec::with_capacity(count as usize);
        for _ in 0..count {
            list.push(self.read_expression(r)?);
        }
        Ok(list)
    }

    fn read_option_u32<R: Read>(&mut self, r: &mut R) -> Result<Option<u32>, BinaryError> {
        Ok(if r.read_u8()? != 0 { Some(r.read_u32::<LittleEndian>()?) } else { None })
    }

    fn read_option_expression<R: Read>(&mut self, r: &mut R) -> Result<Option<Box<Expression>>, BinaryError> {
        Ok(if r.read_u8()? != 0 { Some(Box::new(self.read_expression(r)?)) } else { None })
    }

    fn read_constant_expr_value<R: Read>(&mut self, r: &mut R) -> Result<ExpressionValue<ConstantValue>, BinaryError> {
        Ok(match r.read_u8()? {
            0 => ExpressionValue::Absent,
            1 => ExpressionValue::Value(self.read_constant_value(r)?),
            2 => ExpressionValue::Expression(Box::new(self.read_expression(r)?)),
            other => return Err(BinaryError::Malformed { reason: format!("bad expression-value discriminant {other}") }),
        })
    }

    fn read_statement<R: Read>(&mut self, r: &mut R) -> Result<Statement, BinaryError> {
        let location = self.read_location(r)?;
        let kind = self.read_statement_kind(r)?;
        Ok(Statement { kind, location })
    }

    fn read_statement_kind<R: Read>(&mut self, r: &mut R) -> Result<StatementKind, BinaryError> {
        Ok(match r.read_u8()? {
            0 => {
                let arm_count = r.read_u32::<LittleEndian>()?;
                let mut arms = Vec::with_capacity(arm_count as usize);
                for _ in 0..arm_count {
                    let condition = if r.read_u8()? != 0 { Some(self.read_expression(r)?) } else { None };
                    let is_const = r.read_u8()? != 0;
                    let body = Box::new(self.read_statement(r)?);
                    arms.push(crate::ast::BranchArm { condition, body, is_const });
                }
                let else_body = if r.read_u8()? != 0 { Some(Box::new(self.read_statement(r)?)) } else { None };
                StatementKind::Branch { arms, else_body }
            }
            1 => StatementKind::Break,
            2 => {
                let condition = self.read_expression(r)?;
                let truthy = Box::new(self.read_statement(r)?);
                let falsy = if r.read_u8()? != 0 { Some(Box::new(self.read_statement(r)?)) } else { None };
                StatementKind::Conditional { condition, truthy, falsy }
            }
            3 => StatementKind::Continue,
            4 => {
                let name = self.strings.read_required(r)?;
                let target = Box::new(self.read_expression(r)?);
                let attributes = self.read_attributes(r)?;
                let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::DeclareAlias { name, target, attributes, index }
            }
            5 => {
                let name = self.strings.read_required(r)?;
                let ty = if r.read_u8()? != 0 { Some(self.read_type(r)?) } else { None };
                let value = self.read_constant_expr_value(r)?;
                let expr = self.read_option_expression(r)?;
                let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::DeclareConst { name, ty, value, expr, index }
            }
            6 => {
                let name = self.strings.read(r)?;
                let count = r.read_u32::<LittleEndian>()?;
                let mut vars = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    vars.push(self.read_external_var(r)?);
                }
                let attributes = self.read_attributes(r)?;
                let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::DeclareExternal { name, vars, attributes, index }
            }
            7 => StatementKind::DeclareFunction(Box::new(self.read_function_declaration(r)?)),
            8 => {
                let name = self.strings.read_required(r)?;
                let ty = self.read_type(r)?;
                let default = self.read_constant_expr_value(r)?;
                let default_expr = self.read_option_expression(r)?;
                let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::DeclareOption { name, ty, default, default_expr, index }
            }
            9 => StatementKind::DeclareStruct(Box::new(self.read_struct_declaration(r)?)),
            10 => {
                let name = self.strings.read_required(r)?;
                let ty = if r.read_u8()? != 0 { Some(self.read_type(r)?) } else { None };
                let value = self.read_option_expression(r)?;
                let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::DeclareVariable { name, ty, value, index }
            }
            11 => StatementKind::Discard,
            12 => StatementKind::Expression(Box::new(self.read_expression(r)?)),
            13 => {
                let variable = self.strings.read_required(r)?;
                let from = Box::new(self.read_expression(r)?);
                let to = Box::new(self.read_expression(r)?);
                let step = self.read_option_expression(r)?;
                let body = Box::new(self.read_statement(r)?);
                let variable_index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::For { variable, from, to, step, body, variable_index }
            }
            14 => {
                let variable = self.strings.read_required(r)?;
                let container = Box::new(self.read_expression(r)?);
                let body = Box::new(self.read_statement(r)?);
                let variable_index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::ForEach { variable, container, body, variable_index }
            }
            15 => {
                let count = r.read_u32::<LittleEndian>()?;
                let mut module_path = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    module_path.push(self.strings.read_required(r)?);
                }
                let alias = self.strings.read(r)?;
                let id_count = r.read_u32::<LittleEndian>()?;
                let mut identifiers = Vec::with_capacity(id_count as usize);
                for _ in 0..id_count {
                    let name = self.strings.read_required(r)?;
                    let rename = self.strings.read(r)?;
                    identifiers.push((name, rename));
                }
                let module_index = self.read_option_u32(r)?.map(|v| (v as usize).into());
                StatementKind::Import { module_path, alias, identifiers, module_index }
            }
            16 => {
                let count = r.read_u32::<LittleEndian>()?;
                let mut stmts = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    stmts.push(self.read_statement(r)?);
                }
                StatementKind::Multi(stmts)
            }
            17 => StatementKind::NoOp,
            18 => StatementKind::Return(self.read_option_expression(r)?),
            19 => StatementKind::Scoped(Box::new(self.read_statement(r)?)),
            20 => {
                let condition = Box::new(self.read_expression(r)?);
                let body = Box::new(self.read_statement(r)?);
                StatementKind::While { condition, body }
            }
            other => return Err(BinaryError::Malformed { reason: format!("bad statement-kind discriminant {other}") }),
        })
    }

    fn read_external_var<R: Read>(&mut self, r: &mut R) -> Result<ExternalVar, BinaryError> {
        let name = self.strings.read_required(r)?;
        let ty = self.read_type(r)?;
        let attributes = self.read_attributes(r)?;
        let location = self.read_location(r)?;
        let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
        Ok(ExternalVar { name, ty, attributes, location, index })
    }

    fn read_struct_declaration<R: Read>(&mut self, r: &mut R) -> Result<StructDeclaration, BinaryError> {
        let name = self.strings.read_required(r)?;
        let count = r.read_u32::<LittleEndian>()?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            fields.push(self.read_struct_field(r)?);
        }
        let attributes = self.read_attributes(r)?;
        let location = self.read_location(r)?;
        let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
        Ok(StructDeclaration { name, fields, attributes, location, index })
    }

    fn read_struct_field<R: Read>(&mut self, r: &mut R) -> Result<StructField, BinaryError> {
        let name = self.strings.read_required(r)?;
        let ty = self.read_type(r)?;
        let attributes = self.read_attributes(r)?;
        let location = self.read_location(r)?;
        Ok(StructField { name, ty, attributes, location })
    }

    fn read_function_declaration<R: Read>(&mut self, r: &mut R) -> Result<FunctionDeclaration, BinaryError> {
        let name = self.strings.read_required(r)?;
        let count = r.read_u32::<LittleEndian>()?;
        let mut parameters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            parameters.push(self.read_function_parameter(r)?);
        }
        let return_type = if r.read_u8()? != 0 { Some(self.read_type(r)?) } else { None };
        let body = self.read_statement(r)?;
        let attributes = self.read_attributes(r)?;
        let location = self.read_location(r)?;
        let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
        Ok(FunctionDeclaration { name, parameters, return_type, body, attributes, location, index })
    }

    fn read_function_parameter<R: Read>(&mut self, r: &mut R) -> Result<FunctionParameter, BinaryError> {
        let name = self.strings.read_required(r)?;
        let ty = self.read_type(r)?;
        let tag = r.read_u8()?;
        let semantic = parameter_semantic_from_tag(tag)
            .ok_or_else(|| BinaryError::Malformed { reason: format!("bad parameter-semantic tag {tag}") })?;
        let location = self.read_location(r)?;
        let index = self.read_option_u32(r)?.map(|v| (v as usize).into());
        Ok(FunctionParameter { name, ty, semantic, location, index })
    }

    fn read_constant_decl_info<R: Read>(&mut self, r: &mut R) -> Result<ConstantDeclarationInfo, BinaryError> {
        let ty = self.read_type(r)?;
        let value = if r.read_u8()? != 0 { Some(self.read_constant_value(r)?) } else { None };
        let location = self.read_location(r)?;
        let index = (r.read_u32::<LittleEndian>()? as usize).into();
        Ok(ConstantDeclarationInfo { index, ty, value, location })
    }

    fn read_alias_info<R: Read>(&mut self, r: &mut R) -> Result<AliasInfo, BinaryError> {
        let target = self.read_type(r)?;
        let location = self.read_location(r)?;
        let index = (r.read_u32::<LittleEndian>()? as usize).into();
        Ok(AliasInfo { index, target, location })
    }

    fn read_option_info<R: Read>(&mut self, r: &mut R) -> Result<OptionInfo, BinaryError> {
        let ty = self.read_type(r)?;
        let default = if r.read_u8()? != 0 { Some(self.read_constant_value(r)?) } else { None };
        let location = self.read_location(r)?;
        let index = (r.read_u32::<LittleEndian>()? as usize).into();
        let hash = r.read_u64::<LittleEndian>()?;
        Ok(OptionInfo { index, ty, default, location, hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::SourceFile;
    use crate::options::CompilerOptions;

    fn file() -> SourceFile {
        SourceFile::new(vec!["binary_roundtrip".into()], String::new())
    }

    #[test]
    fn round_trips_a_resolved_module_with_constants_and_structs() {
        let source = r#"
            [nzsl_version("1.0")]
            module;

            option ForwardPass: bool = true;
            const Count = 3;

            struct Light {
                position: vec3[f32],
            }

            external {
                [set(0), binding(0)] light: uniform[Light]
            }

            [entry(frag)]
            fn main() {
                let x = Count + 1;
                let l = light.position;
            }
        "#;
        let options = CompilerOptions::default();
        let module = crate::compile_standalone(source, file(), &options).expect("compiles");

        let mut buf = Vec::new();
        Writer::new(&options).write_module(&mut buf, &module).expect("serializes");

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = Reader::new(&options).read_module(&mut cursor).expect("deserializes");

        assert_eq!(read_back.metadata.module_name, module.metadata.module_name);
        assert_eq!(read_back.metadata.lang_version, module.metadata.lang_version);
        assert_eq!(read_back.structs.len(), module.structs.len());
        assert_eq!(read_back.constants.len(), module.constants.len());
        assert_eq!(read_back.externals.len(), module.externals.len());
        assert_eq!(read_back.options.len(), module.options.len());
        assert_eq!(read_back.functions.len(), module.functions.len());

        let (name, info) = module.constants.iter().next().expect("has a constant");
        let (read_name, read_info) = read_back.constants.iter().next().expect("has a constant");
        assert_eq!(name, read_name);
        assert_eq!(info.value, read_info.value);
        assert_eq!(info.ty, read_info.ty);

        assert_eq!(read_back.root, module.root);
    }

    #[test]
    fn constant_folding_idempotence_survives_round_trip() {
        let source = r#"
            [nzsl_version("1.0")]
            module;

            const r = vec3[f32](1.0, 2.0, 4.0) / 2.0;
        "#;
        let options = CompilerOptions::default();
        let module = crate::compile_standalone(source, file(), &options).expect("compiles");

        let mut buf = Vec::new();
        Writer::new(&options).write_module(&mut buf, &module).expect("serializes");
        let mut cursor = std::io::Cursor::new(buf);
        let read_back = Reader::new(&options).read_module(&mut cursor).expect("deserializes");

        let (_, info) = read_back.constants.iter().next().expect("has a constant");
        assert_eq!(info.value, Some(ConstantValue::Array(vec![
            SingleValue::F32(0.5),
            SingleValue::F32(1.0),
            SingleValue::F32(2.0),
        ])));
    }
}
