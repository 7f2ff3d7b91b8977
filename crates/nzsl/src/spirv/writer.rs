//! Low-level SPIR-V word assembly: one `Vec<u32>` per module section (spec
//! §4.10/§6.3 fixed section order), concatenated into the final stream by
//! [`SpirvModule::into_words`].

/// One instruction: opcode plus operand words, with word-count-and-opcode
/// packed into the leading word on emission (SPIR-V's `(length << 16) |
/// opcode` header word).
pub struct Instruction {
    opcode: u16,
    operands: Vec<u32>,
}

impl Instruction {
    pub fn new(opcode: u16) -> Self {
        Self { opcode, operands: Vec::new() }
    }

    pub fn operand(mut self, word: u32) -> Self {
        self.operands.push(word);
        self
    }

    pub fn operands(mut self, words: impl IntoIterator<Item = u32>) -> Self {
        self.operands.extend(words);
        self
    }

    /// Appends a string operand, UTF-8 bytes packed little-endian into
    /// words and nul-padded to a word boundary (SPIR-V literal string
    /// encoding).
    pub fn string(mut self, text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut chunks = bytes.chunks(4);
        loop {
            let chunk = chunks.next();
            match chunk {
                Some(c) if c.len() == 4 => {
                    self.operands.push(u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
                }
                Some(c) => {
                    let mut buf = [0u8; 4];
                    buf[..c.len()].copy_from_slice(c);
                    self.operands.push(u32::from_le_bytes(buf));
                    return self;
                }
                None => {
                    if bytes.len() % 4 == 0 {
                        self.operands.push(0);
                    }
                    return self;
                }
            }
        }
    }

    fn write_into(&self, out: &mut Vec<u32>) {
        let word_count = (self.operands.len() + 1) as u32;
        out.push((word_count << 16) | self.opcode as u32);
        out.extend_from_slice(&self.operands);
    }
}

#[derive(Default)]
pub struct Section {
    instructions: Vec<Instruction>,
}

impl Section {
    pub fn push(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    fn write_into(&self, out: &mut Vec<u32>) {
        for instr in &self.instructions {
            instr.write_into(out);
        }
    }
}

/// The full set of sections in emission order (spec §4.10/§6.3).
pub struct SpirvModule {
    pub version_word: u32,
    pub bound: u32,
    pub capabilities: Section,
    pub extensions: Section,
    pub ext_inst_imports: Section,
    pub memory_model: Section,
    pub entry_points: Section,
    pub execution_modes: Section,
    pub debug_info: Section,
    pub annotations: Section,
    pub constants_and_globals: Section,
    pub functions: Section,
}

impl SpirvModule {
    pub fn new(version_word: u32) -> Self {
        Self {
            version_word,
            bound: 1,
            capabilities: Section::default(),
            extensions: Section::default(),
            ext_inst_imports: Section::default(),
            memory_model: Section::default(),
            entry_points: Section::default(),
            execution_modes: Section::default(),
            debug_info: Section::default(),
            annotations: Section::default(),
            constants_and_globals: Section::default(),
            functions: Section::default(),
        }
    }

    pub fn into_words(self) -> Vec<u32> {
        let mut out = Vec::new();
        out.push(super::MAGIC);
        out.push(self.version_word);
        out.push(super::GENERATOR_MAGIC);
        out.push(self.bound);
        out.push(0); // reserved schema word

        self.capabilities.write_into(&mut out);
        self.extensions.write_into(&mut out);
        self.ext_inst_imports.write_into(&mut out);
        self.memory_model.write_into(&mut out);
        self.entry_points.write_into(&mut out);
        self.execution_modes.write_into(&mut out);
        self.debug_info.write_into(&mut out);
        self.annotations.write_into(&mut out);
        self.constants_and_globals.write_into(&mut out);
        self.functions.write_into(&mut out);
        out
    }
}

pub mod op {
    pub const CAPABILITY: u16 = 17;
    pub const EXT_INST_IMPORT: u16 = 11;
    pub const EXT_INST: u16 = 12;
    pub const MEMORY_MODEL: u16 = 14;
    pub const ENTRY_POINT: u16 = 15;
    pub const EXECUTION_MODE: u16 = 16;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_MATRIX: u16 = 24;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const TYPE_FUNCTION: u16 = 33;
    pub const CONSTANT_TRUE: u16 = 41;
    pub const CONSTANT_FALSE: u16 = 42;
    pub const CONSTANT: u16 = 43;
    pub const CONSTANT_COMPOSITE: u16 = 44;
    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_PARAMETER: u16 = 55;
    pub const FUNCTION_END: u16 = 56;
    pub const FUNCTION_CALL: u16 = 57;
    pub const VARIABLE: u16 = 59;
    pub const LOAD: u16 = 61;
    pub const STORE: u16 = 62;
    pub const ACCESS_CHAIN: u16 = 65;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const COMPOSITE_CONSTRUCT: u16 = 80;
    pub const COMPOSITE_EXTRACT: u16 = 81;
    pub const VECTOR_SHUFFLE: u16 = 79;
    pub const CONVERT_F_TO_U: u16 = 109;
    pub const CONVERT_F_TO_S: u16 = 110;
    pub const CONVERT_S_TO_F: u16 = 111;
    pub const CONVERT_U_TO_F: u16 = 112;
    pub const BITCAST: u16 = 124;
    pub const F_NEGATE: u16 = 127;
    pub const S_NEGATE: u16 = 126;
    pub const I_ADD: u16 = 128;
    pub const F_ADD: u16 = 129;
    pub const I_SUB: u16 = 130;
    pub const F_SUB: u16 = 131;
    pub const I_MUL: u16 = 132;
    pub const F_MUL: u16 = 133;
    pub const U_DIV: u16 = 134;
    pub const S_DIV: u16 = 135;
    pub const F_DIV: u16 = 136;
    pub const U_MOD: u16 = 137;
    pub const S_MOD: u16 = 139;
    pub const F_MOD: u16 = 140;
    pub const VECTOR_TIMES_SCALAR: u16 = 142;
    pub const MATRIX_TIMES_SCALAR: u16 = 143;
    pub const VECTOR_TIMES_MATRIX: u16 = 144;
    pub const MATRIX_TIMES_VECTOR: u16 = 145;
    pub const MATRIX_TIMES_MATRIX: u16 = 146;
    pub const LOGICAL_AND: u16 = 167;
    pub const LOGICAL_OR: u16 = 166;
    pub const LOGICAL_NOT: u16 = 168;
    pub const LOGICAL_EQUAL: u16 = 164;
    pub const LOGICAL_NOT_EQUAL: u16 = 165;
    pub const I_EQUAL: u16 = 170;
    pub const I_NOT_EQUAL: u16 = 171;
    pub const U_GREATER_THAN: u16 = 172;
    pub const S_GREATER_THAN: u16 = 173;
    pub const U_GREATER_THAN_EQUAL: u16 = 174;
    pub const S_GREATER_THAN_EQUAL: u16 = 175;
    pub const U_LESS_THAN: u16 = 176;
    pub const S_LESS_THAN: u16 = 177;
    pub const U_LESS_THAN_EQUAL: u16 = 178;
    pub const S_LESS_THAN_EQUAL: u16 = 179;
    pub const F_ORD_EQUAL: u16 = 180;
    pub const F_ORD_NOT_EQUAL: u16 = 182;
    pub const F_ORD_LESS_THAN: u16 = 184;
    pub const F_ORD_GREATER_THAN: u16 = 186;
    pub const F_ORD_LESS_THAN_EQUAL: u16 = 188;
    pub const F_ORD_GREATER_THAN_EQUAL: u16 = 190;
    pub const BITWISE_OR: u16 = 197;
    pub const BITWISE_XOR: u16 = 198;
    pub const BITWISE_AND: u16 = 199;
    pub const NOT: u16 = 200;
    pub const SHIFT_RIGHT_LOGICAL: u16 = 194;
    pub const SHIFT_RIGHT_ARITHMETIC: u16 = 195;
    pub const SHIFT_LEFT_LOGICAL: u16 = 196;
    pub const SELECT: u16 = 169;
    pub const LOOP_MERGE: u16 = 246;
    pub const SELECTION_MERGE: u16 = 247;
    pub const LABEL: u16 = 248;
    pub const BRANCH: u16 = 249;
    pub const BRANCH_CONDITIONAL: u16 = 250;
    pub const RETURN: u16 = 253;
    pub const RETURN_VALUE: u16 = 254;
    pub const KILL: u16 = 252;
    pub const ARRAY_LENGTH: u16 = 68;
    pub const NAME: u16 = 5;
    pub const MEMBER_NAME: u16 = 6;
    pub const SOURCE: u16 = 3;
    pub const STRING: u16 = 7;
    pub const LINE: u16 = 8;
    pub const DOT: u16 = 148;
}

/// `Decoration` operand values used to annotate block-layout struct types
/// and external variables (spec §4.10.2 "types known to need annotation").
pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const COL_MAJOR: u32 = 5;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BUILT_IN: u32 = 11;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}
