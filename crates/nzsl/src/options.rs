//! `CompilerOptions` (SPEC_FULL §1.3): the single explicit options bag
//! threaded through the whole pipeline. There is no global/static
//! configuration anywhere in this crate — every pass that needs a flag
//! receives it here or through the narrower [`crate::transform::TransformerContext`]
//! view the transformer framework carries (spec §4.5).

/// Debug info granularity for the SPIR-V backend (spec §4.10.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugLevel {
    #[default]
    None,
    Minimal,
    Regular,
    Full,
}

impl DebugLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "none" => DebugLevel::None,
            "minimal" => DebugLevel::Minimal,
            "regular" => DebugLevel::Regular,
            "full" => DebugLevel::Full,
            _ => return None,
        })
    }
}

/// GLSL-specific emitter knobs (spec §6.1, §6.4).
#[derive(Debug, Clone, Copy)]
pub struct GlslOptions {
    pub es: bool,
    pub version: u32,
    pub flip_y: bool,
    pub remap_z: bool,
    pub emit_binding_map: bool,
}

impl Default for GlslOptions {
    fn default() -> Self {
        Self { es: false, version: 330, flip_y: false, remap_z: false, emit_binding_map: false }
    }
}

/// Options threaded through the entire compile call (spec §5 "single
/// compiler instance per process"; SPEC_FULL §1.3). Never stored as a
/// global/static — every function that needs it takes `&CompilerOptions`.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// `-p`/`--partial`: tolerate unresolved identifiers (spec §4.5, §7).
    pub partial_compilation: bool,
    /// `--optimize`: run constant propagation + dead-code elimination.
    pub optimize: bool,
    pub debug_level: DebugLevel,
    pub spirv_version: (u8, u8),
    pub glsl: GlslOptions,
    /// Option-identifier → override value, keyed by the FNV-1a hash used
    /// for `option` declarations (spec GLOSSARY "Option").
    pub option_overrides: std::collections::HashMap<u64, crate::ast::ConstantValue>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            partial_compilation: false,
            optimize: false,
            debug_level: DebugLevel::default(),
            spirv_version: (1, 0),
            glsl: GlslOptions::default(),
            option_overrides: std::collections::HashMap::new(),
        }
    }
}
