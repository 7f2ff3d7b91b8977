//! Hand-rolled argument parsing for the `compile [options] <input>`
//! contract (spec §6.1). No `clap`: the option surface is small and fixed,
//! matching the teacher's own manual `std::env::args()` loop.

use std::path::PathBuf;

use nzsl::error::LogFormat;
use nzsl::options::{CompilerOptions, DebugLevel};

pub const USAGE: &str = "\
Usage: nzslc [options] <input>

Options:
  -o, --output <path>       output directory, or @stdout / @null
  -c, --compile <fmts>      comma list from nzsl,nzslb,spv,spv-dis,glsl
                            (append -header to any entry for a C header)
  -m, --module <path>       extra module search directory (repeatable)
  -d, --debug-level <lvl>   none|minimal|regular|full
  -p, --partial             tolerate unresolved identifiers
      --optimize            constant propagation + dead-code elimination
      --gl-es               emit GLSL ES instead of desktop GLSL
      --gl-version <n>      GLSL version times 100 (e.g. 330)
      --gl-flipy            inject a clip-space Y flip
      --gl-remapz           inject a clip-space Z remap
      --gl-bindingmap       side-write a JSON binding map next to the GLSL output
      --spv-version <n>     SPIR-V version times 100 (e.g. 100)
      --log-format <fmt>    classic|vs
  -v, --verbose             raise log level to debug
      --measure             log front-end timing
      --benchmark-iteration <n>  implies --measure
  -h, --help                print this message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Nzsl,
    Nzslb,
    Spv,
    SpvDis,
    Glsl,
}

#[derive(Debug, Clone, Copy)]
pub struct OutputFormat {
    pub kind: FormatKind,
    pub header: bool,
}

#[derive(Debug, Clone)]
pub enum OutputTarget {
    Directory(PathBuf),
    Stdout,
    Null,
}

#[derive(Debug, Clone)]
pub struct Cli {
    pub input: PathBuf,
    pub output: OutputTarget,
    pub formats: Vec<OutputFormat>,
    pub module_roots: Vec<PathBuf>,
    pub compiler: CompilerOptions,
    pub log_format: LogFormat,
    pub verbose: bool,
    pub measure: bool,
    pub benchmark_iterations: u32,
}

/// Parses `args` (already stripped of argv[0]) into a [`Cli`]. Returns a
/// human-readable message on the first malformed flag, missing value, or
/// missing input file, for the caller to print alongside [`USAGE`].
pub fn parse(args: impl Iterator<Item = String>) -> Result<Cli, String> {
    let mut input: Option<PathBuf> = None;
    let mut output = OutputTarget::Directory(PathBuf::from("."));
    let mut formats = Vec::new();
    let mut module_roots = Vec::new();
    let mut compiler = CompilerOptions::default();
    let mut log_format = LogFormat::Classic;
    let mut verbose = false;
    let mut measure = false;
    let mut benchmark_iterations = 0u32;

    let mut iter = args.peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(USAGE.to_string()),
            "-o" | "--output" => {
                let value = take_value(&mut iter, &arg)?;
                output = match value.as_str() {
                    "@stdout" => OutputTarget::Stdout,
                    "@null" => OutputTarget::Null,
                    path => OutputTarget::Directory(PathBuf::from(path)),
                };
            }
            "-c" | "--compile" => {
                let value = take_value(&mut iter, &arg)?;
                for token in value.split(',') {
                    formats.push(parse_format(token.trim())?);
                }
            }
            "-m" | "--module" => {
                module_roots.push(PathBuf::from(take_value(&mut iter, &arg)?));
            }
            "-d" | "--debug-level" => {
                let value = take_value(&mut iter, &arg)?;
                compiler.debug_level =
                    DebugLevel::from_str(&value).ok_or_else(|| format!("unknown debug level `{value}`"))?;
            }
            "-p" | "--partial" => compiler.partial_compilation = true,
            "--optimize" => compiler.optimize = true,
            "--gl-es" => compiler.glsl.es = true,
            "--gl-version" => {
                compiler.glsl.version = parse_u32(&take_value(&mut iter, &arg)?, &arg)?;
            }
            "--gl-flipy" => compiler.glsl.flip_y = true,
            "--gl-remapz" => compiler.glsl.remap_z = true,
            "--gl-bindingmap" => compiler.glsl.emit_binding_map = true,
            "--spv-version" => {
                let n = parse_u32(&take_value(&mut iter, &arg)?, &arg)?;
                compiler.spirv_version = ((n / 100) as u8, ((n % 100) / 10) as u8);
            }
            "--log-format" => {
                let value = take_value(&mut iter, &arg)?;
                log_format = match value.as_str() {
                    "classic" => LogFormat::Classic,
                    "vs" => LogFormat::Vs,
                    other => return Err(format!("unknown log format `{other}`")),
                };
            }
            "-v" | "--verbose" => verbose = true,
            "--measure" => measure = true,
            "--benchmark-iteration" => {
                benchmark_iterations = parse_u32(&take_value(&mut iter, &arg)?, &arg)?;
                measure = true;
            }
            positional if input.is_none() => input = Some(PathBuf::from(positional)),
            unexpected => return Err(format!("unexpected argument `{unexpected}`")),
        }
    }

    let input = input.ok_or_else(|| "no input file given".to_string())?;
    if formats.is_empty() {
        formats.push(OutputFormat { kind: FormatKind::Nzsl, header: false });
    }

    Ok(Cli { input, output, formats, module_roots, compiler, log_format, verbose, measure, benchmark_iterations })
}

fn take_value(iter: &mut std::iter::Peekable<impl Iterator<Item = String>>, flag: &str) -> Result<String, String> {
    iter.next().ok_or_else(|| format!("`{flag}` expects a value"))
}

fn parse_u32(value: &str, flag: &str) -> Result<u32, String> {
    value.parse::<u32>().map_err(|_| format!("`{flag}` expects a number, found `{value}`"))
}

fn parse_format(token: &str) -> Result<OutputFormat, String> {
    let (base, header) = match token.strip_suffix("-header") {
        Some(base) => (base, true),
        None => (token, false),
    };
    let kind = match base {
        "nzsl" => FormatKind::Nzsl,
        "nzslb" => FormatKind::Nzslb,
        "spv" => FormatKind::Spv,
        "spv-dis" => FormatKind::SpvDis,
        "glsl" => FormatKind::Glsl,
        other => return Err(format!("unknown output format `{other}`")),
    };
    Ok(OutputFormat { kind, header })
}
