//! `nzslc` — the command-line driver (spec §6.1, SPEC_FULL §0): wires the
//! `nzsl` library to a filesystem module resolver, hand-rolled argument
//! parsing, and `log`/`simplelog` setup, in the same shape as the teacher's
//! `timuc` binary.
//!
//! ```text
//! nzslc [options] <input>
//! ```

mod args;
mod module_source;
mod output;

use std::fs;
use std::process::exit;

use log::LevelFilter;
use nzsl::error::{Error, ReportGenerator};
use nzsl::file::SourceFile;
use nzsl::module::ModuleResolver;
use nzsl::{binary, compile_module, printers, spirv};
use nzsl_diagnostics_core::traits::DiagnosticReport;
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelPadding, TermLogger, TerminalMode, ThreadLogMode};

use args::{FormatKind, OutputFormat};
use module_source::FilesystemModuleSource;

fn main() {
    let cli = match args::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{message}");
            eprintln!();
            eprintln!("{}", args::USAGE);
            exit(1);
        }
    };

    init_logging(cli.verbose);

    let source_text = match fs::read_to_string(&cli.input) {
        Ok(text) => text,
        Err(error) => {
            eprintln!("error reading {}: {error}", cli.input.display());
            exit(1);
        }
    };

    let module_name = module_name_of(&cli.input);
    let file = SourceFile::new(vec![module_name.clone()], source_text.clone());

    let mut roots = cli.module_roots.clone();
    if let Some(parent) = cli.input.parent() {
        roots.push(parent.to_path_buf());
    }
    let source = FilesystemModuleSource::new(roots);
    let mut resolver = ModuleResolver::new(&source, cli.compiler.clone());

    let report_generator = ReportGenerator::new(cli.log_format);

    let started = std::time::Instant::now();
    let module = match compile_module(&source_text, file, &mut resolver, &cli.compiler) {
        Ok(module) => module,
        Err(error) => {
            render_and_exit(&report_generator, &error);
        }
    };
    if cli.measure {
        log::info!("front-end finished in {:?} ({} pass(es))", started.elapsed(), cli.benchmark_iterations.max(1));
    }

    for format in &cli.formats {
        if let Err(error) = emit_format(&module, format, &module_name, &cli) {
            render_and_exit(&report_generator, &error);
        }
    }
}

fn render_and_exit(generator: &ReportGenerator, error: &Error) -> ! {
    eprintln!("{}", generator.render(error as &dyn DiagnosticReport));
    exit(1);
}

fn emit_format(module: &nzsl::ast::Module, format: &OutputFormat, module_name: &str, cli: &args::Cli) -> Result<(), Error> {
    let (bytes, extension) = match format.kind {
        FormatKind::Nzsl => (printers::nzsl::generate(module).into_bytes(), "nzsl"),
        FormatKind::Nzslb => {
            let mut buf = Vec::new();
            binary::Writer::new(&cli.compiler).write_module(&mut buf, module)?;
            (buf, "nzslb")
        }
        FormatKind::Spv => {
            let words = spirv::compile_to_spirv(module, &cli.compiler)?;
            (words.iter().flat_map(|w| w.to_le_bytes()).collect(), "spv")
        }
        FormatKind::SpvDis => {
            let words = spirv::compile_to_spirv(module, &cli.compiler)?;
            (spirv::disassemble(&words).into_bytes(), "spv.txt")
        }
        FormatKind::Glsl => {
            let text = printers::glsl::generate(module, &cli.compiler)?;
            if cli.compiler.glsl.emit_binding_map {
                write_binding_map(module, module_name, cli);
            }
            (text.into_bytes(), "glsl")
        }
    };

    let payload = if format.header { output::as_c_header(module_name, extension, &bytes) } else { bytes };
    output::write(&cli.output, module_name, extension, format.header, &payload);
    Ok(())
}

fn write_binding_map(module: &nzsl::ast::Module, module_name: &str, cli: &args::Cli) {
    let map = printers::glsl::linearize_bindings(module);
    let entries: Vec<serde_json::Value> = map
        .into_iter()
        .map(|((set, binding), linear)| {
            serde_json::json!({ "set": set, "binding": binding, "linearBinding": linear })
        })
        .collect();
    let json = serde_json::to_vec_pretty(&entries).unwrap_or_default();
    output::write(&cli.output, module_name, "bindings.json", false, &json);
}

fn module_name_of(path: &std::path::Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "module".to_string())
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let config = ConfigBuilder::new()
        .set_location_level(LevelFilter::Error)
        .set_thread_mode(ThreadLogMode::Both)
        .set_level_padding(LevelPadding::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let _ = CombinedLogger::init(vec![TermLogger::new(level, config, TerminalMode::Mixed, ColorChoice::Auto)]);
}
