//! Top-level error aggregation (spec §7) and diagnostic rendering (SPEC_FULL
//! §1.2): every compiler stage returns its own error family; [`Error`]
//! unifies them behind one type so the CLI has a single thing to render.

use nzsl_diagnostics_core::traits::DiagnosticReport;
use nzsl_diagnostics_macros::Diagnostic;

use crate::binary::BinaryError;
use crate::constfold::ConstError;
use crate::lexer::LexError;
use crate::module::ModuleError;
use crate::parser::error::ParseError;
use crate::printers::glsl::GlslError;
use crate::printers::wgsl::WgslError;
use crate::resolve::error::ResolveError;
use crate::spirv::BackendError;
use crate::validate::ValidationError;

#[derive(Debug, Clone, Diagnostic, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Const(ConstError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Backend(BackendError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Binary(BinaryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Module(ModuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Glsl(GlslError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Wgsl(WgslError),

    #[error("i/o error: {0}")]
    #[diagnostic(code = "io")]
    Io(String),
}

impl From<LexError> for Error {
    fn from(e: LexError) -> Self {
        Error::Lex(e)
    }
}
impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}
impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        Error::Resolve(e)
    }
}
impl From<ConstError> for Error {
    fn from(e: ConstError) -> Self {
        Error::Const(e)
    }
}
impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}
impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        Error::Backend(e)
    }
}
impl From<BinaryError> for Error {
    fn from(e: BinaryError) -> Self {
        Error::Binary(e)
    }
}
impl From<GlslError> for Error {
    fn from(e: GlslError) -> Self {
        Error::Glsl(e)
    }
}
impl From<WgslError> for Error {
    fn from(e: WgslError) -> Self {
        Error::Wgsl(e)
    }
}
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// The on-screen diagnostic format selected by `nzslc --log-format`
/// (SPEC_FULL §1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Classic,
    Vs,
}

/// Renders one [`DiagnosticReport`] in either the `codespan_reporting`
/// "classic" snippet style or the Visual-Studio one-liner style, matching
/// the teacher's `CodeSpanReportGenerator`.
pub struct ReportGenerator {
    pub format: LogFormat,
}

impl ReportGenerator {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    pub fn render(&self, report: &dyn DiagnosticReport) -> String {
        match self.format {
            LogFormat::Classic => self.render_classic(report),
            LogFormat::Vs => self.render_vs(report),
        }
    }

    fn render_classic(&self, report: &dyn DiagnosticReport) -> String {
        use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label};
        use codespan_reporting::files::SimpleFiles;
        use codespan_reporting::term::{self, Config};
        use codespan_reporting::term::termcolor::{Buffer, ColorChoice};

        let mut files = SimpleFiles::new();
        let mut diagnostic = CsDiagnostic::error();

        if let Some(code) = report.error_code() {
            diagnostic = diagnostic.with_code(code.to_string());
        }
        diagnostic = diagnostic.with_message(report.to_string());

        if let Some(source) = report.source_code() {
            let file_id = files.add(source.name.clone(), source.source.clone());
            if let Some(labels) = report.labels() {
                let rendered_labels = labels
                    .into_iter()
                    .map(|l| Label::primary(file_id, l.position).with_message(l.label))
                    .collect::<Vec<_>>();
                diagnostic = diagnostic.with_labels(rendered_labels);
            }
        }

        if let Some(help) = report.help() {
            diagnostic = diagnostic.with_notes(vec![help.to_string()]);
        }

        let mut buffer = Buffer::no_color();
        let _ = term::emit(&mut buffer, &Config::default(), &files, &diagnostic);
        let _ = ColorChoice::Never;
        String::from_utf8_lossy(buffer.as_slice()).into_owned()
    }

    fn render_vs(&self, report: &dyn DiagnosticReport) -> String {
        let (name, line, column) = match (report.source_code(), report.labels().and_then(|l| l.into_iter().next())) {
            (Some(source), Some(label)) => {
                let (line, column) = line_column_at(&source.source, label.position.start);
                (source.name, line, column)
            }
            (Some(source), None) => (source.name, 1, 1),
            (None, _) => ("<unknown>".to_string(), 1, 1),
        };
        let code = report.error_code().map(|c| c.to_string()).unwrap_or_else(|| "????".to_string());
        format!("{name}({line},{column}): error {code}: {report}")
    }
}

fn line_column_at(source: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (i, ch) in source.char_indices() {
        if i >= byte_offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
