//! Diagnostic reporting for the Shadow compiler.
//!
//! Parse and type-check problems are accumulated in an [`ErrorReporter`]
//! during a phase and surfaced collectively at the end of it, in source
//! order, with rustc-style colored output on stderr. Warnings never abort
//! the compilation; a single accumulated error does, once
//! [`ErrorReporter::print_and_report_errors`] runs.
//!
//! The terminal [`CompilerError`] taxonomy maps one-to-one onto the process
//! exit codes the compiler documents.

use shadow_ast::Span;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exit codes returned by the compiler process.
pub const NO_ERROR: i32 = 0;
pub const FILE_NOT_FOUND_ERROR: i32 = -1;
pub const PARSE_ERROR: i32 = -2;
pub const TYPE_CHECK_ERROR: i32 = -3;
pub const COMPILE_ERROR: i32 = -4;
pub const COMMAND_LINE_ERROR: i32 = -5;
pub const CONFIGURATION_ERROR: i32 = -6;

/// Terminal failures, each tied to a documented exit code.
#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    #[error("FILE NOT FOUND: {0}")]
    FileNotFound(String),
    #[error("FAILED TO PARSE: {0}")]
    Parse(String),
    #[error("FAILED TO TYPE CHECK")]
    TypeCheck,
    #[error("FAILED TO COMPILE: {0}")]
    Compile(String),
    #[error("COMMAND LINE ERROR: {0}")]
    CommandLine(String),
    #[error("CONFIGURATION ERROR: {0}")]
    Configuration(String),
}

impl CompilerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CompilerError::FileNotFound(_) => FILE_NOT_FOUND_ERROR,
            CompilerError::Parse(_) => PARSE_ERROR,
            CompilerError::TypeCheck => TYPE_CHECK_ERROR,
            CompilerError::Compile(_) => COMPILE_ERROR,
            CompilerError::CommandLine(_) => COMMAND_LINE_ERROR,
            CompilerError::Configuration(_) => CONFIGURATION_ERROR,
        }
    }
}

/// Severity of an accumulated diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// The closed set of accumulated problem kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnresolvedName,
    NotASubtype,
    AmbiguousOverload,
    DuplicateDeclaration,
    IllegalCast,
    BadGenericArity,
    FieldNotInitialized,
    NoMatchingMethod,
    IllegalAssignment,
    MissingReturn,
    DeadCode,
    UnusedField,
    UnusedMethod,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::UnresolvedName => "UNRESOLVED_NAME",
            ErrorKind::NotASubtype => "NOT_A_SUBTYPE",
            ErrorKind::AmbiguousOverload => "AMBIGUOUS_OVERLOAD",
            ErrorKind::DuplicateDeclaration => "DUPLICATE_DECLARATION",
            ErrorKind::IllegalCast => "ILLEGAL_CAST",
            ErrorKind::BadGenericArity => "BAD_GENERIC_ARITY",
            ErrorKind::FieldNotInitialized => "FIELD_NOT_INITIALIZED",
            ErrorKind::NoMatchingMethod => "NO_MATCHING_METHOD",
            ErrorKind::IllegalAssignment => "ILLEGAL_ASSIGNMENT",
            ErrorKind::MissingReturn => "MISSING_RETURN",
            ErrorKind::DeadCode => "DEAD_CODE",
            ErrorKind::UnusedField => "UNUSED_FIELD",
            ErrorKind::UnusedMethod => "UNUSED_METHOD",
        }
    }
}

/// One accumulated diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub span: Option<Span>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{} [{}]: {}", word, self.kind.label(), self.message)
    }
}

/// Accumulates diagnostics for one compilation and reports them at the end
/// of a phase.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        ErrorReporter::default()
    }

    pub fn add_error(&mut self, kind: ErrorKind, message: impl Into<String>, span: Option<Span>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message: message.into(),
            file: None,
            span,
        });
    }

    pub fn add_warning(&mut self, kind: ErrorKind, message: impl Into<String>, span: Option<Span>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            file: None,
            span,
        });
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.len() - self.error_count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }

    /// Prints all accumulated diagnostics in source order and, if any of
    /// them is an error, returns a terminal type-check failure. Warnings
    /// alone never fail the phase. The reporter is left empty either way.
    pub fn print_and_report_errors(&mut self) -> Result<(), CompilerError> {
        self.diagnostics
            .sort_by_key(|d| d.span.as_ref().map(|s| s.start).unwrap_or(usize::MAX));

        let had_errors = self.error_count() > 0;
        for diagnostic in self.diagnostics.drain(..) {
            emit(&diagnostic);
        }

        if had_errors {
            Err(CompilerError::TypeCheck)
        } else {
            Ok(())
        }
    }
}

/// Prints a compact, rustc-style diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic) {
    if !DIAGNOSTICS_ENABLED.load(Ordering::SeqCst) {
        return;
    }

    let (color, word) = match diagnostic.severity {
        Severity::Error => ("\x1b[31m", "error"),
        Severity::Warning => ("\x1b[33m", "warning"),
    };
    let reset = "\x1b[0m";

    eprintln!(
        "{}{}{} [{}]: {}",
        color,
        word,
        reset,
        diagnostic.kind.label(),
        diagnostic.message
    );
    if let Some(file) = &diagnostic.file {
        match &diagnostic.span {
            Some(span) => eprintln!("  --> {}:{}", file, span.start),
            None => eprintln!("  --> {}", file),
        }
    }
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Temporarily silences diagnostic printing; used by tests to keep stderr
/// clean while still exercising the reporting paths. The guard restores the
/// previous state on drop.
pub fn suppress() -> SuppressGuard {
    let prev = DIAGNOSTICS_ENABLED.swap(false, Ordering::SeqCst);
    SuppressGuard { prev }
}

pub struct SuppressGuard {
    prev: bool,
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        DIAGNOSTICS_ENABLED.store(self.prev, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_fail_the_phase() {
        let _guard = suppress();
        let mut reporter = ErrorReporter::new();
        reporter.add_warning(ErrorKind::DeadCode, "unreachable code", Some(10..20));
        assert!(reporter.print_and_report_errors().is_ok());
    }

    #[test]
    fn errors_fail_the_phase_in_source_order() {
        let _guard = suppress();
        let mut reporter = ErrorReporter::new();
        reporter.add_error(ErrorKind::NotASubtype, "later", Some(50..60));
        reporter.add_error(ErrorKind::UnresolvedName, "earlier", Some(5..9));
        assert_eq!(reporter.error_count(), 2);
        let result = reporter.print_and_report_errors();
        assert!(matches!(result, Err(CompilerError::TypeCheck)));
    }

    #[test]
    fn exit_codes_match_documentation() {
        assert_eq!(CompilerError::FileNotFound(String::new()).exit_code(), -1);
        assert_eq!(CompilerError::Parse(String::new()).exit_code(), -2);
        assert_eq!(CompilerError::TypeCheck.exit_code(), -3);
        assert_eq!(CompilerError::Compile(String::new()).exit_code(), -4);
        assert_eq!(CompilerError::CommandLine(String::new()).exit_code(), -5);
        assert_eq!(CompilerError::Configuration(String::new()).exit_code(), -6);
    }
}
