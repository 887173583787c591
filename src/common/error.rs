//! Diagnostics accumulated while lowering an AST to IR.
//!
//! `Diagnostic`/`DiagnosticEngine` accumulate rather than fail fast; the
//! message payload is a `thiserror`-derived [`LoweringError`] instead of a
//! bare `String` so call sites can match on a specific failure kind.

use std::fmt;

use crate::common::source::{Span, SourceManager};
use thiserror::Error;

/// Errors raised while lowering an already-analyzed AST into SSA IR.
///
/// `spec.md` §7 scopes these to malformed input that a real front end would
/// normally have rejected already (out-of-range array index constants,
/// reference to an undeclared symbol slipping through, arity mismatch on a
/// call) — cases worth a typed error rather than a panic because a caller
/// embedding this crate may want to recover and report them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoweringError {
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),

    #[error("call to `{callee}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("array index {index} out of bounds for dimension {bound}")]
    ConstIndexOutOfBounds { index: i64, bound: u32 },

    #[error("`break`/`continue` used outside of a loop")]
    LoopControlOutsideLoop,

    #[error("function `{0}` is missing a terminating return")]
    MissingReturn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: LoweringError,
    pub span: Span,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(error: LoweringError, span: Span) -> Self {
        Self { severity: Severity::Error, error, span, notes: Vec::new() }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Accumulates diagnostics during lowering, collect-then-print rather than
/// failing on the first error.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            self.error_count += 1;
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn print_all(&self, sources: &SourceManager) {
        for d in &self.diagnostics {
            let loc = sources.resolve_span(d.span);
            eprintln!("{}:{}:{}: {}: {}", loc.file, loc.line, loc.column, d.severity, d.error);
            for note in &d.notes {
                eprintln!("  note: {note}");
            }
        }
    }
}
