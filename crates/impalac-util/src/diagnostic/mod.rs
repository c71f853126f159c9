//! Diagnostic reporting.
//!
//! Semantic analysis never aborts on a recoverable error: every problem is
//! recorded as a [`Diagnostic`] in a [`Handler`] and checking continues. The
//! caller asks the handler whether the unit is clean at the end.
//!
//! # Examples
//!
//! ```
//! use impalac_util::diagnostic::{DiagnosticBuilder, DiagnosticCode, Handler};
//! use impalac_util::span::Span;
//!
//! let handler = Handler::new();
//! DiagnosticBuilder::error("`x` is not declared in this scope")
//!     .code(DiagnosticCode::E_SEMA_UNDECLARED)
//!     .span(Span::DUMMY)
//!     .emit(&handler);
//!
//! assert!(handler.has_errors());
//! assert_eq!(handler.error_count(), 1);
//! ```

mod builder;
mod codes;

pub use builder::DiagnosticBuilder;
pub use codes::DiagnosticCode;

use std::cell::RefCell;
use std::fmt;

use crate::span::Span;

/// Severity of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// Prevents the compilation unit from proceeding to emission.
    Error,
    /// Reported but does not fail the unit.
    Warning,
    /// Attached context for another diagnostic.
    Note,
    /// A fix suggestion.
    Help,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
            Level::Help => write!(f, "help"),
        }
    }
}

/// A single reported problem: severity, rendered message, source range, and
/// an optional code from the taxonomy in [`DiagnosticCode`].
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub span: Span,
    pub code: Option<DiagnosticCode>,
    pub notes: Vec<String>,
    pub helps: Vec<String>,
}

impl Diagnostic {
    pub fn new(level: Level, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            message: message.into(),
            span,
            code: None,
            notes: Vec::new(),
            helps: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Warning, message, span)
    }

    pub fn with_code(mut self, code: DiagnosticCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.helps.push(help.into());
        self
    }
}

/// Accumulator of diagnostics for one compilation unit.
///
/// Interior-mutable so that checking code can report through a shared
/// reference; the analyzer is single-threaded (`RefCell`, not a lock).
#[derive(Default)]
pub struct Handler {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_diagnostic(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    /// True if any error-level diagnostic has been recorded.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.level == Level::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == Level::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == Level::Warning)
            .count()
    }

    /// Snapshot of every recorded diagnostic, in emission order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn clear(&self) {
        self.diagnostics.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_display() {
        assert_eq!(Level::Error.to_string(), "error");
        assert_eq!(Level::Warning.to_string(), "warning");
        assert_eq!(Level::Note.to_string(), "note");
        assert_eq!(Level::Help.to_string(), "help");
    }

    #[test]
    fn diagnostic_construction() {
        let diag = Diagnostic::error("boom", Span::DUMMY)
            .with_code(DiagnosticCode::E_SEMA_TYPE_MISMATCH)
            .with_note("expected `i32`")
            .with_help("annotate the binding");
        assert_eq!(diag.level, Level::Error);
        assert_eq!(diag.message, "boom");
        assert_eq!(diag.code, Some(DiagnosticCode::E_SEMA_TYPE_MISMATCH));
        assert_eq!(diag.notes, vec!["expected `i32`"]);
        assert_eq!(diag.helps, vec!["annotate the binding"]);
    }

    #[test]
    fn handler_counts() {
        let handler = Handler::new();
        assert!(!handler.has_errors());

        handler.emit_diagnostic(Diagnostic::error("e1", Span::DUMMY));
        handler.emit_diagnostic(Diagnostic::warning("w1", Span::DUMMY));
        handler.emit_diagnostic(Diagnostic::error("e2", Span::DUMMY));

        assert!(handler.has_errors());
        assert_eq!(handler.error_count(), 2);
        assert_eq!(handler.warning_count(), 1);
        assert_eq!(handler.diagnostics().len(), 3);
    }

    #[test]
    fn handler_preserves_emission_order() {
        let handler = Handler::new();
        handler.emit_diagnostic(Diagnostic::error("first", Span::DUMMY));
        handler.emit_diagnostic(Diagnostic::error("second", Span::DUMMY));
        let messages: Vec<_> = handler.diagnostics().iter().map(|d| d.message.clone()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn handler_clear() {
        let handler = Handler::new();
        handler.emit_diagnostic(Diagnostic::error("e", Span::DUMMY));
        handler.clear();
        assert!(!handler.has_errors());
        assert_eq!(handler.diagnostics().len(), 0);
    }

    #[test]
    fn warnings_do_not_fail_the_unit() {
        let handler = Handler::new();
        handler.emit_diagnostic(Diagnostic::warning("w", Span::DUMMY));
        assert!(!handler.has_errors());
    }
}
