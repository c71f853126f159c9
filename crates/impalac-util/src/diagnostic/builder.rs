//! Fluent construction of diagnostics.

use super::{Diagnostic, DiagnosticCode, Handler, Level};
use crate::span::Span;

/// Builder for a [`Diagnostic`].
///
/// # Examples
///
/// ```
/// use impalac_util::diagnostic::{DiagnosticBuilder, DiagnosticCode, Level};
/// use impalac_util::span::Span;
///
/// let diag = DiagnosticBuilder::error("type mismatch: expected `i32`, found `bool`")
///     .code(DiagnosticCode::E_SEMA_TYPE_MISMATCH)
///     .span(Span::new(4, 8, 1, 5))
///     .build();
/// assert_eq!(diag.level, Level::Error);
/// ```
pub struct DiagnosticBuilder {
    level: Level,
    message: String,
    span: Span,
    code: Option<DiagnosticCode>,
    notes: Vec<String>,
    helps: Vec<String>,
}

impl DiagnosticBuilder {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            span: Span::DUMMY,
            code: None,
            notes: Vec::new(),
            helps: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    pub fn code(mut self, code: DiagnosticCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.helps.push(help.into());
        self
    }

    /// Finish without reporting; useful for tests and relaying.
    pub fn build(self) -> Diagnostic {
        Diagnostic {
            level: self.level,
            message: self.message,
            span: self.span,
            code: self.code,
            notes: self.notes,
            helps: self.helps,
        }
    }

    /// Finish and record in `handler`.
    pub fn emit(self, handler: &Handler) {
        handler.emit_diagnostic(self.build());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_all_parts() {
        let span = Span::new(1, 2, 3, 4);
        let diag = DiagnosticBuilder::warning("w")
            .code(DiagnosticCode::E_SEMA_ARITY_MISMATCH)
            .span(span)
            .note("n1")
            .note("n2")
            .help("h")
            .build();

        assert_eq!(diag.level, Level::Warning);
        assert_eq!(diag.span, span);
        assert_eq!(diag.code, Some(DiagnosticCode::E_SEMA_ARITY_MISMATCH));
        assert_eq!(diag.notes, vec!["n1", "n2"]);
        assert_eq!(diag.helps, vec!["h"]);
    }

    #[test]
    fn emit_records_into_handler() {
        let handler = Handler::new();
        DiagnosticBuilder::error("e").emit(&handler);
        assert_eq!(handler.error_count(), 1);
        assert_eq!(handler.diagnostics()[0].message, "e");
    }

    #[test]
    fn default_span_is_dummy() {
        let diag = DiagnosticBuilder::error("e").build();
        assert_eq!(diag.span, Span::DUMMY);
        assert_eq!(diag.code, None);
    }
}
