//! Diagnostic reporting shared by every pipeline stage
//!
//! Stages report user-facing problems into a [`DiagnosticSink`]; the driver
//! checks [`DiagnosticSink::error_count`] after each stage and stops the
//! pipeline once it is nonzero.

use std::fmt;
use std::sync::Arc;

/// A humane source location: path, 1-based line and column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLoc {
    /// Source path as recorded by the front end
    pub path: Arc<str>,
    /// 1-based line number; 0 means "unknown"
    pub line: u32,
    /// 1-based column number
    pub column: u32,
}

impl SourceLoc {
    /// Create a location
    pub fn new(path: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }

    /// Locations with line 0 carry no usable position
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.path, self.line)
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Fails the compilation
    Error,
    /// Reported but does not fail the compilation
    Warning,
    /// Additional context for a previous diagnostic
    Note,
}

impl Severity {
    /// Lowercase label used in rendered diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// How serious the problem is
    pub severity: Severity,
    /// Where the problem originates, when known
    pub location: Option<SourceLoc>,
    /// Human readable message
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic
    pub fn new(severity: Severity, location: Option<SourceLoc>, message: impl Into<String>) -> Self {
        Self {
            severity,
            location,
            message: message.into(),
        }
    }

    /// True for error-severity diagnostics
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}: {}", loc, self.severity.as_str(), self.message),
            None => write!(f, "{}: {}", self.severity.as_str(), self.message),
        }
    }
}

/// Accumulating diagnostic sink threaded through all stages
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic
    pub fn report(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(%diagnostic, "diagnostic reported");
        self.diagnostics.push(diagnostic);
    }

    /// Record an error
    pub fn error(&mut self, location: Option<&SourceLoc>, message: impl Into<String>) {
        self.report(Diagnostic::new(Severity::Error, location.cloned(), message));
    }

    /// Record a warning
    pub fn warning(&mut self, location: Option<&SourceLoc>, message: impl Into<String>) {
        self.report(Diagnostic::new(Severity::Warning, location.cloned(), message));
    }

    /// Number of error-severity diagnostics reported so far
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// True once any error has been reported
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Everything reported so far, in order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Consume the sink
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
