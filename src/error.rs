//! Error types for the shadegen back end

use crate::diagnostics::Diagnostic;
use thiserror::Error;

/// Back-end errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// An internal invariant of the IR was violated
    ///
    /// **Triggered by:** an opcode or type that an earlier pass should have
    /// eliminated, a terminator the region walk cannot lower, or a dangling
    /// block/field reference.
    /// **Meaning:** a defect in an earlier pass or in the IR handed to us, not a
    /// problem in the user's shader.
    #[error("Internal error: {0}")]
    InvariantFault(String),

    /// A pipeline stage finished with a nonzero diagnostic error count
    ///
    /// **Triggered by:** user-facing problems such as an aggregate that cannot
    /// be legalized for the target, a type with no spelling in the chosen
    /// dialect, or a missing shader-stage attribute.
    /// **Effect:** no later stage is run for the request.
    #[error("{stage} failed with {} error(s)", count_errors(.diagnostics))]
    CompilationFailed {
        /// Pipeline stage that reported the errors
        stage: &'static str,
        /// Everything the sink collected up to that point
        diagnostics: Vec<Diagnostic>,
    },

    /// Compile options could not be read
    ///
    /// **Triggered by:** malformed JSON handed to `CompileOptions::from_json`
    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

/// Error class, mirroring the two classes the pipeline distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Defect inside the compiler
    Internal,
    /// Problem in the user's input or request
    User,
}

impl Error {
    /// Create an invariant fault with a message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantFault(msg.into())
    }

    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Classify the error
    pub fn classify(&self) -> ErrorClass {
        match self {
            Error::InvariantFault(_) => ErrorClass::Internal,
            Error::CompilationFailed { .. } | Error::Config(_) => ErrorClass::User,
        }
    }

    /// True for faults that indicate a compiler defect
    pub fn is_internal(&self) -> bool {
        self.classify() == ErrorClass::Internal
    }

    /// Diagnostics attached to a failed compilation, if any
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::CompilationFailed { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for shadegen operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Diagnostic, Severity};

    #[test]
    fn test_error_classification() {
        assert!(Error::invariant("bad terminator").is_internal());
        assert!(!Error::config("bad json").is_internal());
    }

    #[test]
    fn test_compilation_failed_message_counts_errors() {
        let err = Error::CompilationFailed {
            stage: "type legalization",
            diagnostics: vec![
                Diagnostic::new(Severity::Error, None, "first"),
                Diagnostic::new(Severity::Warning, None, "second"),
                Diagnostic::new(Severity::Error, None, "third"),
            ],
        };
        assert_eq!(err.to_string(), "type legalization failed with 2 error(s)");
        assert_eq!(err.diagnostics().len(), 3);
    }
}
