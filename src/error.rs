//! Error types for relq.

use thiserror::Error;

/// Boxed error type reported by command executors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for relq operations.
#[derive(Debug, Error)]
pub enum RelqError {
    /// A row-dependent construct that no translator can convert.
    #[error("Could not translate {construct}: {reason}")]
    Untranslatable { construct: String, reason: String },

    /// The SQL tree contains a node the dialect cannot render.
    #[error("Dialect '{dialect}' cannot render {construct}")]
    DialectGap {
        dialect: String,
        construct: String,
    },

    /// Metadata lookup failed (unknown entity, property or navigation).
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A compiled pipeline or SQL tree violates an internal invariant.
    #[error("Internal compilation error: {0}")]
    Internal(String),

    /// A parameter value is missing or has the wrong type.
    #[error("Parameter binding error: {0}")]
    Binding(String),

    /// Client-side evaluation of an expression failed.
    #[error("Client evaluation error: {0}")]
    ClientEvaluation(String),

    /// The command executor failed. The source error is carried unmodified.
    #[error("Execution error: {0}")]
    Execution(#[source] BoxError),

    /// A result row does not match the compiled shaper.
    #[error("Result shape mismatch: expected {expected} columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// A single-result operator found no rows.
    #[error("Sequence contains no elements")]
    EmptySequence,

    /// Failed to parse a textual query.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelqError {
    /// Create an untranslatable-construct error.
    pub fn untranslatable(construct: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Untranslatable {
            construct: construct.into(),
            reason: reason.into(),
        }
    }

    /// Create a dialect capability gap error.
    pub fn dialect_gap(dialect: impl Into<String>, construct: impl Into<String>) -> Self {
        Self::DialectGap {
            dialect: dialect.into(),
            construct: construct.into(),
        }
    }

    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Wrap an executor failure without altering it.
    pub fn execution(err: impl Into<BoxError>) -> Self {
        Self::Execution(err.into())
    }

    /// True for failures raised before any command is sent to the backend.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::Untranslatable { .. }
                | Self::DialectGap { .. }
                | Self::Metadata(_)
                | Self::Internal(_)
                | Self::Parse { .. }
        )
    }
}

/// Result type alias for relq operations.
pub type RelqResult<T> = Result<T, RelqError>;

/// Codes for non-fatal compilation diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// `Equals` across provably different static types, folded to false.
    IncompatibleEquals,
    /// A sub-expression is evaluated in process instead of on the server.
    ClientEvaluation,
    /// A collection include is loaded with a separate command.
    SplitInclude,
}

/// A non-fatal message produced during compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelqError::parse(5, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Parse error at position 5: unexpected character"
        );
    }

    #[test]
    fn test_compile_errors_are_distinguishable() {
        assert!(RelqError::untranslatable("p.Name.Foo()", "no translator").is_compile_error());
        assert!(RelqError::dialect_gap("sqlite", "function 'len'").is_compile_error());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let exec = RelqError::execution(io);
        assert!(!exec.is_compile_error());
        let source = std::error::Error::source(&exec).expect("source kept");
        assert_eq!(source.to_string(), "connection reset");
    }
}
