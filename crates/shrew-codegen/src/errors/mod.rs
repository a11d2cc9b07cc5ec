//! Iterator lowering errors.
//!
//! Everything here is a pre-lowering configuration failure or a backend
//! failure: detected before (or while) code is generated for a combinator and
//! fatal to the enclosing compilation unit. Exhaustion and propagated runtime
//! failures are not errors at this level; they travel as status words through
//! the compiled code.
//!
//! Error code range: E3xxx.

use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

/// The kind of lowering error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// The iterator kind has no such entry point or feature
    UnsupportedFeature {
        feature: &'static str,
        context: Option<String>,
    },

    /// Wrong number of arguments to a combinator constructor
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    /// Argument type does not match the resolved signature
    TypeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    /// Symbol, function or type not found
    NotFound { kind: &'static str, name: String },

    /// Internal invariant violation (compiler bug) or backend failure
    InternalError {
        message: &'static str,
        context: Option<String>,
    },

    /// Required resource not available
    MissingResource {
        resource: &'static str,
        context: Option<String>,
    },
}

/// Lowering error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}")]
pub struct CodegenError {
    /// The kind of error.
    pub kind: CodegenErrorKind,
}

impl CodegenError {
    /// Create an unsupported feature error with context
    pub fn unsupported_with_context(feature: &'static str, context: impl Into<String>) -> Self {
        CodegenErrorKind::UnsupportedFeature {
            feature,
            context: Some(context.into()),
        }
        .into()
    }

    /// Create an argument count error
    pub fn arg_count(function: impl Into<String>, expected: usize, found: usize) -> Self {
        CodegenErrorKind::ArgumentCount {
            function: function.into(),
            expected,
            found,
        }
        .into()
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        context: &'static str,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        CodegenErrorKind::TypeMismatch {
            context,
            expected: expected.into(),
            found: found.into(),
        }
        .into()
    }

    /// Create a not found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CodegenErrorKind::NotFound {
            kind,
            name: name.into(),
        }
        .into()
    }

    /// Create an internal error
    pub fn internal(message: &'static str) -> Self {
        CodegenErrorKind::InternalError {
            message,
            context: None,
        }
        .into()
    }

    /// Create an internal error with context
    pub fn internal_with_context(message: &'static str, context: impl Into<String>) -> Self {
        CodegenErrorKind::InternalError {
            message,
            context: Some(context.into()),
        }
        .into()
    }

    /// Wrap a Cranelift module error
    pub fn cranelift(e: impl fmt::Display) -> Self {
        CodegenErrorKind::InternalError {
            message: "cranelift error",
            context: Some(e.to_string()),
        }
        .into()
    }

    /// Create a missing resource error with context
    pub fn missing_resource_with_context(
        resource: &'static str,
        context: impl Into<String>,
    ) -> Self {
        CodegenErrorKind::MissingResource {
            resource,
            context: Some(context.into()),
        }
        .into()
    }
}

impl From<CodegenErrorKind> for CodegenError {
    fn from(kind: CodegenErrorKind) -> Self {
        CodegenError { kind }
    }
}

impl Diagnostic for CodegenError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let code: &'static str = match &self.kind {
            CodegenErrorKind::UnsupportedFeature { .. } => "E3001",
            CodegenErrorKind::ArgumentCount { .. } => "E3002",
            CodegenErrorKind::TypeMismatch { .. } => "E3003",
            CodegenErrorKind::NotFound { .. } => "E3004",
            CodegenErrorKind::InternalError { .. } => "E3005",
            CodegenErrorKind::MissingResource { .. } => "E3006",
        };
        Some(Box::new(code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let help: &'static str = match &self.kind {
            CodegenErrorKind::ArgumentCount { .. } => {
                "combinator arity must match the resolved signature"
            }
            CodegenErrorKind::NotFound { kind, .. } if *kind == "external symbol" => {
                "register the symbol with the compiler before lowering"
            }
            _ => return None,
        };
        Some(Box::new(help))
    }
}

impl fmt::Display for CodegenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenErrorKind::UnsupportedFeature { feature, context } => {
                write!(f, "unsupported feature: {}", feature)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
            CodegenErrorKind::ArgumentCount {
                function,
                expected,
                found,
            } => {
                write!(
                    f,
                    "{} expects {} argument(s), got {}",
                    function, expected, found
                )
            }
            CodegenErrorKind::TypeMismatch {
                context,
                expected,
                found,
            } => {
                write!(f, "{}: expected {}, found {}", context, expected, found)
            }
            CodegenErrorKind::NotFound { kind, name } => {
                write!(f, "{} not found: {}", kind, name)
            }
            CodegenErrorKind::InternalError { message, context } => {
                write!(f, "internal error: {}", message)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
            CodegenErrorKind::MissingResource { resource, context } => {
                write!(f, "missing resource: {}", resource)?;
                if let Some(ctx) = context {
                    write!(f, " ({})", ctx)?;
                }
                Ok(())
            }
        }
    }
}

/// Result type alias for lowering operations.
pub type CodegenResult<T> = Result<T, CodegenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_with_context() {
        let err = CodegenError::unsupported_with_context("constructor", "array_i64");
        assert_eq!(
            err.to_string(),
            "unsupported feature: constructor (array_i64)"
        );
    }

    #[test]
    fn test_arg_count() {
        let err = CodegenError::arg_count("zip[array_i64,array_i64]", 2, 3);
        assert_eq!(
            err.to_string(),
            "zip[array_i64,array_i64] expects 2 argument(s), got 3"
        );
    }

    #[test]
    fn test_type_mismatch() {
        let err = CodegenError::type_mismatch("enumerate start", "integer", "f64");
        assert_eq!(
            err.to_string(),
            "enumerate start: expected integer, found f64"
        );
    }

    #[test]
    fn test_not_found() {
        let err = CodegenError::not_found("external symbol", "my_resume");
        assert_eq!(err.to_string(), "external symbol not found: my_resume");
    }

    #[test]
    fn test_internal_error() {
        let err = CodegenError::internal("state layout requested for opaque kind");
        assert_eq!(
            err.to_string(),
            "internal error: state layout requested for opaque kind"
        );
    }

    #[test]
    fn test_missing_resource() {
        let err = CodegenError::missing_resource_with_context("native ISA", "unsupported host");
        assert_eq!(
            err.to_string(),
            "missing resource: native ISA (unsupported host)"
        );
    }

    #[test]
    fn test_error_codes() {
        let cases: Vec<(CodegenError, &str)> = vec![
            (CodegenError::unsupported_with_context("x", "y"), "E3001"),
            (CodegenError::arg_count("f", 1, 2), "E3002"),
            (CodegenError::type_mismatch("c", "a", "b"), "E3003"),
            (CodegenError::not_found("fn", "x"), "E3004"),
            (CodegenError::internal("x"), "E3005"),
            (CodegenError::missing_resource_with_context("x", "y"), "E3006"),
        ];
        for (err, expected_code) in cases {
            let code = err.code().expect("should have error code");
            assert_eq!(code.to_string(), expected_code);
        }
    }

    #[test]
    fn test_help_only_for_actionable_kinds() {
        assert!(CodegenError::arg_count("f", 1, 2).help().is_some());
        assert!(
            CodegenError::not_found("external symbol", "x")
                .help()
                .is_some()
        );
        assert!(CodegenError::internal("x").help().is_none());
    }
}
