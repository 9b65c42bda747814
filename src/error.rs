//! Unified error taxonomy for the DSL engine.
//!
//! Every error is a plain enum variant rather than a class hierarchy, per
//! the propagation policy: callers match on `kind`, nothing is swallowed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single position in source text, 1-based for both line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Parser failure. Always total: a `SyntaxError` is returned on its own,
/// never alongside a partial AST.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("syntax error at {position}: {message} (near `{fragment}`)")]
pub struct SyntaxError {
    pub message: String,
    pub position: Position,
    /// Truncated offending fragment, for diagnostics.
    pub fragment: String,
}

/// Kinds of verb/argument validation failure, per §3 ValidationError.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationErrorKind {
    UnknownVerb,
    MissingRequiredArgument,
    TypeMismatch,
    EnumViolation,
    RangeViolation,
    PatternViolation,
    InvalidStateTransition,
    SyntaxError,
}

/// A single validation problem. `ValidateVerbs` collects every one found —
/// it never short-circuits on the first error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub verb: Option<String>,
    pub argument: Option<String>,
    pub message: String,
    pub position: Position,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            verb: None,
            argument: None,
            message: message.into(),
            position,
        }
    }

    pub fn with_verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = Some(verb.into());
        self
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = Some(argument.into());
        self
    }
}

/// Generation failure from a domain's `GenerateDSL`. LLM transient failures
/// are retryable; requests the vocabulary cannot express are not.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("generation failed: {message}")]
pub struct GenerationError {
    pub message: String,
    pub retryable: bool,
}

impl GenerationError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Router failure: no strategy produced a domain.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("no domain could be routed for this request")]
pub struct NoDomainError;

/// Placeholder resolution failure (§4.2): missing context key with no
/// registered default, or a placeholder that is still unresolved after the
/// bounded substitution passes.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ResolverError {
    #[error("no value for placeholder `<{0}>` and no default registered")]
    MissingKey(String),
    #[error("placeholder `<{0}>` remained unresolved after the nested-substitution pass")]
    StillUnresolved(String),
}

/// Hard, non-recoverable errors surfaced structurally rather than via panics.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("session `{0}` expired")]
    SessionExpired(String),
    #[error("domain `{0}` is not registered")]
    DomainNotRegistered(String),
    #[error(
        "verb `{verb}` is already owned by domain `{existing_domain}`; cannot register it for `{new_domain}`"
    )]
    DuplicateVerbOwnership {
        verb: String,
        existing_domain: String,
        new_domain: String,
    },
    #[error("domain `{0}` is already registered")]
    DuplicateDomainName(String),
    #[error("invalid state transition for domain `{domain}`: {from} -> {to}")]
    InvalidStateTransition {
        domain: String,
        from: String,
        to: String,
    },
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    NoDomain(#[from] NoDomainError),
}

pub type EngineResult<T> = Result<T, EngineError>;
