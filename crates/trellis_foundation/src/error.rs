//! Error types for the Trellis system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context. Query
//! definition errors surface when a query is built or planned; consistency
//! errors mean an API was used against its lifecycle.

use std::fmt;

use thiserror::Error;

use crate::object::ObjectId;

/// Result type used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Trellis operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Wraps a lower-level failure into a normalization error of `pattern`.
    #[must_use]
    pub fn rewriter(pattern: impl Into<String>, message: impl Into<String>, source: Option<Error>) -> Self {
        Self::new(ErrorKind::Rewriter {
            pattern: pattern.into(),
            message: message.into(),
            source: source.map(Box::new),
        })
    }

    /// Creates a planner error for a body that cannot be realized.
    #[must_use]
    pub fn planner(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Planner {
            pattern: pattern.into(),
            message: message.into(),
        })
    }

    /// Creates an invalid constraint error.
    #[must_use]
    pub fn invalid_constraint(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConstraint {
            constraint: constraint.into(),
            message: message.into(),
        })
    }

    /// Creates an object not found error.
    #[must_use]
    pub fn object_not_found(id: ObjectId) -> Self {
        Self::new(ErrorKind::ObjectNotFound(id))
    }

    /// Creates a stale object reference error.
    #[must_use]
    pub fn stale_object(id: ObjectId) -> Self {
        Self::new(ErrorKind::StaleObject(id))
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Creates an illegal seed error for an enumeration over `key`.
    #[must_use]
    pub fn illegal_seed(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalSeed {
            key: key.into(),
            message: message.into(),
        })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true for errors that indicate API misuse rather than bad input.
    #[must_use]
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ListenersAttached(_)
                | ErrorKind::WildcardMode(_)
                | ErrorKind::Frozen(_)
                | ErrorKind::Disposed
                | ErrorKind::Internal(_)
        )
    }
}

/// Categorized error kinds.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Normalizing a pattern body failed.
    #[error("normalization of pattern {pattern} failed: {message}")]
    Rewriter {
        /// Fully qualified name of the offending pattern.
        pattern: String,
        /// Description of the failure.
        message: String,
        /// The originating lower-level error, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// A normalized body could not be turned into an executable plan.
    #[error("cannot plan pattern {pattern}: {message}")]
    Planner {
        /// Fully qualified name of the offending pattern.
        pattern: String,
        /// Description of the failure.
        message: String,
    },

    /// A body can never produce a match.
    #[error("pattern {pattern} is unsatisfiable: {constraint}")]
    Unsatisfiable {
        /// Fully qualified name of the offending pattern.
        pattern: String,
        /// The constraint that cannot hold.
        constraint: String,
    },

    /// A constraint failed its own sanity check.
    #[error("invalid constraint {constraint}: {message}")]
    InvalidConstraint {
        /// The offending constraint.
        constraint: String,
        /// Description of the violation.
        message: String,
    },

    /// A query with this name is already registered.
    #[error("duplicate query: {0}")]
    DuplicateQuery(String),

    /// No query with this name is registered.
    #[error("unknown query: {0}")]
    UnknownQuery(String),

    /// A variable name was not declared in the body.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// An object or resource cannot serve as an indexing root.
    #[error("invalid root: {0}")]
    InvalidRoot(String),

    /// An input key cannot be used for the requested operation.
    #[error("illegal input key: {0}")]
    IllegalInputKey(String),

    /// A seed does not fit the input key it is used with.
    #[error("illegal seed for {key}: {message}")]
    IllegalSeed {
        /// The input key being enumerated.
        key: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Object was not found in the model.
    #[error("object not found: {0:?}")]
    ObjectNotFound(ObjectId),

    /// Object reference is stale (generation mismatch).
    #[error("stale object reference: {0:?}")]
    StaleObject(ObjectId),

    /// Class name or id is not part of the metamodel.
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// Feature name or id is not part of the metamodel.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// Data type name or id is not part of the metamodel.
    #[error("unknown data type: {0}")]
    UnknownDataType(String),

    /// A value does not conform to the declared type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Description of the expected type.
        expected: String,
        /// Description of the actual type.
        actual: String,
    },

    /// Integer arithmetic left the range of `i64`.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// A single-valued feature already holds a value.
    #[error("feature {0} is single-valued and already set")]
    Multiplicity(String),

    /// Visiting the model failed.
    #[error("traversal failed: {0}")]
    Traversal(String),

    /// A listener callback reported a failure.
    #[error("listener failed: {0}")]
    ListenerFailed(String),

    /// Unregistration attempted while listeners are still subscribed.
    #[error("listeners still attached to {0}")]
    ListenersAttached(String),

    /// Operation not permitted while the index is in wildcard mode.
    #[error("not permitted in wildcard mode: {0}")]
    WildcardMode(String),

    /// Mutation of a frozen structure.
    #[error("structure is frozen: {0}")]
    Frozen(String),

    /// The owning engine or index has been disposed.
    #[error("disposed")]
    Disposed,

    /// Operation not supported by this component.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Pattern or resource the error relates to.
    pub source: Option<String>,
    /// Body index within the pattern.
    pub body: Option<usize>,
    /// Stack of constraint or task descriptions.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source pattern or resource.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the body index.
    #[must_use]
    pub fn with_body(mut self, body: usize) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
            if let Some(body) = self.body {
                write!(f, " body #{body}")?;
            }
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
