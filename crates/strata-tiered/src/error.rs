//! Error types for the version store

use std::error::Error;
use std::fmt;
use strata_common::ModelError;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for version-store operations
pub type Result<T> = std::result::Result<T, TieredError>;

/// Version-store error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct TieredError {
    kind: TieredErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for version-store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieredErrorKind {
    /// A reference or record was missing
    NotFound,
    /// The optimistic retry budget was exhausted
    Conflict,
    /// An id mismatch or invariant violation in stored data
    Corruption,
    /// The underlying store failed
    Store,
    /// Serialization/deserialization failed
    Serialization,
    /// Malformed caller input
    IllegalArgument,
}

impl TieredError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: TieredErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> TieredErrorKind {
        self.kind
    }

    // Constructors for different error kinds

    /// A record of the given kind was not found
    pub fn not_found(what: &str, id: impl fmt::Display) -> Self {
        Self::new(TieredErrorKind::NotFound, None)
            .with_context(format!("{what} not found: {id}"))
    }

    /// A named reference was not found or no longer has the expected kind
    pub fn reference_not_found(msg: impl Into<String>) -> Self {
        Self::new(TieredErrorKind::NotFound, None).with_context(msg.into())
    }

    /// The optimistic retry budget was exhausted
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(TieredErrorKind::Conflict, None)
            .with_context(msg.into())
            .with_help("Another writer kept winning the conditional update; retry the operation")
    }

    /// Stored data violated an invariant or failed its id check
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::new(TieredErrorKind::Corruption, None).with_context(msg.into())
    }

    /// The underlying store failed
    pub fn store(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(TieredErrorKind::Store, Some(Box::new(source)))
    }

    /// Serialization or deserialization failed
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(TieredErrorKind::Serialization, Some(Box::new(source)))
    }

    /// The caller supplied malformed input
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::new(TieredErrorKind::IllegalArgument, None).with_context(msg.into())
    }
}

impl fmt::Display for TieredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {src}")?;
        }

        Ok(())
    }
}

impl From<ModelError> for TieredError {
    fn from(e: ModelError) -> Self {
        match &e {
            ModelError::NulInKeySegment { .. } | ModelError::EmptyKey => {
                Self::new(TieredErrorKind::IllegalArgument, Some(Box::new(e)))
            }
            ModelError::Encode(_) => Self::new(TieredErrorKind::Serialization, Some(Box::new(e))),
            ModelError::EntityMismatch { .. }
            | ModelError::MissingAttribute { .. }
            | ModelError::InvalidIdLength { .. }
            | ModelError::Decode(_) => Self::new(TieredErrorKind::Corruption, Some(Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_and_kind() {
        let err = TieredError::not_found("l1", "deadbeef");
        assert_eq!(err.kind(), TieredErrorKind::NotFound);
        assert_eq!(err.to_string(), "NotFound: l1 not found: deadbeef");
    }

    #[test]
    fn model_errors_map_to_kinds() {
        let err: TieredError = ModelError::EmptyKey.into();
        assert_eq!(err.kind(), TieredErrorKind::IllegalArgument);

        let err: TieredError = ModelError::InvalidIdLength { len: 3 }.into();
        assert_eq!(err.kind(), TieredErrorKind::Corruption);
    }
}
