//! Error types for the model layer

use std::error::Error;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors raised by model types (keys, entities, canonical encoding)
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ModelError {
    /// A key segment contains a zero byte
    #[error("Key segment contains a zero byte: {segment:?}")]
    #[diagnostic(help("Zero bytes are reserved for the path-string encoding"))]
    NulInKeySegment {
        /// The offending segment
        segment: String,
    },

    /// A key was constructed with no segments
    #[error("Key must have at least one segment")]
    EmptyKey,

    /// An entity had a different shape than the decoder expected
    #[error("Expected {expected} entity, found {found}")]
    EntityMismatch {
        /// The entity kind the decoder wanted
        expected: &'static str,
        /// The entity kind actually present
        found: &'static str,
    },

    /// A required attribute was absent from an entity map
    #[error("Missing attribute: {name}")]
    MissingAttribute {
        /// Attribute name
        name: &'static str,
    },

    /// An id attribute had the wrong width
    #[error("Invalid id length: {len} bytes (expected 20)")]
    InvalidIdLength {
        /// Observed byte length
        len: usize,
    },

    /// Canonical encoding failed
    #[error("Canonical encoding failed")]
    Encode(#[source] BoxError),

    /// Canonical decoding failed
    #[error("Canonical decoding failed")]
    Decode(#[source] BoxError),
}
