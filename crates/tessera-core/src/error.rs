//! Core error types.

use thiserror::Error;

use crate::resource::ResourceId;

/// Errors raised while building or validating the capability graph.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A version string could not be parsed.
    #[error("invalid version '{value}': {reason}")]
    InvalidVersion {
        /// The offending input.
        value: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A version range string could not be parsed.
    #[error("invalid version range '{0}'")]
    InvalidVersionRange(String),

    /// A deployment descriptor is missing or has an invalid identity.
    #[error("invalid identity for deployment at {location}: {reason}")]
    InvalidIdentity {
        /// The deployment location.
        location: String,
        /// Why the identity was rejected.
        reason: String,
    },

    /// A wire would connect a resource to itself.
    #[error("resource {0} cannot be wired to itself")]
    SelfWire(ResourceId),

    /// A class or path pattern is malformed.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
