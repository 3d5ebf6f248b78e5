//! Resolution error types.

use tessera_core::{CoreError, Requirement, ResourceId};
use thiserror::Error;

/// Errors produced while resolving or applying a resolution.
///
/// Every variant is returned before any environment state is mutated.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Mandatory resources could not be satisfied.
    #[error("unable to resolve: {}", describe(.requirements))]
    Unresolved {
        /// The unsatisfied requirements of the mandatory resources.
        requirements: Vec<Requirement>,
    },

    /// Two packages seen by one resource come from inconsistent providers.
    #[error("uses constraint violation in {resource}: package '{package}' has conflicting providers")]
    UsesConflict {
        /// The resource whose class space is inconsistent.
        resource: ResourceId,
        /// The package with two providers.
        package: String,
    },

    /// The permutation search hit its bound.
    #[error("resolution search exhausted after {attempts} permutations")]
    SearchExhausted {
        /// Permutations tried.
        attempts: usize,
    },

    /// Native code for a resource could not be bound.
    #[error("native code binding failed for {resource}: {message}")]
    NativeBinding {
        /// The resource.
        resource: ResourceId,
        /// Why binding failed.
        message: String,
    },

    /// A resource is not known to the environment.
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    /// A resource with the same id is already installed.
    #[error("resource {0} is already installed")]
    DuplicateResource(ResourceId),

    /// Invalid graph data.
    #[error(transparent)]
    Core(#[from] CoreError),
}

fn describe(requirements: &[Requirement]) -> String {
    requirements
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for resolution operations.
pub type ResolutionResult<T> = Result<T, ResolutionError>;
