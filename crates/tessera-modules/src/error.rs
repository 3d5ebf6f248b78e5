//! Module composition error types.

use tessera_core::{ModuleIdentifier, ResourceId};
use thiserror::Error;

/// Errors raised while composing, registering or querying modules.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Fragments are merged into their host and never form a module.
    #[error("resource {0} is a fragment and has no module")]
    FragmentNotModule(ResourceId),

    /// The framework module can only be created once.
    #[error("framework module already created")]
    FrameworkModuleExists,

    /// A wire names a provider the environment no longer knows.
    #[error("unknown provider resource {0}")]
    UnknownProvider(ResourceId),

    /// No module is registered under the identifier.
    #[error("module not found: {0}")]
    ModuleNotFound(ModuleIdentifier),

    /// A path or package pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// None of the declared native libraries applies to this platform.
    #[error("no native library of {resource} matches {os}/{arch}")]
    NoMatchingNativeLibrary {
        /// The declaring resource.
        resource: ResourceId,
        /// Current operating system.
        os: String,
        /// Current architecture.
        arch: String,
    },

    /// A selected native library is missing from the content.
    #[error("native library '{path}' of {resource} not found in content")]
    NativeLibraryNotFound {
        /// The declaring resource.
        resource: ResourceId,
        /// Declared entry path.
        path: String,
    },
}

/// Result type for module operations.
pub type ModuleResult<T> = Result<T, ModuleError>;
