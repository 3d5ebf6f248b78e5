//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tessera_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult};

// Graph
pub use crate::{
    AttributeValue, Attributes, Capability, Filter, ModuleIdentifier, Namespace, Requirement,
    Resource, ResourceId, ResourceKind, ResourceState,
};

// Wiring
pub use crate::{Wire, WireMap, Wiring};

// Descriptors
pub use crate::{Deployment, PackageExport, PackageImport, VersionRange};
