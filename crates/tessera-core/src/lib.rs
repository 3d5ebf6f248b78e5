//! Tessera Core - Capability graph data model for the Tessera module runtime.
//!
//! This crate provides:
//! - Resources (installable units) with their capabilities and requirements
//! - Typed requirement filters and version ranges
//! - Wires and the published per-resource wiring view
//! - The normalized deployment descriptor consumed at install time
//!
//! # Example
//!
//! ```rust
//! use tessera_core::{Deployment, PackageExport, ResourceId};
//!
//! let deployment = Deployment::new("file:acme-api.toml", "com.acme.api", "1.2.0")
//!     .with_export(PackageExport::new("com.acme.api"));
//!
//! let resource = deployment.to_resource(ResourceId::new(1), 0).unwrap();
//! assert_eq!(resource.symbolic_name(), "com.acme.api");
//! assert!(resource.is_host());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod capability;
pub mod deployment;
pub mod error;
pub mod filter;
pub mod namespace;
pub mod resource;
pub mod version;
pub mod wire;

pub use capability::{AttributeValue, Attributes, Capability, Requirement};
pub use deployment::{
    ActivationPolicy, BundleRequire, ContentRoot, CustomCapability, CustomRequirement, Deployment,
    HostRef, NativeLibrary, PackageExport, PackageImport, system_resource,
};
pub use error::{CoreError, CoreResult};
pub use filter::Filter;
pub use namespace::Namespace;
pub use resource::{
    ModuleIdentifier, NativeBinding, Resource, ResourceId, ResourceIdentity, ResourceKind,
    ResourceSlots, ResourceState, SYSTEM_RESOURCE_ID, SYSTEM_SYMBOLIC_NAME,
};
pub use version::{VersionRange, parse_version};
pub use wire::{Wire, WireMap, Wiring};
