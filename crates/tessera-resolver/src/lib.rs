//! Tessera Resolver - Capability resolution for the Tessera module runtime.
//!
//! This crate provides:
//! - The [`Environment`], the registry of installed resources and their
//!   published wirings
//! - The [`Resolver`], which turns a set of resources into a [`WireMap`]
//!   honoring version ranges, singleton exclusion and `uses` consistency
//!
//! Resolution is pure: it reads a [`Snapshot`] and returns wires. Publishing
//! them is a separate step ([`Environment::update_wiring`]).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_core::{Deployment, PackageExport, PackageImport, ResourceId};
//! use tessera_resolver::{Environment, Resolver};
//!
//! let api = Deployment::new("mem:api", "com.acme.api", "1.0")
//!     .with_export(PackageExport::new("com.acme.api"))
//!     .to_resource(ResourceId::new(1), 0)
//!     .unwrap();
//! let web = Deployment::new("mem:web", "com.acme.web", "1.0")
//!     .with_import(PackageImport::new("com.acme.api"))
//!     .to_resource(ResourceId::new(2), 0)
//!     .unwrap();
//!
//! let env = Environment::new();
//! env.install(Arc::new(api)).unwrap();
//! let web = Arc::new(web);
//! env.install(Arc::clone(&web)).unwrap();
//!
//! let wires = Resolver::new().resolve(&env, &[web], &[]).unwrap();
//! env.update_wiring(&wires);
//! assert!(env.is_resolved(ResourceId::new(1)));
//! assert!(env.is_resolved(ResourceId::new(2)));
//! ```
//!
//! [`WireMap`]: tessera_core::WireMap

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod environment;
mod error;
mod resolver;

pub use environment::{Environment, Snapshot};
pub use error::{ResolutionError, ResolutionResult};
pub use resolver::{DEFAULT_MAX_PERMUTATIONS, Resolver};
