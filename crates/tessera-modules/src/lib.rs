//! Tessera Modules - Module graph composition for the Tessera runtime.
//!
//! This crate provides:
//! - [`ModuleManager`], which composes a resolved resource and its wires
//!   into a [`LoadUnit`]
//! - [`LoadUnit`] and [`DependencySpec`], the composed dependency graph of
//!   one module
//! - [`PathFilter`], the filter algebra deciding which paths cross an edge
//! - [`ModuleLoader`], the registry of created modules answering
//!   visibility queries
//! - [`NativeCode`], native library selection and binding
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_core::{Deployment, ResourceId};
//! use tessera_modules::{ModuleLoader, ModuleManager, PathFilter};
//! use tessera_resolver::Environment;
//!
//! let env = Environment::new();
//! let manager = ModuleManager::new(Arc::new(ModuleLoader::new()), PathFilter::reject_all());
//!
//! let resource = Arc::new(
//!     Deployment::new("mem:api", "com.acme.api", "1.0")
//!         .to_resource(ResourceId::new(1), 0)
//!         .unwrap(),
//! );
//! let id = manager.add_module(&env, &resource, &[]).unwrap();
//! assert_eq!(id.name(), "tessera.com.acme.api");
//! assert!(manager.loader().module(&id).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod filter;
mod loader;
mod manager;
mod native;
mod unit;

pub use error::{ModuleError, ModuleResult};
pub use filter::{GlobPattern, PathFilter, package_path, parent_path};
pub use loader::ModuleLoader;
pub use manager::{
    ComposedBatch, FRAMEWORK_MODULE, FRAMEWORK_SLOT, MODULE_PREFIX, ModuleManager, ModulePlan,
    edges_by_provider,
};
pub use native::{NativeCode, Platform};
pub use unit::{DependencySpec, LoadUnit, UnitRoot};
