//! Tessera Framework - Bundle lifecycle for the Tessera module runtime.
//!
//! This crate provides:
//! - [`BundleManager`]: installs bundles and runs their start/stop lifecycle
//! - [`ResolverPlugin`]: resolves bundles and applies the result (fragment
//!   attachment, native binding, module composition, state changes)
//! - [`Bootstrap`]: the INSTALL, RESOLVE, ACTIVATE, COMPLETE pipeline
//! - [`StartLevel`]: the start-level scheduler
//! - [`Framework`]: the facade tying these together from configuration
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_core::{Deployment, PackageExport, PackageImport, ResourceState};
//! use tessera_framework::{Framework, InMemorySource};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = InMemorySource::new()
//!     .with(
//!         Deployment::new("mem:api", "com.acme.api", "1.0")
//!             .with_export(PackageExport::new("com.acme.api")),
//!     )
//!     .with(
//!         Deployment::new("mem:web", "com.acme.web", "1.0")
//!             .with_import(PackageImport::new("com.acme.api")),
//!     );
//!
//! let framework = Framework::builder()
//!     .property("tessera.auto.install", "mem:api")
//!     .property("tessera.auto.start", "mem:web")
//!     .source(Arc::new(source))
//!     .build()?;
//!
//! let report = framework.start().await?;
//! assert_eq!(report.activated.len(), 1);
//!
//! let web = framework.bundles().bundle_at("mem:web").unwrap();
//! assert_eq!(web.state(), ResourceState::Active);
//!
//! framework.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod activator;
mod bootstrap;
mod bundle;
mod error;
mod framework;
mod manager;
mod notify;
mod plugin;
mod source;
mod start_level;
#[cfg(test)]
mod testing;

pub use activator::{ActivatorError, ActivatorRegistry, BundleActivator};
pub use bootstrap::{
    Bootstrap, BootstrapEntry, BootstrapReport, CompletionBarrier, FilterReason, InstallFailure,
};
pub use bundle::Bundle;
pub use error::{FrameworkError, FrameworkResult};
pub use framework::{Framework, FrameworkBuilder};
pub use manager::{BundleManager, StartOptions};
pub use plugin::{ResolveOutcome, ResolverPlugin};
pub use source::{DeploymentSource, InMemorySource, TomlFileSource, parse_deployment};
pub use start_level::{LevelChange, StartLevel};
