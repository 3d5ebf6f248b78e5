//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tessera_framework::prelude::*;` to import all essential types.

pub use crate::{
    BootstrapReport, Bundle, BundleActivator, BundleManager, DeploymentSource, Framework,
    FrameworkBuilder, FrameworkError, FrameworkResult, StartLevel, StartOptions,
};
