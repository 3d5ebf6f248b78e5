//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tessera_modules::prelude::*;` to import all essential types.

pub use crate::{
    DependencySpec, LoadUnit, ModuleError, ModuleLoader, ModuleManager, ModuleResult, NativeCode,
    PathFilter,
};
