//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tessera_resolver::prelude::*;` to import all essential types.

pub use crate::{Environment, ResolutionError, ResolutionResult, Resolver, Snapshot};
