#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Framework properties and typed configuration for the Tessera runtime.
//!
//! # Usage
//!
//! ```rust
//! use tessera_config::{FrameworkConfig, MapProperties};
//!
//! let overrides = MapProperties::new()
//!     .with("tessera.framework.beginning.startlevel", "3")
//!     .with("tessera.auto.start", "mem:web");
//! let props = MapProperties::layered(None, &overrides).unwrap();
//! let config = FrameworkConfig::from_properties(&props).unwrap();
//! assert_eq!(config.beginning_start_level, 3);
//! assert_eq!(config.auto_start, vec!["mem:web"]);
//! ```
//!
//! # Property Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Explicit properties** handed to the framework builder
//! 2. **Properties file** (TOML; nested tables flatten to dotted keys)
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! Values may reference other properties or environment variables with
//! `${key}`.
//!
//! This crate has **no dependencies on other internal tessera crates**.

/// Configuration error types.
pub mod error;
/// Typed framework configuration.
pub mod framework;
/// Property maps and file loading.
pub mod properties;
/// `${key}` replacement.
pub mod substitute;

pub use error::{ConfigError, ConfigResult};
pub use framework::FrameworkConfig;
pub use properties::{MapProperties, PropertyProvider};
pub use substitute::{resolved_property, substitute};
